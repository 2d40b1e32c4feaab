//! Whole-tree synchronisation of one seam, used instead of patch replay in
//! bulk mode.
//!
//! ## `sync_seam` protocol
//!
//! 1. List tracked files under the seam on both sides (`git ls-files`).
//! 2. For every source file, compute the destination content (marker
//!    escaping applied to UTF-8 text).
//! 3. SHA-256 both sides and skip identical files.
//! 4. Write to `<path>.weld.tmp`, copy the executable bit, rename.
//! 5. Delete destination files the source no longer tracks and prune
//!    directories left empty.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use weld_core::markers::{escape_text, mentions_marker, unescape_text};
use weld_core::seams::{pathspec, remap_path};

use crate::error::{io_err, SyncError};
use crate::git;
use crate::patch::{remove_and_prune, MarkerPolicy};

/// Outcome of an individual file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// File was written (content changed or did not previously exist).
    Written { path: PathBuf },
    /// File was skipped: destination content already matches.
    Unchanged { path: PathBuf },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub written: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

impl BulkReport {
    pub fn changed(&self) -> bool {
        self.written > 0 || self.deleted > 0
    }
}

fn digest(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

fn hash_file(path: &Path) -> Result<Option<String>, SyncError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(digest(&bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path, e)),
    }
}

fn transform(content: Vec<u8>, policy: MarkerPolicy) -> Vec<u8> {
    match std::str::from_utf8(&content) {
        Ok(text) if mentions_marker(text) => match policy {
            MarkerPolicy::Escape => escape_text(text).into_bytes(),
            MarkerPolicy::Unescape => unescape_text(text).into_bytes(),
        },
        _ => content,
    }
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}

#[cfg(unix)]
fn set_executable(path: &Path, executable: bool) -> Result<(), SyncError> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if executable { 0o755 } else { 0o644 };
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _executable: bool) -> Result<(), SyncError> {
    Ok(())
}

/// Atomically write `content` to `path` unless it already holds it.
pub(crate) fn atomic_write(
    path: &Path,
    content: &[u8],
    executable: bool,
) -> Result<WriteResult, SyncError> {
    let existing_meta = std::fs::symlink_metadata(path).ok();
    let same_kind = existing_meta
        .as_ref()
        .map_or(false, |m| m.file_type().is_file() && is_executable(m) == executable);
    if same_kind && hash_file(path)?.as_deref() == Some(digest(content).as_str()) {
        tracing::debug!("unchanged: {}", path.display());
        return Ok(WriteResult::Unchanged {
            path: path.to_path_buf(),
        });
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    if existing_meta.map_or(false, |m| m.file_type().is_symlink()) {
        std::fs::remove_file(path).map_err(|e| io_err(path, e))?;
    }

    let tmp = PathBuf::from(format!("{}.weld.tmp", path.display()));
    std::fs::write(&tmp, content).map_err(|e| io_err(&tmp, e))?;
    set_executable(&tmp, executable)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }

    tracing::debug!("wrote: {}", path.display());
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
    })
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<WriteResult, SyncError> {
    let target = std::fs::read_link(src).map_err(|e| io_err(src, e))?;
    if std::fs::read_link(dst).ok().as_deref() == Some(target.as_path()) {
        return Ok(WriteResult::Unchanged {
            path: dst.to_path_buf(),
        });
    }
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    if std::fs::symlink_metadata(dst).is_ok() {
        std::fs::remove_file(dst).map_err(|e| io_err(dst, e))?;
    }
    std::os::unix::fs::symlink(&target, dst).map_err(|e| io_err(dst, e))?;
    Ok(WriteResult::Written {
        path: dst.to_path_buf(),
    })
}

/// Make the tracked files under `to` in `dst_repo` mirror the tracked files
/// under `from` in `src_repo`.
pub fn sync_seam(
    src_repo: &Path,
    from: &str,
    dst_repo: &Path,
    to: &str,
    policy: MarkerPolicy,
) -> Result<BulkReport, SyncError> {
    let mut report = BulkReport::default();
    let mut wanted = BTreeSet::new();

    for file in git::ls_files(src_repo, &[pathspec(from)])? {
        let Some(dest_rel) = remap_path(&file, from, to) else {
            continue;
        };
        let src = src_repo.join(&file);
        let dst = dst_repo.join(&dest_rel);
        let meta = std::fs::symlink_metadata(&src).map_err(|e| io_err(&src, e))?;

        let result = if meta.file_type().is_symlink() {
            #[cfg(unix)]
            {
                copy_symlink(&src, &dst)?
            }
            #[cfg(not(unix))]
            {
                let bytes = std::fs::read(&src).map_err(|e| io_err(&src, e))?;
                atomic_write(&dst, &bytes, false)?
            }
        } else {
            let bytes = std::fs::read(&src).map_err(|e| io_err(&src, e))?;
            atomic_write(&dst, &transform(bytes, policy), is_executable(&meta))?
        };
        match result {
            WriteResult::Written { .. } => report.written += 1,
            WriteResult::Unchanged { .. } => report.unchanged += 1,
        }
        wanted.insert(dest_rel);
    }

    for file in git::ls_files(dst_repo, &[pathspec(to)])? {
        let path = dst_repo.join(&file);
        if !wanted.contains(&file) && std::fs::symlink_metadata(&path).is_ok() {
            tracing::debug!("removing {file}: no longer in {}", pathspec(from));
            remove_and_prune(dst_repo, &path)?;
            report.deleted += 1;
        }
    }

    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
