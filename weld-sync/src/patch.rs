//! Rewriting diffs between a base and the weld, and applying them.
//!
//! A diff produced by [`git::diff_range`] is split into one section per file.
//! Each section whose path lies under a [`PathMapping`]'s `from` prefix has
//! its path moved under `to`; every other section is dropped. Marker-looking
//! lines in hunk bodies are escaped on the way into the weld and unescaped on
//! the way back out, so replayed content can never forge a sync marker.
//!
//! Sections are applied one at a time. A rejected deletion is carried out
//! directly. Any other rejection lands in `.weld/bad-patches/<seam>.patch`.

use std::borrow::Cow;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use weld_core::markers::{escape_line, unescape_line};
use weld_core::seams::remap_path;
use weld_core::{layout, SeamName};

use crate::error::{io_err, SyncError};
use crate::git;

/// Which way marker-looking lines are rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerPolicy {
    /// Base to weld: add one escape layer.
    Escape,
    /// Weld to base: remove one escape layer.
    Unescape,
}

impl MarkerPolicy {
    fn apply<'a>(self, line: &'a str) -> Cow<'a, str> {
        match self {
            MarkerPolicy::Escape => escape_line(line),
            MarkerPolicy::Unescape => unescape_line(line),
        }
    }
}

/// Move paths under `from` to under `to`, attributing them to `seam`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    pub seam: SeamName,
    pub from: String,
    pub to: String,
}

/// One file's worth of a rewritten diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSection {
    pub seam: SeamName,
    /// Path after rewriting.
    pub path: String,
    pub deletion: bool,
    pub text: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenPatch {
    pub sections: Vec<FileSection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewritten {
    /// No section survived the rewrite.
    NothingToApply,
    Patch(RewrittenPatch),
}

/// Counts from [`apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub failed: usize,
    /// Sections never attempted because an earlier one halted the step.
    pub deferred: usize,
    /// Deletions git rejected that were performed by removing the file.
    pub deleted_directly: usize,
}

impl ApplyReport {
    pub fn halted(&self) -> bool {
        self.failed > 0
    }

    pub fn merge(&mut self, other: ApplyReport) {
        self.applied += other.applied;
        self.failed += other.failed;
        self.deferred += other.deferred;
        self.deleted_directly += other.deleted_directly;
    }
}

// ---------------------------------------------------------------------------
// Splitting and path parsing
// ---------------------------------------------------------------------------

const DIFF_HEADER: &[u8] = b"diff --git ";

fn lines(text: &[u8]) -> impl Iterator<Item = &[u8]> {
    text.split_inclusive(|b| *b == b'\n')
}

fn strip_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Split a multi-file diff at each `diff --git` line.
pub fn split_sections(diff: &[u8]) -> Vec<&[u8]> {
    let mut sections = Vec::new();
    let mut start: Option<usize> = None;
    let mut offset = 0;
    for line in lines(diff) {
        if line.starts_with(DIFF_HEADER) {
            if let Some(s) = start {
                sections.push(&diff[s..offset]);
            }
            start = Some(offset);
        }
        offset += line.len();
    }
    if let Some(s) = start {
        sections.push(&diff[s..]);
    }
    sections
}

/// Decode a C-style quoted git path starting at `text[0] == '"'`.
/// Returns the unquoted bytes and the number of input bytes consumed.
fn unquote(text: &[u8]) -> Option<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    let mut i = 1;
    while i < text.len() {
        match text[i] {
            b'"' => return Some((out, i + 1)),
            b'\\' => {
                let c = *text.get(i + 1)?;
                i += 2;
                match c {
                    b'n' => out.push(b'\n'),
                    b't' => out.push(b'\t'),
                    b'r' => out.push(b'\r'),
                    b'a' => out.push(0x07),
                    b'b' => out.push(0x08),
                    b'f' => out.push(0x0c),
                    b'v' => out.push(0x0b),
                    b'0'..=b'7' => {
                        let digits = text.get(i - 1..i + 2)?;
                        let value = digits
                            .iter()
                            .try_fold(0u32, |acc, d| match d {
                                b'0'..=b'7' => Some(acc * 8 + u32::from(d - b'0')),
                                _ => None,
                            })?;
                        out.push(u8::try_from(value).ok()?);
                        i += 2;
                    }
                    other => out.push(other),
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    None
}

fn needs_quoting(path: &str) -> bool {
    path.bytes()
        .any(|b| b == b'"' || b == b'\\' || b < 0x20 || b == 0x7f)
}

/// Render `prefix` + `path` the way git writes it in patch headers.
fn quote(prefix: &str, path: &str) -> String {
    let full = format!("{prefix}{path}");
    if !needs_quoting(&full) {
        return full;
    }
    let mut out = String::with_capacity(full.len() + 2);
    out.push('"');
    for c in full.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\{:03o}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// The path named by a `diff --git a/P b/P` line.
///
/// Renames are disabled, so both sides name the same path and the split
/// point follows from the length even when `P` contains spaces.
pub fn header_path(line: &[u8]) -> Option<String> {
    let rest = strip_eol(line.strip_prefix(DIFF_HEADER)?);
    if rest.first() == Some(&b'"') {
        let (bytes, _) = unquote(rest)?;
        let path = bytes.strip_prefix(b"a/")?;
        return Some(String::from_utf8_lossy(path).into_owned());
    }
    if rest.len() < 5 || (rest.len() - 5) % 2 != 0 {
        return None;
    }
    let n = (rest.len() - 5) / 2;
    let a = rest.strip_prefix(b"a/")?;
    let (path, tail) = a.split_at(n);
    if tail.strip_prefix(b" b/")? != path {
        return None;
    }
    Some(String::from_utf8_lossy(path).into_owned())
}

// ---------------------------------------------------------------------------
// Rewrite
// ---------------------------------------------------------------------------

fn file_header_line(marker: &str, prefix: &str, path: &str) -> String {
    let name = quote(prefix, path);
    // git terminates unquoted names containing spaces with a tab.
    if !name.starts_with('"') && name.contains(' ') {
        format!("{marker} {name}\t\n")
    } else {
        format!("{marker} {name}\n")
    }
}

fn rewrite_section(section: &[u8], to_path: &str, policy: MarkerPolicy) -> (Vec<u8>, bool) {
    let mut out = Vec::with_capacity(section.len());
    let mut in_hunks = false;
    let mut binary = false;
    let mut deletion = false;

    for (i, line) in lines(section).enumerate() {
        if i == 0 {
            out.extend_from_slice(
                format!(
                    "diff --git {} {}\n",
                    quote("a/", to_path),
                    quote("b/", to_path)
                )
                .as_bytes(),
            );
            continue;
        }
        if !in_hunks && !binary {
            if line.starts_with(b"deleted file mode") {
                deletion = true;
            }
            if line.starts_with(b"GIT binary patch") {
                binary = true;
            }
            if line.starts_with(b"--- ") {
                if strip_eol(line) == b"--- /dev/null" {
                    out.extend_from_slice(line);
                } else {
                    out.extend_from_slice(file_header_line("---", "a/", to_path).as_bytes());
                }
                continue;
            }
            if line.starts_with(b"+++ ") {
                if strip_eol(line) == b"+++ /dev/null" {
                    out.extend_from_slice(line);
                } else {
                    out.extend_from_slice(file_header_line("+++", "b/", to_path).as_bytes());
                }
                continue;
            }
            if line.starts_with(b"@@") {
                in_hunks = true;
            }
            out.extend_from_slice(line);
            continue;
        }
        if in_hunks && matches!(line.first(), Some(b' ' | b'+' | b'-')) {
            if let Ok(text) = std::str::from_utf8(&line[1..]) {
                out.push(line[0]);
                out.extend_from_slice(policy.apply(text).as_bytes());
                continue;
            }
        }
        out.extend_from_slice(line);
    }
    (out, deletion)
}

/// Keep the sections under some mapping, with paths and content rewritten.
pub fn rewrite(diff: &[u8], mappings: &[PathMapping], policy: MarkerPolicy) -> Rewritten {
    let mut sections = Vec::new();
    for section in split_sections(diff) {
        let Some(first) = lines(section).next() else {
            continue;
        };
        let Some(path) = header_path(first) else {
            tracing::warn!(
                "skipping diff section with unparseable header: {}",
                String::from_utf8_lossy(strip_eol(first))
            );
            continue;
        };
        let Some((mapping, to_path)) = mappings
            .iter()
            .find_map(|m| remap_path(&path, &m.from, &m.to).map(|p| (m, p)))
        else {
            continue;
        };
        let (text, deletion) = rewrite_section(section, &to_path, policy);
        sections.push(FileSection {
            seam: mapping.seam.clone(),
            path: to_path,
            deletion,
            text,
        });
    }
    if sections.is_empty() {
        Rewritten::NothingToApply
    } else {
        Rewritten::Patch(RewrittenPatch { sections })
    }
}

// ---------------------------------------------------------------------------
// Bad patches
// ---------------------------------------------------------------------------

/// The per-seam side files holding rejected patch text.
#[derive(Debug, Clone)]
pub struct BadPatches {
    root: PathBuf,
}

impl BadPatches {
    pub fn new(weld_root: &Path) -> Self {
        Self {
            root: weld_root.to_path_buf(),
        }
    }

    pub fn path(&self, seam: &SeamName) -> PathBuf {
        layout::bad_patch_path(&self.root, seam)
    }

    /// Remove every recorded bad patch.
    pub fn clear(&self) -> Result<(), SyncError> {
        let dir = layout::bad_patches_dir(&self.root);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(dir, e)),
        }
    }

    pub fn append(&self, seam: &SeamName, text: &[u8]) -> Result<(), SyncError> {
        let dir = layout::bad_patches_dir(&self.root);
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        let path = self.path(seam);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        file.write_all(text).map_err(|e| io_err(&path, e))
    }

    /// Seams that currently have a bad-patches file.
    pub fn recorded(&self) -> Result<Vec<SeamName>, SyncError> {
        let dir = layout::bad_patches_dir(&self.root);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut seams: Vec<SeamName> = std::fs::read_dir(&dir)
            .map_err(|e| io_err(&dir, e))?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".patch").map(SeamName::from)
            })
            .collect();
        seams.sort();
        Ok(seams)
    }
}

// ---------------------------------------------------------------------------
// Apply
// ---------------------------------------------------------------------------

/// Remove `path` and any directories it leaves empty, up to `workdir`.
pub(crate) fn remove_and_prune(workdir: &Path, path: &Path) -> Result<(), SyncError> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(path, e)),
    }
    prune_empty_dirs(workdir, path.parent());
    Ok(())
}

pub(crate) fn prune_empty_dirs(workdir: &Path, mut dir: Option<&Path>) {
    while let Some(d) = dir {
        if d == workdir || !d.starts_with(workdir) {
            break;
        }
        // remove_dir only succeeds on empty directories.
        if std::fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
}

/// Apply every section of `patch` in `workdir`.
///
/// Without `ignore_bad_patches` the first rejected section halts: it and all
/// sections after it are appended to their seams' bad-patches files. With it,
/// each rejected section is recorded and application carries on.
pub fn apply(
    workdir: &Path,
    patch: &RewrittenPatch,
    bad_patches: &BadPatches,
    ignore_bad_patches: bool,
) -> Result<ApplyReport, SyncError> {
    let mut report = ApplyReport::default();
    let mut sections = patch.sections.iter();

    while let Some(section) = sections.next() {
        if git::apply_patch(workdir, &section.text)? {
            report.applied += 1;
            continue;
        }
        if section.deletion {
            tracing::debug!("deleting {} directly", section.path);
            remove_and_prune(workdir, &workdir.join(&section.path))?;
            report.deleted_directly += 1;
            continue;
        }

        tracing::warn!("patch for {} did not apply (seam {})", section.path, section.seam);
        bad_patches.append(&section.seam, &section.text)?;
        report.failed += 1;
        if !ignore_bad_patches {
            for rest in sections.by_ref() {
                bad_patches.append(&rest.seam, &rest.text)?;
                report.deferred += 1;
            }
        }
    }
    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
