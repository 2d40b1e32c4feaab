//! Private clones of the bases under `.weld/bases/<base>`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use weld_core::{layout, Base, Selector};

use crate::error::{io_err, SyncError};
use crate::git;

/// Branch and head of a mirror, recorded so `abort` can put it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorHead {
    /// `None` when the mirror sits on a detached HEAD (tag or rev selectors).
    pub branch: Option<String>,
    pub head: String,
}

pub fn mirror_path(root: &Path, base: &Base) -> PathBuf {
    layout::mirror_dir(root, &base.name)
}

/// A local path URI is resolved against the weld root so the mirror's
/// `origin` does not depend on the directory git ran in.
pub fn resolve_uri(root: &Path, uri: &str) -> String {
    let looks_remote = uri.contains("://") || (uri.contains(':') && !uri.starts_with('/'));
    if looks_remote || Path::new(uri).is_absolute() {
        return uri.to_string();
    }
    let local = root.join(uri);
    match local.canonicalize() {
        Ok(path) => path.to_string_lossy().into_owned(),
        Err(_) => uri.to_string(),
    }
}

/// Current branch and head of an existing mirror.
pub fn snapshot(mirror: &Path) -> Result<Option<MirrorHead>, SyncError> {
    if !mirror.join(".git").exists() {
        return Ok(None);
    }
    Ok(Some(MirrorHead {
        branch: git::current_branch(mirror)?,
        head: git::rev_parse(mirror, "HEAD")?,
    }))
}

/// Put a mirror back where [`snapshot`] found it.
pub fn restore(mirror: &Path, head: &MirrorHead) -> Result<(), SyncError> {
    if git::is_merge_in_progress(mirror)? {
        git::merge_abort(mirror)?;
    }
    git::reset_hard(mirror, "HEAD")?;
    git::clean(mirror)?;
    match &head.branch {
        Some(branch) => {
            git::checkout(mirror, branch)?;
            git::reset_hard(mirror, &head.head)?;
        }
        None => git::checkout(mirror, &head.head)?,
    }
    Ok(())
}

/// The branch the origin checks out by default, if the clone recorded one.
fn origin_default_branch(mirror: &Path) -> Result<Option<String>, SyncError> {
    let out = git::run_git_stdout(
        mirror,
        &["symbolic-ref", "--short", "-q", "refs/remotes/origin/HEAD"],
    )
    .ok();
    Ok(out.and_then(|s| s.strip_prefix("origin/").map(str::to_string)))
}

/// Clone or update the mirror according to the base's selector and return
/// its new head. The mirror is left on the selected branch (or detached at
/// the selected tag/rev).
pub fn sync(root: &Path, base: &Base) -> Result<MirrorHead, SyncError> {
    let mirror = mirror_path(root, base);
    let uri = resolve_uri(root, &base.uri);

    if !mirror.join(".git").exists() {
        let parent = layout::bases_dir(root);
        std::fs::create_dir_all(&parent).map_err(|e| io_err(&parent, e))?;
        tracing::info!("cloning {} into {}", uri, mirror.display());
        git::clone(root, &uri, &mirror, base.selector.branch())?;
    } else {
        if git::has_local_changes(&mirror)? {
            return Err(SyncError::give_up(format!(
                "the mirror of base {} at {} has local changes; run `weld abort` \
                 or clean it by hand",
                base.name,
                mirror.display()
            )));
        }
        tracing::info!("updating mirror of {}", base.name);
        git::fetch(&mirror)?;
    }

    match &base.selector {
        Selector::Tag(rev) | Selector::Rev(rev) => {
            git::checkout(&mirror, rev)?;
        }
        Selector::Branch(_) | Selector::Default => {
            let branch = match base.selector.branch() {
                Some(b) => Some(b.to_string()),
                None => origin_default_branch(&mirror)?,
            };
            if let Some(branch) = branch {
                if git::current_branch(&mirror)?.as_deref() != Some(branch.as_str()) {
                    git::checkout(&mirror, &branch)?;
                }
                let upstream = format!("origin/{branch}");
                if git::try_rev_parse(&mirror, &upstream)?.is_some() {
                    git::merge_ff_only(&mirror, &upstream)?;
                }
            }
        }
    }

    snapshot(&mirror)?.ok_or_else(|| {
        SyncError::give_up(format!("mirror of base {} was not created", base.name))
    })
}
