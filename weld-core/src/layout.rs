//! Paths inside a weld's private `.weld/` directory.
//!
//! ```text
//! <weld>/.weld/
//!   welded.yaml              (manifest, tracked)
//!   bases/<base>/            (mirror clones, excluded)
//!   state/                   (operation store, excluded)
//!   bad-patches/<seam>.patch (rejected patch text, excluded)
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::types::{BaseName, SeamName};

pub const WELD_DIR: &str = ".weld";
pub const MANIFEST_FILE: &str = "welded.yaml";
pub const BASES_DIR: &str = "bases";
pub const STATE_DIR: &str = "state";
pub const BAD_PATCHES_DIR: &str = "bad-patches";

/// Prefix shared by every working branch the engine creates.
pub const WORKING_BRANCH_PREFIX: &str = "weld-";

pub fn weld_dir(root: &Path) -> PathBuf {
    root.join(WELD_DIR)
}

pub fn manifest_path(root: &Path) -> PathBuf {
    weld_dir(root).join(MANIFEST_FILE)
}

pub fn bases_dir(root: &Path) -> PathBuf {
    weld_dir(root).join(BASES_DIR)
}

pub fn mirror_dir(root: &Path, base: &BaseName) -> PathBuf {
    bases_dir(root).join(&base.0)
}

pub fn state_dir(root: &Path) -> PathBuf {
    weld_dir(root).join(STATE_DIR)
}

pub fn bad_patches_dir(root: &Path) -> PathBuf {
    weld_dir(root).join(BAD_PATCHES_DIR)
}

pub fn bad_patch_path(root: &Path, seam: &SeamName) -> PathBuf {
    bad_patches_dir(root).join(format!("{}.patch", seam.0))
}

pub fn pull_branch(base: &BaseName) -> String {
    format!("{WORKING_BRANCH_PREFIX}pull-{base}")
}

pub fn push_branch(base: &BaseName) -> String {
    format!("{WORKING_BRANCH_PREFIX}push-{base}")
}

pub fn is_working_branch(branch: &str) -> bool {
    branch.starts_with(WORKING_BRANCH_PREFIX)
}

/// Entries `ensure_excluded` keeps in `.git/info/exclude`.
pub fn private_patterns() -> [String; 3] {
    [BASES_DIR, STATE_DIR, BAD_PATCHES_DIR].map(|d| format!("/{WELD_DIR}/{d}/"))
}

/// Keep the private `.weld` subdirectories out of `git status`.
///
/// Appends any missing pattern to `<root>/.git/info/exclude`. A weld whose
/// `.git` is not a directory (worktree or submodule) is left alone.
pub fn ensure_excluded(root: &Path) -> std::io::Result<()> {
    let git_dir = root.join(".git");
    if !git_dir.is_dir() {
        return Ok(());
    }
    let info = git_dir.join("info");
    std::fs::create_dir_all(&info)?;
    let exclude = info.join("exclude");
    let existing = match std::fs::read_to_string(&exclude) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };
    let missing: Vec<String> = private_patterns()
        .into_iter()
        .filter(|p| !existing.lines().any(|l| l.trim() == p))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&exclude)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    for pattern in missing {
        writeln!(file, "{pattern}")?;
    }
    Ok(())
}
