//! Seam classification and seam path arithmetic.

use crate::types::{Seam, SeamPair};

/// Result of comparing the seam set recorded at the last sync with the one
/// declared now. Every list preserves input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeamChanges {
    /// Recorded pairs that are no longer declared.
    pub deleted: Vec<SeamPair>,
    /// Declared seams whose pair was already recorded.
    pub changed: Vec<Seam>,
    /// Declared seams whose pair was never recorded.
    pub added: Vec<Seam>,
}

impl SeamChanges {
    /// True when the seam structure itself changed.
    pub fn has_structural_changes(&self) -> bool {
        !self.deleted.is_empty() || !self.added.is_empty()
    }

    /// Seams that take part in content replay (changed then added).
    pub fn active(&self) -> impl Iterator<Item = &Seam> {
        self.changed.iter().chain(self.added.iter())
    }
}

/// Partition `last` and `current` into deleted / changed / added.
///
/// Identity is the `(source, dest)` pair: renaming either side of a seam is a
/// delete plus an add.
pub fn classify(last: &[SeamPair], current: &[Seam]) -> SeamChanges {
    let current_pairs: Vec<SeamPair> = current.iter().map(Seam::pair).collect();

    let deleted = last
        .iter()
        .filter(|pair| !current_pairs.contains(pair))
        .cloned()
        .collect();

    let (changed, added) = current
        .iter()
        .cloned()
        .partition(|seam| last.contains(&seam.pair()));

    SeamChanges {
        deleted,
        changed,
        added,
    }
}

/// Strip a directory `prefix` from `path`, matching on whole path segments.
///
/// An empty prefix matches everything. Returns the remainder without a leading
/// `/` (empty when `path == prefix`).
pub fn strip_path_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return Some(path);
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

/// Move `path` from under `from` to under `to`, or `None` if it is outside `from`.
pub fn remap_path(path: &str, from: &str, to: &str) -> Option<String> {
    let rest = strip_path_prefix(path, from)?;
    let to = to.trim_end_matches('/');
    Some(match (to.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_owned(),
        (false, true) => to.to_owned(),
        (false, false) => format!("{to}/{rest}"),
    })
}

/// True when two directory prefixes overlap (one contains the other).
pub fn paths_overlap(a: &str, b: &str) -> bool {
    strip_path_prefix(a, b).is_some() || strip_path_prefix(b, a).is_some()
}

/// A git pathspec for a seam directory; the repository root becomes `.`.
pub fn pathspec(dir: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        ".".to_owned()
    } else {
        dir.to_owned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
