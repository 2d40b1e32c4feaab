//! Domain types for a weld.
//!
//! A [`Weld`] owns a set of [`Base`]s; every base contributes one or more
//! [`Seam`]s. Seam paths are kept as `/`-separated relative strings because
//! they travel through git output and commit metadata verbatim.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a base repository.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BaseName(pub String);

impl fmt::Display for BaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for BaseName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BaseName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed name for a seam.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeamName(pub String);

impl fmt::Display for SeamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SeamName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SeamName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// The `(source, dest)` identity of a seam.
///
/// Serialized as a two-element JSON array, which is the form recorded in
/// commit metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct SeamPair {
    pub source: String,
    pub dest: String,
}

impl SeamPair {
    pub fn new(source: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
        }
    }
}

impl From<(String, String)> for SeamPair {
    fn from((source, dest): (String, String)) -> Self {
        Self { source, dest }
    }
}

impl From<SeamPair> for (String, String) {
    fn from(pair: SeamPair) -> Self {
        (pair.source, pair.dest)
    }
}

impl fmt::Display for SeamPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = if self.source.is_empty() { "." } else { &self.source };
        write!(f, "{source} -> {}", self.dest)
    }
}

/// A directory mapping from a path inside a base to a path inside the weld.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seam {
    pub name: SeamName,
    pub base: BaseName,
    /// Relative path inside the base. Empty means the base root.
    pub source: String,
    /// Relative path inside the weld.
    pub dest: String,
}

impl Seam {
    pub fn pair(&self) -> SeamPair {
        SeamPair::new(self.source.clone(), self.dest.clone())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How a finished working branch is folded back into its original branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CombineStyle {
    #[default]
    Merge,
    Rebase,
}

impl fmt::Display for CombineStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CombineStyle::Merge => write!(f, "merge"),
            CombineStyle::Rebase => write!(f, "rebase"),
        }
    }
}

// ---------------------------------------------------------------------------
// Bases and the weld
// ---------------------------------------------------------------------------

/// Which upstream revision a base follows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selector {
    /// Whatever branch the clone checks out by default.
    #[default]
    Default,
    Branch(String),
    Tag(String),
    Rev(String),
}

impl Selector {
    /// Branch name when the base tracks a branch.
    pub fn branch(&self) -> Option<&str> {
        match self {
            Selector::Branch(b) => Some(b),
            _ => None,
        }
    }

    /// True when the base is pinned to a tag or revision and cannot be pushed to.
    pub fn is_pinned(&self) -> bool {
        matches!(self, Selector::Tag(_) | Selector::Rev(_))
    }
}

/// A single external repository participating in a weld.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base {
    pub name: BaseName,
    pub uri: String,
    pub selector: Selector,
    pub seams: Vec<Seam>,
}

impl Base {
    pub fn seam_pairs(&self) -> Vec<SeamPair> {
        self.seams.iter().map(Seam::pair).collect()
    }
}

/// The composite project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Weld {
    pub name: String,
    /// Absolute path to the weld working tree.
    pub root: PathBuf,
    pub origin: Option<String>,
    pub bases: BTreeMap<BaseName, Base>,
}

impl Weld {
    pub fn base(&self, name: &BaseName) -> Option<&Base> {
        self.bases.get(name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(BaseName::from("lib").to_string(), "lib");
        assert_eq!(SeamName::from("lib-src").to_string(), "lib-src");
    }

    #[test]
    fn seam_pair_serializes_as_array() {
        let pair = SeamPair::new("src", "lib/src");
        let json = serde_json::to_string(&pair).expect("serialize");
        assert_eq!(json, r#"["src","lib/src"]"#);
        let back: SeamPair = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, pair);
    }

    #[test]
    fn seam_pair_display_uses_dot_for_root() {
        assert_eq!(SeamPair::new("", "vendor/x").to_string(), ". -> vendor/x");
    }

    #[test]
    fn combine_style_display() {
        assert_eq!(CombineStyle::Merge.to_string(), "merge");
        assert_eq!(CombineStyle::Rebase.to_string(), "rebase");
    }

    #[test]
    fn pinned_selectors() {
        assert!(Selector::Tag("v1".into()).is_pinned());
        assert!(Selector::Rev("abc".into()).is_pinned());
        assert!(!Selector::Branch("main".into()).is_pinned());
        assert_eq!(Selector::Branch("main".into()).branch(), Some("main"));
        assert_eq!(Selector::Default.branch(), None);
    }
}
