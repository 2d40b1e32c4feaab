//! The weld manifest, `.weld/welded.yaml`.
//!
//! # Format
//!
//! ```yaml
//! name: my-weld
//! origin: git@example.com:me/my-weld.git   # optional
//! settings:                                 # optional
//!   combine: rebase                         # merge (default) | rebase
//!   sanitise_script: tools/scrub.sh
//!   identity: { name: Weld Bot, email: weld@example.com }
//! bases:
//!   - name: lib
//!     uri: ../lib.git
//!     branch: main                          # at most one of branch/tag/rev
//!     seams:
//!       - { source: src, dest: lib/src }
//!       - { name: lib-docs, source: doc, dest: docs/lib }
//! ```
//!
//! A seam without a `name` is named after its `dest`, with `/` replaced by `-`.
//!
//! # API pattern
//!
//! Every function takes the weld root explicitly (`load_at(root)`), mirroring
//! the layout helpers. [`load_weld`] is the one-stop loader used by commands.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ManifestError;
use crate::layout;
use crate::seams::paths_overlap;
use crate::types::{Base, BaseName, CombineStyle, Seam, SeamName, Selector, Weld};

// ---------------------------------------------------------------------------
// 1. File model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Settings::is_empty")]
    pub settings: Settings,
    #[serde(default)]
    pub bases: Vec<BaseEntry>,
}

/// Optional defaults for sync operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combine: Option<CombineStyle>,
    /// Relative to the weld root unless absolute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sanitise_script: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
}

impl Settings {
    fn is_empty(&self) -> bool {
        self == &Settings::default()
    }
}

/// Committer identity used for commits the engine creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseEntry {
    pub name: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default)]
    pub seams: Vec<SeamEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeamEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Empty (or omitted) means the base root.
    #[serde(default)]
    pub source: String,
    pub dest: String,
}

impl SeamEntry {
    fn resolved_name(&self) -> String {
        match &self.name {
            Some(n) => n.clone(),
            None => normalize(&self.dest).replace('/', "-"),
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Load / save
// ---------------------------------------------------------------------------

/// Load `<root>/.weld/welded.yaml`.
///
/// Returns `ManifestError::ManifestNotFound` if absent,
/// `ManifestError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(root: &Path) -> Result<Manifest, ManifestError> {
    let path = layout::manifest_path(root);
    if !path.exists() {
        return Err(ManifestError::ManifestNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| ManifestError::Parse { path, source: e })
}

/// Atomically save the manifest: serialize → `.yaml.tmp` sibling → `rename`.
pub fn save_at(root: &Path, manifest: &Manifest) -> Result<(), ManifestError> {
    let path = layout::manifest_path(root);
    std::fs::create_dir_all(layout::weld_dir(root))?;
    let tmp_path = path.with_extension("yaml.tmp");

    let yaml = serde_yaml::to_string(manifest)?;
    std::fs::write(&tmp_path, yaml)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// Walk up from `start` to the first directory holding a manifest.
pub fn find_root(start: &Path) -> Result<PathBuf, ManifestError> {
    let mut dir = Some(start);
    while let Some(d) = dir {
        if layout::manifest_path(d).is_file() {
            return Ok(d.to_path_buf());
        }
        dir = d.parent();
    }
    Err(ManifestError::NotAWeld {
        start: start.to_path_buf(),
    })
}

/// Load, validate and resolve the weld rooted at `root`.
pub fn load_weld(root: &Path) -> Result<(Weld, Settings), ManifestError> {
    let manifest = load_at(root)?;
    let weld = manifest.to_weld(root)?;
    Ok((weld, manifest.settings))
}

// ---------------------------------------------------------------------------
// 3. Validation and resolution
// ---------------------------------------------------------------------------

impl Manifest {
    /// Check every structural rule a weld must satisfy.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.name.trim().is_empty() {
            return Err(invalid("weld name must not be empty"));
        }

        let mut base_names = BTreeSet::new();
        let mut seam_names = BTreeSet::new();
        let mut all_dests: Vec<(String, &str)> = Vec::new();

        for base in &self.bases {
            check_base_name(&base.name)?;
            if !base_names.insert(base.name.as_str()) {
                return Err(invalid(format!("duplicate base {:?}", base.name)));
            }
            if base.uri.trim().is_empty() {
                return Err(invalid(format!("base {:?} has no uri", base.name)));
            }
            let selectors = [&base.branch, &base.tag, &base.rev]
                .iter()
                .filter(|s| s.is_some())
                .count();
            if selectors > 1 {
                return Err(invalid(format!(
                    "base {:?} sets more than one of branch, tag and rev",
                    base.name
                )));
            }
            if base.seams.is_empty() {
                return Err(invalid(format!("base {:?} declares no seams", base.name)));
            }

            let mut sources: Vec<String> = Vec::new();
            for seam in &base.seams {
                let source = normalize(&seam.source);
                let dest = normalize(&seam.dest);
                check_relative(&base.name, &source, "source")?;
                check_relative(&base.name, &dest, "dest")?;
                if dest.is_empty() {
                    return Err(invalid(format!(
                        "base {:?}: a seam dest cannot be the weld root",
                        base.name
                    )));
                }
                if paths_overlap(&dest, layout::WELD_DIR) {
                    return Err(invalid(format!(
                        "base {:?}: dest {dest:?} overlaps {}",
                        base.name,
                        layout::WELD_DIR
                    )));
                }

                let name = seam.resolved_name();
                if name.is_empty() || name.contains(['/', '\\']) {
                    return Err(invalid(format!("invalid seam name {name:?}")));
                }
                if !seam_names.insert(name.clone()) {
                    return Err(invalid(format!("duplicate seam name {name:?}")));
                }

                if let Some(other) = sources.iter().find(|s| paths_overlap(s, &source)) {
                    return Err(invalid(format!(
                        "base {:?}: sources {other:?} and {source:?} overlap",
                        base.name
                    )));
                }
                if let Some((other, owner)) =
                    all_dests.iter().find(|(d, _)| paths_overlap(d, &dest))
                {
                    return Err(invalid(format!(
                        "dest {dest:?} of base {:?} overlaps dest {other:?} of base {owner:?}",
                        base.name
                    )));
                }
                sources.push(source);
                all_dests.push((dest, base.name.as_str()));
            }
        }
        Ok(())
    }

    /// Validate and resolve into the in-memory [`Weld`] model.
    pub fn to_weld(&self, root: &Path) -> Result<Weld, ManifestError> {
        self.validate()?;
        let mut bases = BTreeMap::new();
        for entry in &self.bases {
            let name = BaseName::from(entry.name.as_str());
            let selector = match (&entry.branch, &entry.tag, &entry.rev) {
                (Some(b), _, _) => Selector::Branch(b.clone()),
                (_, Some(t), _) => Selector::Tag(t.clone()),
                (_, _, Some(r)) => Selector::Rev(r.clone()),
                _ => Selector::Default,
            };
            let seams = entry
                .seams
                .iter()
                .map(|s| Seam {
                    name: SeamName::from(s.resolved_name()),
                    base: name.clone(),
                    source: normalize(&s.source),
                    dest: normalize(&s.dest),
                })
                .collect();
            bases.insert(
                name.clone(),
                Base {
                    name,
                    uri: entry.uri.clone(),
                    selector,
                    seams,
                },
            );
        }
        Ok(Weld {
            name: self.name.clone(),
            root: root.to_path_buf(),
            origin: self.origin.clone(),
            bases,
        })
    }
}

/// Strip `./` and trailing `/`; `.` becomes the empty (root) path.
fn normalize(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
    if trimmed == "." {
        String::new()
    } else {
        trimmed.to_owned()
    }
}

fn check_base_name(name: &str) -> Result<(), ManifestError> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(invalid(format!(
            "base name {name:?} must be non-empty ASCII letters, digits, '-', '_' or '.'"
        )))
    }
}

fn check_relative(base: &str, path: &str, what: &str) -> Result<(), ManifestError> {
    if path.starts_with('/') || path.split('/').any(|seg| seg == ".." || seg == ".") {
        return Err(invalid(format!(
            "base {base:?}: seam {what} {path:?} must be a plain relative path"
        )));
    }
    if path.split('/').any(str::is_empty) && !path.is_empty() {
        return Err(invalid(format!(
            "base {base:?}: seam {what} {path:?} has an empty segment"
        )));
    }
    Ok(())
}

fn invalid(msg: impl Into<String>) -> ManifestError {
    ManifestError::Invalid(msg.into())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
