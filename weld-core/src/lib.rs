//! Weld core library: the weld model, its manifest, and the marker codec.
//!
//! - [`types`]: bases, seams and the weld itself
//! - [`manifest`]: `.weld/welded.yaml` load / save / validate
//! - [`markers`]: synchronization markers in commit messages
//! - [`seams`]: seam classification and path arithmetic
//! - [`layout`]: paths inside `.weld/` and working-branch names

pub mod error;
pub mod layout;
pub mod manifest;
pub mod markers;
pub mod seams;
pub mod types;

pub use error::{ManifestError, MarkerError};
pub use markers::{CommitData, EventVerb, HistoryEntry, LatestEvent, SyncEvent};
pub use seams::SeamChanges;
pub use types::{Base, BaseName, CombineStyle, Seam, SeamName, SeamPair, Selector, Weld};
