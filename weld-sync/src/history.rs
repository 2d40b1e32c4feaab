//! Locating the last synchronization point of a base in the weld history.

use std::path::Path;

use serde::{Deserialize, Serialize};

use weld_core::markers::{find_latest, EventVerb, HistoryEntry, LatestEvent};
use weld_core::{BaseName, SeamPair};

use crate::error::SyncError;
use crate::git;

/// Where a pull or push starts from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPoint {
    /// Weld commit carrying the marker.
    pub marker_commit: String,
    pub verb: EventVerb,
    /// Base commit recorded by the marker; `None` for `Init`.
    pub base_commit: Option<String>,
    /// Seam mapping recorded by the marker; empty for `Init`.
    pub seams: Vec<SeamPair>,
}

impl From<LatestEvent> for SyncPoint {
    fn from(latest: LatestEvent) -> Self {
        let verb = latest.event.verb();
        let (base_commit, seams) = match latest.event.data() {
            Some(d) => (Some(d.commit.clone()), d.seams.clone()),
            None => (None, Vec::new()),
        };
        SyncPoint {
            marker_commit: latest.commit,
            verb,
            base_commit,
            seams,
        }
    }
}

/// Newest event for `base` among `verbs`, scanning the history of `HEAD`.
pub fn latest_event(
    root: &Path,
    base: &BaseName,
    verbs: &[EventVerb],
) -> Result<Option<LatestEvent>, SyncError> {
    let history = git::log_history(root, "HEAD")?;
    Ok(find_latest(&history, base, verbs)?)
}

fn init_point(root: &Path, base: &BaseName) -> Result<SyncPoint, SyncError> {
    latest_event(root, base, &[EventVerb::Init])?
        .map(SyncPoint::from)
        .ok_or_else(|| {
            SyncError::give_up(
                "no `X-Weld-State: Init` marker in the weld history; \
                 the weld was never initialised",
            )
        })
}

/// Starting point for a pull: last `Merged`/`Pushed`, else `Init`.
pub fn pull_sync_point(
    root: &Path,
    base: &BaseName,
    ignore_history: bool,
) -> Result<SyncPoint, SyncError> {
    if ignore_history {
        return init_point(root, base);
    }
    match latest_event(root, base, &[EventVerb::Merged, EventVerb::Pushed])? {
        Some(latest) => Ok(latest.into()),
        None => init_point(root, base),
    }
}

/// Where the scan for weld edits to push begins: last `Pushed`, else `Init`.
pub fn push_sync_point(root: &Path, base: &BaseName) -> Result<SyncPoint, SyncError> {
    match latest_event(root, base, &[EventVerb::Pushed])? {
        Some(latest) => Ok(latest.into()),
        None => init_point(root, base),
    }
}

/// The `Merged` or `Pushed` point for `base` recorded by one weld commit.
pub fn sync_point_at(
    commit: &str,
    message: &str,
    base: &BaseName,
) -> Result<Option<SyncPoint>, SyncError> {
    let entry = HistoryEntry {
        commit: commit.to_string(),
        message: message.to_string(),
    };
    let found = find_latest([&entry], base, &[EventVerb::Merged, EventVerb::Pushed])?;
    Ok(found.map(SyncPoint::from))
}
