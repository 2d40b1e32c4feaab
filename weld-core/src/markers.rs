//! Synchronization markers carried in commit messages.
//!
//! # Wire format
//!
//! ```text
//! X-Weld-State: Init
//! X-Weld-State: Merged <base>/<commit-id> [["src","lib/src"],["docs","lib/docs"]]
//! ```
//!
//! A message may carry several markers. Replayed text that merely *looks* like
//! a marker is neutralised by adding an `Escaped-` layer to the tag
//! (`X-Escaped-Weld-State:`, `X-Escaped-Escaped-Weld-State:`, ...). Only the
//! unescaped tag is authoritative.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MarkerError;
use crate::types::{BaseName, SeamPair};

/// The authoritative marker tag.
pub const WELD_STATE_TAG: &str = "X-Weld-State:";

const TAG_HEAD: &str = "X-";
const TAG_TAIL: &str = "Weld-State:";
const ESCAPE_LAYER: &str = "Escaped-";

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// The kind of a synchronization event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventVerb {
    Init,
    Merged,
    Pushed,
    #[serde(rename = "Seam-Added")]
    SeamAdded,
    #[serde(rename = "Seam-Deleted")]
    SeamDeleted,
    PortedCommit,
}

impl EventVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            EventVerb::Init => "Init",
            EventVerb::Merged => "Merged",
            EventVerb::Pushed => "Pushed",
            EventVerb::SeamAdded => "Seam-Added",
            EventVerb::SeamDeleted => "Seam-Deleted",
            EventVerb::PortedCommit => "PortedCommit",
        }
    }

    pub fn parse(word: &str) -> Option<Self> {
        Some(match word {
            "Init" => EventVerb::Init,
            "Merged" => EventVerb::Merged,
            "Pushed" => EventVerb::Pushed,
            "Seam-Added" => EventVerb::SeamAdded,
            "Seam-Deleted" => EventVerb::SeamDeleted,
            "PortedCommit" => EventVerb::PortedCommit,
            _ => return None,
        })
    }
}

impl fmt::Display for EventVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload shared by every event except `Init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitData {
    pub base: BaseName,
    /// Commit id in the base repository.
    pub commit: String,
    /// Seam mapping frozen at the moment of the event.
    pub seams: Vec<SeamPair>,
}

/// An immutable synchronization fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Init,
    Merged(CommitData),
    Pushed(CommitData),
    SeamAdded(CommitData),
    SeamDeleted(CommitData),
    PortedCommit(CommitData),
}

impl SyncEvent {
    pub fn verb(&self) -> EventVerb {
        match self {
            SyncEvent::Init => EventVerb::Init,
            SyncEvent::Merged(_) => EventVerb::Merged,
            SyncEvent::Pushed(_) => EventVerb::Pushed,
            SyncEvent::SeamAdded(_) => EventVerb::SeamAdded,
            SyncEvent::SeamDeleted(_) => EventVerb::SeamDeleted,
            SyncEvent::PortedCommit(_) => EventVerb::PortedCommit,
        }
    }

    pub fn data(&self) -> Option<&CommitData> {
        match self {
            SyncEvent::Init => None,
            SyncEvent::Merged(d)
            | SyncEvent::Pushed(d)
            | SyncEvent::SeamAdded(d)
            | SyncEvent::SeamDeleted(d)
            | SyncEvent::PortedCommit(d) => Some(d),
        }
    }

    /// Build the event a decoded marker describes.
    pub fn from_marker(marker: &Marker) -> Result<Self, MarkerError> {
        if marker.verb == EventVerb::Init {
            return Ok(SyncEvent::Init);
        }
        let data = decode_commit_data(&marker.payload)?;
        Ok(match marker.verb {
            EventVerb::Init => SyncEvent::Init,
            EventVerb::Merged => SyncEvent::Merged(data),
            EventVerb::Pushed => SyncEvent::Pushed(data),
            EventVerb::SeamAdded => SyncEvent::SeamAdded(data),
            EventVerb::SeamDeleted => SyncEvent::SeamDeleted(data),
            EventVerb::PortedCommit => SyncEvent::PortedCommit(data),
        })
    }
}

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

/// One marker line split into verb and raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub verb: EventVerb,
    pub payload: String,
}

/// Render an event as a single marker line (no trailing newline).
pub fn encode(event: &SyncEvent) -> String {
    match event.data() {
        None => format!("{WELD_STATE_TAG} {}", event.verb()),
        Some(data) => format!(
            "{WELD_STATE_TAG} {} {}",
            event.verb(),
            encode_commit_data(data)
        ),
    }
}

/// `<base>/<commit> <json>`
pub fn encode_commit_data(data: &CommitData) -> String {
    let seams = Value::Array(
        data.seams
            .iter()
            .map(|p| {
                Value::Array(vec![
                    Value::String(p.source.clone()),
                    Value::String(p.dest.clone()),
                ])
            })
            .collect(),
    );
    format!("{}/{} {}", data.base, data.commit, seams)
}

/// Extract every well-formed marker from a commit message, in message order.
pub fn decode(message: &str) -> Vec<Marker> {
    message
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix(WELD_STATE_TAG)?.trim_start();
            let (word, payload) = match rest.split_once(char::is_whitespace) {
                Some((word, payload)) => (word, payload.trim()),
                None => (rest, ""),
            };
            let verb = EventVerb::parse(word)?;
            Some(Marker {
                verb,
                payload: payload.to_owned(),
            })
        })
        .collect()
}

/// Decode every marker in `message` into events.
pub fn decode_events(message: &str) -> Result<Vec<SyncEvent>, MarkerError> {
    decode(message).iter().map(SyncEvent::from_marker).collect()
}

/// Parse the `<base>/<commit-id> <json-seam-list>` payload shape.
pub fn decode_commit_data(payload: &str) -> Result<CommitData, MarkerError> {
    let (token, json) = payload
        .trim()
        .split_once(' ')
        .ok_or_else(|| MarkerError::parse(payload, "expected '<base>/<commit> <seams>'"))?;
    let (base, commit) = token
        .rsplit_once('/')
        .ok_or_else(|| MarkerError::parse(payload, "expected '<base>/<commit>'"))?;
    if base.is_empty() || commit.is_empty() {
        return Err(MarkerError::parse(payload, "empty base or commit id"));
    }
    let seams: Vec<SeamPair> = serde_json::from_str(json.trim())
        .map_err(|e| MarkerError::parse(payload, format!("bad seam list: {e}")))?;
    Ok(CommitData {
        base: BaseName::from(base),
        commit: commit.to_owned(),
        seams,
    })
}

// ---------------------------------------------------------------------------
// History search
// ---------------------------------------------------------------------------

/// One commit as seen by the history scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub commit: String,
    pub message: String,
}

/// The newest event found by [`find_latest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestEvent {
    /// Commit whose message carries the marker.
    pub commit: String,
    pub event: SyncEvent,
}

/// Find the newest event in `verbs` for `base`.
///
/// `history` must be ordered newest first. `Init` matches every base. When a
/// single message carries several candidates the last one written wins.
pub fn find_latest<'a, I>(
    history: I,
    base: &BaseName,
    verbs: &[EventVerb],
) -> Result<Option<LatestEvent>, MarkerError>
where
    I: IntoIterator<Item = &'a HistoryEntry>,
{
    for entry in history {
        for marker in decode(&entry.message).iter().rev() {
            if !verbs.contains(&marker.verb) {
                continue;
            }
            let event = SyncEvent::from_marker(marker)?;
            let matches = event.data().map_or(true, |d| &d.base == base);
            if matches {
                return Ok(Some(LatestEvent {
                    commit: entry.commit.clone(),
                    event,
                }));
            }
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Escaping
// ---------------------------------------------------------------------------

/// Number of `Escaped-` layers on a marker-looking line, or `None` when the
/// line is not marker-shaped at all.
fn escape_depth(body: &str) -> Option<usize> {
    let mut rest = body.strip_prefix(TAG_HEAD)?;
    let mut depth = 0;
    while let Some(next) = rest.strip_prefix(ESCAPE_LAYER) {
        rest = next;
        depth += 1;
    }
    rest.starts_with(TAG_TAIL).then_some(depth)
}

fn split_indent(line: &str) -> (&str, &str) {
    let body = line.trim_start();
    line.split_at(line.len() - body.len())
}

/// Add one escape layer to a marker-looking line. Other lines pass through.
pub fn escape_line(line: &str) -> Cow<'_, str> {
    let (indent, body) = split_indent(line);
    match escape_depth(body) {
        Some(_) => Cow::Owned(format!(
            "{indent}{TAG_HEAD}{ESCAPE_LAYER}{}",
            &body[TAG_HEAD.len()..]
        )),
        None => Cow::Borrowed(line),
    }
}

/// Remove one escape layer from an escaped marker line. Other lines pass through.
pub fn unescape_line(line: &str) -> Cow<'_, str> {
    let (indent, body) = split_indent(line);
    match escape_depth(body) {
        Some(depth) if depth > 0 => Cow::Owned(format!(
            "{indent}{TAG_HEAD}{}",
            &body[TAG_HEAD.len() + ESCAPE_LAYER.len()..]
        )),
        _ => Cow::Borrowed(line),
    }
}

/// [`escape_line`] over every line, preserving line endings.
pub fn escape_text(text: &str) -> String {
    text.split_inclusive('\n').map(escape_line).collect()
}

/// [`unescape_line`] over every line, preserving line endings.
pub fn unescape_text(text: &str) -> String {
    text.split_inclusive('\n').map(unescape_line).collect()
}

/// Cheap pre-check so callers can skip the per-line pass.
pub fn mentions_marker(text: &str) -> bool {
    text.contains(TAG_TAIL)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
