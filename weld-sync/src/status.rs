//! Read-only report of where each base stands.

use std::collections::BTreeSet;

use serde::Serialize;

use weld_core::markers::EventVerb;
use weld_core::BaseName;

use crate::error::SyncError;
use crate::history::latest_event;
use crate::operation::{OperationKind, Verb};
use crate::workflow::{next_verbs, Session};

/// Last synchronisation of one base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseStatus {
    pub base: BaseName,
    pub uri: String,
    /// `None` when the weld history carries no event for this base.
    pub last_event: Option<EventVerb>,
    pub base_commit: Option<String>,
    pub weld_commit: Option<String>,
    pub seams: usize,
}

/// The operation in progress, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationStatus {
    pub kind: OperationKind,
    pub base: BaseName,
    pub replayed: usize,
    pub total: usize,
    pub bad_patches: usize,
    pub verbs: BTreeSet<Verb>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeldStatus {
    pub name: String,
    pub bases: Vec<BaseStatus>,
    pub operation: Option<OperationStatus>,
}

pub fn status(session: &Session) -> Result<WeldStatus, SyncError> {
    let mut bases = Vec::new();
    for base in session.weld.bases.values() {
        let latest = latest_event(
            session.root(),
            &base.name,
            &[EventVerb::Merged, EventVerb::Pushed, EventVerb::Init],
        )?;
        let (last_event, base_commit, weld_commit) = match latest {
            Some(l) => (
                Some(l.event.verb()),
                l.event.data().map(|d| d.commit.clone()),
                Some(l.commit),
            ),
            None => (None, None, None),
        };
        bases.push(BaseStatus {
            base: base.name.clone(),
            uri: base.uri.clone(),
            last_event,
            base_commit,
            weld_commit,
            seams: base.seams.len(),
        });
    }

    let operation = match session.store.load()? {
        Some((state, _)) => Some(OperationStatus {
            kind: state.kind,
            base: state.base.clone(),
            replayed: state.next_to_merge,
            total: state.commits.len(),
            bad_patches: state.bad_patches,
            verbs: next_verbs(session, &state)?,
        }),
        None => None,
    };

    Ok(WeldStatus {
        name: session.weld.name.clone(),
        bases,
        operation,
    })
}
