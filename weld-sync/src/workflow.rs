//! The resumable verb machine shared by pull and push.
//!
//! An operation is a persisted [`OperationState`] plus the set of verbs that
//! are legal next. [`invoke`] runs one verb against a copy of the state and
//! commits the copy only if the verb succeeded, so an `Err` leaves the
//! operation exactly where it was. [`drive`] keeps invoking verbs until the
//! operation finishes, halts, or needs the operator.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use weld_core::manifest::{self, Settings};
use weld_core::{layout, Base, BaseName, Weld};

use crate::error::SyncError;
use crate::git::{self, CommitIdentity};
use crate::mirror;
use crate::operation::{Grouping, OperationKind, OperationState, Stage, Verb};
use crate::{pull, push, sanitise};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Everything a verb needs besides the operation state.
#[derive(Debug, Clone)]
pub struct Session {
    pub weld: Weld,
    pub settings: Settings,
    pub identity: Option<CommitIdentity>,
    pub store: crate::store::Store,
}

impl Session {
    /// Load the manifest of the weld rooted at `root`.
    pub fn open(root: &Path) -> Result<Self, SyncError> {
        let (weld, settings) = manifest::load_weld(root)?;
        layout::ensure_excluded(root).map_err(|e| crate::error::io_err(root, e))?;
        Ok(Session {
            identity: settings.identity.as_ref().map(CommitIdentity::from),
            store: crate::store::Store::new(root),
            weld,
            settings,
        })
    }

    pub fn root(&self) -> &Path {
        &self.weld.root
    }

    pub fn base(&self, name: &BaseName) -> Result<&Base, SyncError> {
        self.weld.base(name).ok_or_else(|| {
            let known: Vec<String> = self.weld.bases.keys().map(ToString::to_string).collect();
            SyncError::give_up(format!(
                "unknown base {name}; the manifest declares: {}",
                known.join(", ")
            ))
        })
    }

    pub fn mirror(&self, name: &BaseName) -> Result<PathBuf, SyncError> {
        Ok(mirror::mirror_path(self.root(), self.base(name)?))
    }

    /// The sanitise script from the manifest, resolved against the root.
    pub fn default_sanitise_script(&self) -> Option<PathBuf> {
        self.settings
            .sanitise_script
            .as_ref()
            .map(|p| self.root().join(p))
    }

    /// Repository a verb of this operation works in.
    pub fn workdir(&self, state: &OperationState) -> Result<PathBuf, SyncError> {
        match state.kind {
            OperationKind::PullStep => Ok(self.root().to_path_buf()),
            OperationKind::PushStep => self.mirror(&state.base),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What a verb left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The operation moved forward and is still in progress.
    Progressed(String),
    /// The operator has to act; the message says how.
    Halted(String),
    /// The operation completed and its state is gone.
    Finished(String),
    /// The operation was rolled back and its state is gone.
    Aborted(String),
}

impl Outcome {
    pub fn message(&self) -> &str {
        match self {
            Outcome::Progressed(m)
            | Outcome::Halted(m)
            | Outcome::Finished(m)
            | Outcome::Aborted(m) => m,
        }
    }

    fn ends_operation(&self) -> bool {
        matches!(self, Outcome::Finished(_) | Outcome::Aborted(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub type Handler = fn(&Session, &mut OperationState) -> Result<Outcome, SyncError>;

const HANDLERS: &[(OperationKind, Verb, Handler)] = &[
    (OperationKind::PullStep, Verb::CheckoutSync, pull::checkout_sync),
    (OperationKind::PullStep, Verb::SeamAdjust, pull::seam_adjust),
    (OperationKind::PullStep, Verb::InitialCommit, pull::initial_commit),
    (OperationKind::PullStep, Verb::Step, pull::step),
    (OperationKind::PullStep, Verb::Commit, pull::commit),
    (OperationKind::PullStep, Verb::Sanitise, sanitise::sanitise_log),
    (OperationKind::PullStep, Verb::Inspect, inspect),
    (OperationKind::PullStep, Verb::Finish, pull::finish),
    (OperationKind::PullStep, Verb::Abort, pull::abort),
    (OperationKind::PushStep, Verb::CheckoutSync, push::checkout_sync),
    (OperationKind::PushStep, Verb::Step, push::step),
    (OperationKind::PushStep, Verb::Commit, push::commit),
    (OperationKind::PushStep, Verb::Sanitise, sanitise::sanitise_log),
    (OperationKind::PushStep, Verb::Inspect, inspect),
    (OperationKind::PushStep, Verb::Finish, push::finish),
    (OperationKind::PushStep, Verb::Abort, push::abort),
];

pub fn handler(kind: OperationKind, verb: Verb) -> Option<Handler> {
    HANDLERS
        .iter()
        .find(|(k, v, _)| *k == kind && *v == verb)
        .map(|(_, _, h)| *h)
}

/// Verbs that may run next, given the state and the repository.
pub fn next_verbs(session: &Session, state: &OperationState) -> Result<BTreeSet<Verb>, SyncError> {
    let mut verbs = BTreeSet::from([Verb::Abort, Verb::Inspect]);
    match state.stage {
        Stage::CheckoutSync => {
            verbs.insert(Verb::CheckoutSync);
        }
        Stage::SeamAdjust => {
            verbs.insert(Verb::SeamAdjust);
        }
        Stage::InitialCommit if state.is_halted() => {
            verbs.insert(Verb::Commit);
        }
        Stage::InitialCommit => {
            verbs.insert(Verb::InitialCommit);
        }
        Stage::Replay if state.finishing => {
            verbs.insert(Verb::Finish);
        }
        // Until a halted step is committed, nothing may move past it.
        Stage::Replay if state.is_halted() => {
            verbs.insert(Verb::Commit);
            if state.options.sanitise_script.is_some()
                && git::has_local_changes(&session.workdir(state)?)?
            {
                verbs.insert(Verb::Sanitise);
            }
        }
        Stage::Replay => {
            let changes = git::has_local_changes(&session.workdir(state)?)?;
            let remaining = state.commits_remaining() > 0;
            if changes {
                verbs.insert(Verb::Commit);
                if state.options.sanitise_script.is_some() {
                    verbs.insert(Verb::Sanitise);
                }
            }
            let grouped_step = state.options.grouping == Grouping::Grouped;
            if remaining && (!changes || grouped_step) {
                verbs.insert(Verb::Step);
            }
            if !remaining && !changes {
                verbs.insert(Verb::Finish);
            }
        }
    }
    Ok(verbs)
}

/// Start a new operation and drive it as far as its options allow.
pub fn begin(session: &Session, state: OperationState) -> Result<Outcome, SyncError> {
    let verbs = next_verbs(session, &state)?;
    session.store.begin(&state, &verbs)?;
    tracing::info!("started {} of base {}", state.kind, state.base);
    drive(session)
}

/// Run one verb on the operation in progress.
pub fn invoke(session: &Session, verb: Verb) -> Result<Outcome, SyncError> {
    let (state, legal) = session
        .store
        .load()?
        .ok_or_else(|| SyncError::give_up("no weld operation is in progress"))?;
    if !legal.contains(&verb) {
        let legal: Vec<&str> = legal.iter().map(|v| v.as_str()).collect();
        return Err(SyncError::give_up(format!(
            "`{verb}` is not possible now; possible verbs: {}",
            legal.join(", ")
        )));
    }
    let run = handler(state.kind, verb).ok_or_else(|| {
        SyncError::CorruptState(format!("no {verb} handler for a {} operation", state.kind))
    })?;

    tracing::info!("{} {}: {verb}", state.kind, state.base);
    let mut next = state.clone();
    let outcome = run(session, &mut next)?;

    if outcome.ends_operation() {
        session.store.clear()?;
    } else {
        let verbs = next_verbs(session, &next)?;
        session.store.commit(&next, &verbs)?;
    }
    match &outcome {
        Outcome::Halted(msg) => tracing::warn!("{msg}"),
        other => tracing::info!("{other}"),
    }
    Ok(outcome)
}

/// The verb the driver would run next, if any.
pub fn pick_next(state: &OperationState, legal: &BTreeSet<Verb>) -> Option<Verb> {
    if state.is_halted() {
        return None;
    }
    if let Some(verb) = legal.iter().copied().find(|v| v.is_structural()) {
        return Some(verb);
    }
    if !state.options.auto {
        return None;
    }
    if legal.contains(&Verb::Sanitise) && !state.log_sanitised {
        return Some(Verb::Sanitise);
    }
    let per_commit = state.options.grouping == Grouping::PerCommit;
    if legal.contains(&Verb::Commit) && (per_commit || state.commits_remaining() == 0) {
        return Some(Verb::Commit);
    }
    [Verb::Step, Verb::Finish]
        .into_iter()
        .find(|v| legal.contains(v))
}

/// Keep invoking verbs until the operation ends, halts or waits.
pub fn drive(session: &Session) -> Result<Outcome, SyncError> {
    let mut last: Option<Outcome> = None;
    loop {
        let Some((state, legal)) = session.store.load()? else {
            return Ok(last.unwrap_or_else(|| Outcome::Finished("nothing in progress".into())));
        };
        let Some(verb) = pick_next(&state, &legal) else {
            let legal: Vec<&str> = legal.iter().map(|v| v.as_str()).collect();
            let waiting = format!(
                "{} of base {} is waiting; next: {}",
                state.kind,
                state.base,
                legal.join(", ")
            );
            return Ok(Outcome::Progressed(match last {
                Some(outcome) => format!("{outcome}\n{waiting}"),
                None => waiting,
            }));
        };
        let outcome = invoke(session, verb)?;
        match outcome {
            Outcome::Progressed(_) => last = Some(outcome),
            _ => return Ok(outcome),
        }
    }
}

/// Summarise the operation without changing it.
pub fn inspect(session: &Session, state: &mut OperationState) -> Result<Outcome, SyncError> {
    let mut lines = vec![
        format!("{} of base {} started {}", state.kind, state.base, state.started_at),
        format!(
            "working branch {} (from {} at {})",
            state.working_branch,
            state.original_branch,
            short(&state.original_head)
        ),
        format!(
            "replayed {} of {} commit(s)",
            state.next_to_merge,
            state.commits.len()
        ),
    ];
    if state.is_halted() {
        lines.push(format!(
            "{} patch section(s) need attention in {}",
            state.bad_patches,
            layout::bad_patches_dir(session.root()).display()
        ));
    }
    if state.finishing {
        lines.push("finishing: resolve the conflict, then run `weld finish`".into());
    }
    if !state.pending_log.is_empty() {
        lines.push(format!("pending log:\n{}", state.pending_log.trim_end()));
    }
    Ok(Outcome::Progressed(lines.join("\n")))
}

/// First 12 characters of a commit id.
pub fn short(commit: &str) -> &str {
    commit.get(..12).unwrap_or(commit)
}

/// Checks shared by every command that starts an operation.
pub fn check_can_start(session: &Session) -> Result<(String, String), SyncError> {
    let root = session.root();
    if session.store.exists() {
        return Err(SyncError::give_up(
            "an operation is already in progress; run `weld finish` or `weld abort`",
        ));
    }
    if git::has_local_changes(root)? {
        return Err(SyncError::give_up(
            "the weld has uncommitted changes; commit or stash them first",
        ));
    }
    let branch = git::current_branch(root)?
        .ok_or_else(|| SyncError::give_up("the weld is on a detached HEAD; check out a branch"))?;
    if layout::is_working_branch(&branch) {
        return Err(SyncError::give_up(format!(
            "branch {branch} is reserved for weld operations; check out another branch"
        )));
    }
    let head = git::rev_parse(root, "HEAD")?;
    Ok((branch, head))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::SyncPoint;
    use crate::operation::SyncOptions;
    use weld_core::markers::EventVerb;

    fn state(auto: bool, grouping: Grouping) -> OperationState {
        let mut s = OperationState::new(
            OperationKind::PullStep,
            BaseName::from("lib"),
            SyncOptions {
                auto,
                grouping,
                ..SyncOptions::default()
            },
            SyncPoint {
                marker_commit: "abc".into(),
                verb: EventVerb::Init,
                base_commit: None,
                seams: vec![],
            },
            "main".into(),
            "abc".into(),
            "weld-pull-lib".into(),
        );
        s.stage = Stage::Replay;
        s.commits = vec!["c1".into(), "c2".into()];
        s
    }

    fn set(list: &[Verb]) -> BTreeSet<Verb> {
        list.iter().copied().collect()
    }

    #[test]
    fn every_pull_and_push_verb_has_a_handler() {
        for verb in Verb::ALL {
            assert!(handler(OperationKind::PullStep, verb).is_some(), "pull {verb}");
        }
        assert!(handler(OperationKind::PushStep, Verb::SeamAdjust).is_none());
        assert!(handler(OperationKind::PushStep, Verb::Finish).is_some());
    }

    #[test]
    fn structural_verbs_run_even_when_manual() {
        let s = state(false, Grouping::PerCommit);
        assert_eq!(
            pick_next(&s, &set(&[Verb::SeamAdjust, Verb::Abort, Verb::Inspect])),
            Some(Verb::SeamAdjust)
        );
        assert_eq!(pick_next(&s, &set(&[Verb::Step, Verb::Abort])), None);
    }

    #[test]
    fn unattended_commits_per_commit_but_steps_when_grouped() {
        let legal = set(&[Verb::Step, Verb::Commit, Verb::Abort]);
        assert_eq!(
            pick_next(&state(true, Grouping::PerCommit), &legal),
            Some(Verb::Commit)
        );
        assert_eq!(
            pick_next(&state(true, Grouping::Grouped), &legal),
            Some(Verb::Step)
        );

        let mut done = state(true, Grouping::Grouped);
        done.next_to_merge = 2;
        assert_eq!(
            pick_next(&done, &set(&[Verb::Commit, Verb::Abort])),
            Some(Verb::Commit)
        );
    }

    #[test]
    fn sanitise_runs_once_per_log() {
        let mut s = state(true, Grouping::PerCommit);
        let legal = set(&[Verb::Commit, Verb::Sanitise, Verb::Abort]);
        assert_eq!(pick_next(&s, &legal), Some(Verb::Sanitise));
        s.log_sanitised = true;
        assert_eq!(pick_next(&s, &legal), Some(Verb::Commit));
    }

    #[test]
    fn halted_operation_waits_for_the_operator() {
        let mut s = state(true, Grouping::Grouped);
        s.bad_patches = 1;
        let legal = set(&[Verb::Commit, Verb::Abort, Verb::Inspect]);
        assert_eq!(pick_next(&s, &legal), None);

        s.stage = Stage::InitialCommit;
        assert_eq!(pick_next(&s, &set(&[Verb::Commit, Verb::Abort])), None);
    }

    #[test]
    fn short_ids() {
        assert_eq!(short("0123456789abcdef"), "0123456789ab");
        assert_eq!(short("abc"), "abc");
    }
}
