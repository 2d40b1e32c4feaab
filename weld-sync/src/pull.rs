//! Pulling a base's history into the weld.
//!
//! ```text
//! start ─▶ checkout-sync ─▶ seam-adjust ─▶ [initial-commit] ─▶ (step ─▶ commit)* ─▶ finish
//! ```
//!
//! All replay happens on `weld-pull-<base>`, branched from the weld commit
//! that recorded the previous sync. `finish` folds it back into the branch
//! the operator started from.

use std::path::Path;

use weld_core::markers::{self, escape_text, CommitData, SyncEvent};
use weld_core::seams::{classify, pathspec, strip_path_prefix};
use weld_core::{layout, BaseName, CombineStyle, SeamPair};

use crate::bulk;
use crate::error::SyncError;
use crate::git::{self, CommitOptions, MergeResult};
use crate::history::pull_sync_point;
use crate::mirror;
use crate::operation::{OperationKind, OperationState, SeamDir, Stage, Stepping, SyncOptions};
use crate::patch::{self, BadPatches, MarkerPolicy, PathMapping, Rewritten};
use crate::workflow::{self, short, Outcome, Session};

/// Begin pulling `base` and drive the operation as far as `options` allow.
pub fn start(session: &Session, base: &BaseName, options: SyncOptions) -> Result<Outcome, SyncError> {
    session.base(base)?;
    let (original_branch, original_head) = workflow::check_can_start(session)?;
    let sync_point = pull_sync_point(session.root(), base, options.ignore_history)?;
    tracing::info!(
        "pulling {base} from {} at {}",
        sync_point.verb,
        short(&sync_point.marker_commit)
    );
    let state = OperationState::new(
        OperationKind::PullStep,
        base.clone(),
        options,
        sync_point,
        original_branch,
        original_head,
        layout::pull_branch(base),
    );
    workflow::begin(session, state)
}

fn mappings(dirs: &[SeamDir]) -> Vec<PathMapping> {
    dirs.iter()
        .map(|d| PathMapping {
            seam: d.seam.clone(),
            from: d.source.clone(),
            to: d.dest.clone(),
        })
        .collect()
}

fn source_specs(dirs: &[SeamDir]) -> Vec<String> {
    dirs.iter().map(|d| pathspec(&d.source)).collect()
}

fn dest_specs(dirs: &[SeamDir]) -> Vec<String> {
    dirs.iter().map(|d| pathspec(&d.dest)).collect()
}

fn halt_message(state: &OperationState, commit: &str, report: &patch::ApplyReport) -> String {
    format!(
        "{} patch section(s) from {} of base {} did not apply ({} failed, {} not attempted); \
         they are saved under .weld/bad-patches/. Apply them by hand, then run `weld commit`; \
         `weld abort` rolls the pull back",
        report.failed + report.deferred,
        short(commit),
        state.base,
        report.failed,
        report.deferred
    )
}

/// Rewrite and apply the base diff `from..to` for `dirs` into the weld.
fn replay_diff(
    session: &Session,
    mirror: &Path,
    from: &str,
    to: &str,
    dirs: &[SeamDir],
    ignore_bad_patches: bool,
) -> Result<Option<patch::ApplyReport>, SyncError> {
    let diff = git::diff_range(mirror, from, to, &source_specs(dirs))?;
    match patch::rewrite(&diff, &mappings(dirs), MarkerPolicy::Escape) {
        Rewritten::NothingToApply => Ok(None),
        Rewritten::Patch(p) => {
            let sink = BadPatches::new(session.root());
            Ok(Some(patch::apply(session.root(), &p, &sink, ignore_bad_patches)?))
        }
    }
}

// ---------------------------------------------------------------------------
// Verbs
// ---------------------------------------------------------------------------

pub fn checkout_sync(session: &Session, state: &mut OperationState) -> Result<Outcome, SyncError> {
    let base = session.base(&state.base)?;
    let mirror_dir = mirror::mirror_path(session.root(), base);
    state.base_original = mirror::snapshot(&mirror_dir)?;
    let head = mirror::sync(session.root(), base)?;
    state.target_head = Some(head.head.clone());

    let changes = classify(&state.sync_point.seams, &base.seams);
    state.seam_added = changes.added.iter().map(|s| s.pair()).collect();
    state.seam_deleted = changes.deleted.clone();
    state.directories = changes.active().map(SeamDir::from).collect();

    let from = match &state.sync_point.base_commit {
        Some(c) if git::try_rev_parse(&mirror_dir, c)?.is_some() => Some(c.clone()),
        Some(c) => {
            tracing::warn!(
                "previous base commit {} is not in the mirror; replaying the head only",
                short(c)
            );
            None
        }
        None => None,
    };

    if from.as_deref() == Some(head.head.as_str()) && !changes.has_structural_changes() {
        return Ok(Outcome::Finished(format!(
            "base {} is already up to date at {}",
            state.base,
            short(&head.head)
        )));
    }

    state.commits = match (&from, state.options.stepping) {
        (Some(from), Stepping::Stepwise) => {
            git::rev_list_first_parent(&mirror_dir, Some(from), &head.head)?
        }
        _ => vec![head.head.clone()],
    };
    state.sync_point.base_commit = from;
    state.stage = Stage::SeamAdjust;
    Ok(Outcome::Progressed(format!(
        "{} commit(s) of base {} to replay up to {}",
        state.commits.len(),
        state.base,
        short(&head.head)
    )))
}

pub fn seam_adjust(session: &Session, state: &mut OperationState) -> Result<Outcome, SyncError> {
    let root = session.root();
    let marker = state.sync_point.marker_commit.clone();

    let added: Vec<SeamDir> = state
        .directories
        .iter()
        .filter(|d| state.seam_added.contains(&d.pair()))
        .cloned()
        .collect();
    for dir in &added {
        let tracked = git::run_git_stdout(
            root,
            &["ls-tree", "-r", "--name-only", &marker, "--", &pathspec(&dir.dest)],
        )?;
        if !tracked.is_empty() {
            return Err(SyncError::give_up(format!(
                "seam {} would be added at {}, which already holds tracked files in {}; \
                 move them away or pick another dest, then run `weld abort` and pull again",
                dir.seam,
                dir.dest,
                short(&marker)
            )));
        }
    }

    git::checkout_new_branch(root, &state.working_branch, &marker)?;

    if !state.seam_deleted.is_empty() {
        let dests: Vec<String> = state.seam_deleted.iter().map(|p| pathspec(&p.dest)).collect();
        tracing::info!("removing deleted seam destinations: {}", dests.join(", "));
        git::remove_paths(root, &dests)?;
    }

    if state.options.stepping == Stepping::Stepwise && !added.is_empty() {
        if let Some(from) = state.sync_point.base_commit.clone() {
            let mirror = session.mirror(&state.base)?;
            let empty = git::empty_tree(&mirror)?;
            BadPatches::new(root).clear()?;
            if let Some(report) = replay_diff(
                session,
                &mirror,
                &empty,
                &from,
                &added,
                state.options.ignore_bad_patches,
            )? {
                if report.halted() && !state.options.ignore_bad_patches {
                    state.bad_patches = report.failed + report.deferred;
                    state.stage = Stage::InitialCommit;
                    return Ok(Outcome::Halted(halt_message(state, &from, &report)));
                }
            }
        }
    }

    let structural = !state.seam_added.is_empty() || !state.seam_deleted.is_empty();
    state.stage = if structural || git::has_local_changes(root)? {
        Stage::InitialCommit
    } else {
        Stage::Replay
    };
    Ok(Outcome::Progressed(format!(
        "on {}: {} seam(s) added, {} deleted",
        state.working_branch,
        state.seam_added.len(),
        state.seam_deleted.len()
    )))
}

pub fn initial_commit(session: &Session, state: &mut OperationState) -> Result<Outcome, SyncError> {
    let root = session.root();
    let commit = state
        .sync_point
        .base_commit
        .clone()
        .or_else(|| state.target_head.clone())
        .unwrap_or_default();
    let data = |seams: &[SeamPair]| CommitData {
        base: state.base.clone(),
        commit: commit.clone(),
        seams: seams.to_vec(),
    };

    let mut message = format!("Weld: adjust seams of base {}\n\n", state.base);
    if !state.seam_added.is_empty() {
        message.push_str(&markers::encode(&SyncEvent::SeamAdded(data(&state.seam_added))));
        message.push('\n');
    }
    if !state.seam_deleted.is_empty() {
        message.push_str(&markers::encode(&SyncEvent::SeamDeleted(data(&state.seam_deleted))));
        message.push('\n');
    }

    git::add_all(root, &dest_specs(&state.directories))?;
    let options = CommitOptions {
        all: true,
        allow_empty: true,
        ..CommitOptions::default()
    };
    let id = git::commit(root, session.identity.as_ref(), &message, options)?;
    state.bad_patches = 0;
    state.stage = Stage::Replay;
    Ok(Outcome::Progressed(format!("committed seam changes as {}", short(&id))))
}

/// Bulk replay: make every active dest match the mirror's checked-out tree.
fn copy_tree(
    session: &Session,
    state: &mut OperationState,
    mirror: &Path,
    commit: &str,
    message: &str,
) -> Result<Outcome, SyncError> {
    let mut changed = false;
    for dir in &state.directories {
        let report =
            bulk::sync_seam(mirror, &dir.source, session.root(), &dir.dest, MarkerPolicy::Escape)?;
        changed |= report.changed();
    }
    if changed {
        state.push_log(&escape_text(message));
    }
    Ok(Outcome::Progressed(format!(
        "synchronised base {} at {}{}",
        state.base,
        short(commit),
        if changed { "" } else { " (no changes)" }
    )))
}

pub fn step(session: &Session, state: &mut OperationState) -> Result<Outcome, SyncError> {
    let root = session.root();
    let mirror = session.mirror(&state.base)?;
    let index = state.next_to_merge;
    let commit = state
        .commits
        .get(index)
        .cloned()
        .ok_or_else(|| SyncError::CorruptState("step past the last commit".into()))?;

    BadPatches::new(root).clear()?;
    state.bad_patches = 0;
    state.next_to_merge += 1;

    let message = git::commit_message(&mirror, &commit)?;
    let previous = match index {
        0 => state.sync_point.base_commit.clone(),
        i => Some(state.commits[i - 1].clone()),
    };

    // Without a previous base commit there is nothing to diff against, so the
    // first import copies the tree.
    let previous = match previous {
        Some(p) if state.options.stepping == Stepping::Stepwise => p,
        _ => return copy_tree(session, state, &mirror, &commit, &message),
    };

    let touched = git::changed_paths(&mirror, &previous, &commit)?;
    let in_seam = touched.iter().any(|path| {
        state
            .directories
            .iter()
            .any(|d| strip_path_prefix(path, &d.source).is_some())
    });
    if !in_seam {
        return Ok(Outcome::Progressed(format!(
            "skipped {}: touches no seam of base {}",
            short(&commit),
            state.base
        )));
    }

    let report = replay_diff(
        session,
        &mirror,
        &previous,
        &commit,
        &state.directories,
        state.options.ignore_bad_patches,
    )?;
    let Some(report) = report else {
        return Ok(Outcome::Progressed(format!(
            "{}: nothing to apply",
            short(&commit)
        )));
    };

    state.push_log(&escape_text(&message));
    if report.halted() && !state.options.ignore_bad_patches {
        state.bad_patches = report.failed + report.deferred;
        return Ok(Outcome::Halted(halt_message(state, &commit, &report)));
    }
    let mut summary = format!(
        "applied {} from base {} ({} file(s))",
        short(&commit),
        state.base,
        report.applied + report.deleted_directly
    );
    if report.failed > 0 {
        summary.push_str(&format!(", ignored {} bad patch section(s)", report.failed));
    }
    Ok(Outcome::Progressed(summary))
}

pub fn commit(session: &Session, state: &mut OperationState) -> Result<Outcome, SyncError> {
    if state.stage == Stage::InitialCommit {
        return initial_commit(session, state);
    }
    let root = session.root();
    let ported = state
        .next_to_merge
        .checked_sub(1)
        .and_then(|i| state.commits.get(i))
        .cloned()
        .or_else(|| state.target_head.clone())
        .unwrap_or_default();

    let mut message = if state.pending_log.trim().is_empty() {
        format!("Weld: port changes from base {}\n", state.base)
    } else {
        state.pending_log.clone()
    };
    message.push('\n');
    message.push_str(&markers::encode(&SyncEvent::PortedCommit(CommitData {
        base: state.base.clone(),
        commit: ported,
        seams: state.seam_pairs(),
    })));
    message.push('\n');

    git::add_all(root, &dest_specs(&state.directories))?;
    // A halted step may have been resolved by dropping its sections entirely.
    let options = CommitOptions {
        all: true,
        allow_empty: state.is_halted(),
        edit: state.options.edit_commits,
        ..CommitOptions::default()
    };
    let id = git::commit(root, session.identity.as_ref(), &message, options)?;

    state.pending_log.clear();
    state.log_sanitised = false;
    state.bad_patches = 0;
    state.last_committed = state.next_to_merge.checked_sub(1);
    Ok(Outcome::Progressed(format!("committed {}", short(&id))))
}

fn merged_message(state: &OperationState) -> String {
    let head = state.target_head.clone().unwrap_or_default();
    let label = short(&head).to_string();
    format!(
        "Weld: merge base {} at {label}\n\n{}\n",
        state.base,
        markers::encode(&SyncEvent::Merged(CommitData {
            base: state.base.clone(),
            commit: head,
            seams: state.seam_pairs(),
        }))
    )
}

/// True when `HEAD` already records this pull's `Merged` marker.
fn head_records_merge(root: &Path, state: &OperationState) -> Result<bool, SyncError> {
    let message = git::commit_message(root, "HEAD")?;
    Ok(markers::decode_events(&message)?.iter().any(|e| {
        matches!(e, SyncEvent::Merged(d)
            if d.base == state.base && Some(&d.commit) == state.target_head.as_ref())
    }))
}

fn record_merge(session: &Session, state: &OperationState) -> Result<(), SyncError> {
    let root = session.root();
    if head_records_merge(root, state)? {
        return Ok(());
    }
    let options = CommitOptions {
        allow_empty: true,
        ..CommitOptions::default()
    };
    git::commit(root, session.identity.as_ref(), &merged_message(state), options)?;
    Ok(())
}

fn cleanup(session: &Session, state: &OperationState) -> Result<Outcome, SyncError> {
    let root = session.root();
    if git::branch_exists(root, &state.working_branch)? {
        git::delete_branch(root, &state.working_branch)?;
    }
    BadPatches::new(root).clear()?;
    let head = git::rev_parse(root, "HEAD")?;
    Ok(Outcome::Finished(format!(
        "pulled base {} at {} into {} ({})",
        state.base,
        short(state.target_head.as_deref().unwrap_or_default()),
        state.original_branch,
        short(&head)
    )))
}

pub fn finish(session: &Session, state: &mut OperationState) -> Result<Outcome, SyncError> {
    let root = session.root();

    if state.finishing {
        if git::is_merge_in_progress(root)? || git::is_rebase_in_progress(root)? {
            return Ok(Outcome::Halted(
                "the weld is still mid-merge; resolve the conflicts and commit \
                 (or `git rebase --continue`), then run `weld finish`"
                    .into(),
            ));
        }
        if git::has_local_changes(root)? {
            return Ok(Outcome::Halted(
                "the weld has uncommitted changes; commit the resolution, then run `weld finish`"
                    .into(),
            ));
        }
        if state.options.combine == CombineStyle::Rebase {
            git::checkout(root, &state.original_branch)?;
            git::merge_ff_only(root, &state.working_branch)?;
        }
        record_merge(session, state)?;
        return cleanup(session, state);
    }

    match state.options.combine {
        CombineStyle::Merge => {
            git::checkout(root, &state.original_branch)?;
            let result = git::merge(
                root,
                session.identity.as_ref(),
                &state.working_branch,
                &merged_message(state),
                true,
            )?;
            if let MergeResult::Conflict { conflicting_files } = result {
                state.finishing = true;
                return Ok(Outcome::Halted(format!(
                    "merging {} into {} conflicted in: {}. Resolve them, `git add` the files, \
                     `git commit` keeping the X-Weld-State line, then run `weld finish`",
                    state.working_branch,
                    state.original_branch,
                    conflicting_files.join(", ")
                )));
            }
        }
        CombineStyle::Rebase => {
            git::checkout(root, &state.working_branch)?;
            if !git::rebase(root, session.identity.as_ref(), &state.original_branch)? {
                state.finishing = true;
                return Ok(Outcome::Halted(format!(
                    "rebasing {} onto {} stopped on conflicts in: {}. Resolve them, `git add` \
                     the files, `git rebase --continue`, then run `weld finish`",
                    state.working_branch,
                    state.original_branch,
                    git::conflicting_files(root)?.join(", ")
                )));
            }
            git::checkout(root, &state.original_branch)?;
            git::merge_ff_only(root, &state.working_branch)?;
        }
    }
    record_merge(session, state)?;
    cleanup(session, state)
}

pub fn abort(session: &Session, state: &mut OperationState) -> Result<Outcome, SyncError> {
    let root = session.root();
    if git::is_merge_in_progress(root)? {
        git::merge_abort(root)?;
    }
    if git::is_rebase_in_progress(root)? {
        git::rebase_abort(root)?;
    }
    git::reset_hard(root, "HEAD")?;
    git::clean(root)?;
    git::checkout(root, &state.original_branch)?;
    git::reset_hard(root, &state.original_head)?;
    if git::branch_exists(root, &state.working_branch)? {
        git::delete_branch(root, &state.working_branch)?;
    }

    if let Some(original) = &state.base_original {
        mirror::restore(&session.mirror(&state.base)?, original)?;
    }
    BadPatches::new(root).clear()?;
    Ok(Outcome::Aborted(format!(
        "aborted pull of base {}; {} is back at {}",
        state.base,
        state.original_branch,
        short(&state.original_head)
    )))
}
