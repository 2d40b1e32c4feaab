//! Pushing weld changes back into a base.
//!
//! The weld commits made since the base was last synchronised are replayed
//! onto `weld-push-<base>` in the mirror, branched from the base commit that
//! sync recorded. `finish` merges that branch into the mirror's tracking
//! branch and records a `Pushed` marker in the weld.

use std::path::Path;

use weld_core::markers::{self, escape_text, CommitData, SyncEvent};
use weld_core::seams::{classify, pathspec, strip_path_prefix};
use weld_core::{layout, BaseName};

use crate::bulk;
use crate::error::SyncError;
use crate::git::{self, CommitOptions, MergeResult};
use crate::history::{pull_sync_point, push_sync_point, sync_point_at};
use crate::mirror;
use crate::operation::{OperationKind, OperationState, SeamDir, Stage, Stepping, SyncOptions};
use crate::patch::{self, BadPatches, MarkerPolicy, PathMapping, Rewritten};
use crate::workflow::{self, short, Outcome, Session};

/// True when `message` records any event for `base`.
fn names_base(message: &str, base: &BaseName) -> Result<bool, SyncError> {
    Ok(markers::decode_events(message)?
        .iter()
        .filter_map(SyncEvent::data)
        .any(|d| &d.base == base))
}

fn touches_dests(root: &Path, commit: &str, dests: &[String]) -> Result<bool, SyncError> {
    let previous = match git::first_parent(root, commit)? {
        Some(p) => p,
        None => git::empty_tree(root)?,
    };
    Ok(git::changed_paths(root, &previous, commit)?
        .iter()
        .any(|p| dests.iter().any(|d| strip_path_prefix(p, d).is_some())))
}

/// Begin pushing `base`. Returns `Finished` without recording anything when
/// the weld has no changes for it.
pub fn start(session: &Session, base: &BaseName, options: SyncOptions) -> Result<Outcome, SyncError> {
    let declared = session.base(base)?;
    if declared.selector.is_pinned() {
        return Err(SyncError::give_up(format!(
            "base {base} is pinned to a tag or revision; only bases that follow a branch \
             can be pushed"
        )));
    }
    let (original_branch, original_head) = workflow::check_can_start(session)?;
    let root = session.root();

    let latest = pull_sync_point(root, base, false)?;
    let changes = classify(&latest.seams, &declared.seams);
    if latest.base_commit.is_some() && changes.has_structural_changes() {
        return Err(SyncError::give_up(format!(
            "the seams of base {base} changed since it was last synchronised; \
             run `weld pull {base}` first"
        )));
    }
    let dests: Vec<String> = declared.seams.iter().map(|s| s.dest.clone()).collect();

    // Edits replay onto the base commit of the last sync before the first of them.
    let mut sync_point = push_sync_point(root, base)?;
    let mut commits = Vec::new();
    for commit in git::rev_list_first_parent(root, Some(&sync_point.marker_commit), "HEAD")? {
        let message = git::commit_message(root, &commit)?;
        if names_base(&message, base)? {
            if commits.is_empty() {
                if let Some(point) = sync_point_at(&commit, &message, base)? {
                    sync_point = point;
                }
            }
            tracing::debug!("skipping {}: synchronisation commit", short(&commit));
            continue;
        }
        if !touches_dests(root, &commit, &dests)? {
            continue;
        }
        if sync_point.base_commit.is_none() {
            tracing::debug!("skipping {}: made before {base} was first pulled", short(&commit));
            continue;
        }
        commits.push(commit);
    }
    if sync_point.base_commit.is_none() {
        return Err(SyncError::give_up(format!(
            "base {base} has never been pulled into this weld; run `weld pull {base}` first"
        )));
    }
    if commits.is_empty() {
        return Ok(Outcome::Finished(format!(
            "nothing to push for base {base} since {} {}",
            sync_point.verb,
            short(&sync_point.marker_commit)
        )));
    }

    tracing::info!(
        "pushing {} weld commit(s) to {base} from {} at {}",
        commits.len(),
        sync_point.verb,
        short(&sync_point.marker_commit)
    );
    let mut state = OperationState::new(
        OperationKind::PushStep,
        base.clone(),
        options,
        sync_point,
        original_branch,
        original_head,
        layout::push_branch(base),
    );
    state.commits = commits;
    state.directories = changes.active().map(SeamDir::from).collect();
    workflow::begin(session, state)
}

fn mappings(dirs: &[SeamDir]) -> Vec<PathMapping> {
    dirs.iter()
        .map(|d| PathMapping {
            seam: d.seam.clone(),
            from: d.dest.clone(),
            to: d.source.clone(),
        })
        .collect()
}

pub fn checkout_sync(session: &Session, state: &mut OperationState) -> Result<Outcome, SyncError> {
    let base = session.base(&state.base)?;
    let mirror_dir = mirror::mirror_path(session.root(), base);
    state.base_original = mirror::snapshot(&mirror_dir)?;
    let head = mirror::sync(session.root(), base)?;

    let branch = head.branch.clone().ok_or_else(|| {
        SyncError::give_up(format!(
            "the mirror of base {} is not on a branch; nothing to push into",
            state.base
        ))
    })?;
    let from = state.sync_point.base_commit.clone().unwrap_or_default();
    if git::try_rev_parse(&mirror_dir, &from)?.is_none() {
        return Err(SyncError::give_up(format!(
            "base commit {} recorded by the last sync is not in the mirror of {}; \
             run `weld abort` then `weld pull {}`",
            short(&from),
            state.base,
            state.base
        )));
    }

    git::checkout_new_branch(&mirror_dir, &state.working_branch, &from)?;
    state.base_branch = Some(branch);
    state.target_head = Some(head.head);
    state.stage = Stage::Replay;
    Ok(Outcome::Progressed(format!(
        "replaying onto {} in the mirror of {}, from {}",
        state.working_branch,
        state.base,
        short(&from)
    )))
}

pub fn step(session: &Session, state: &mut OperationState) -> Result<Outcome, SyncError> {
    let root = session.root();
    let mirror = session.mirror(&state.base)?;
    BadPatches::new(root).clear()?;
    state.bad_patches = 0;

    if state.options.stepping == Stepping::Bulk {
        for commit in state.commits[state.next_to_merge..].to_vec() {
            state.push_log(&escape_text(&git::commit_message(root, &commit)?));
        }
        state.next_to_merge = state.commits.len();
        let mut changed = false;
        for dir in &state.directories {
            let report =
                bulk::sync_seam(root, &dir.dest, &mirror, &dir.source, MarkerPolicy::Unescape)?;
            changed |= report.changed();
        }
        return Ok(Outcome::Progressed(format!(
            "copied the weld into the mirror of {}{}",
            state.base,
            if changed { "" } else { " (no changes)" }
        )));
    }

    let commit = state
        .commits
        .get(state.next_to_merge)
        .cloned()
        .ok_or_else(|| SyncError::CorruptState("step past the last commit".into()))?;
    state.next_to_merge += 1;

    let previous = match git::first_parent(root, &commit)? {
        Some(p) => p,
        None => git::empty_tree(root)?,
    };
    let specs: Vec<String> = state.directories.iter().map(|d| pathspec(&d.dest)).collect();
    let diff = git::diff_range(root, &previous, &commit, &specs)?;
    let patch = match patch::rewrite(&diff, &mappings(&state.directories), MarkerPolicy::Unescape)
    {
        Rewritten::NothingToApply => {
            return Ok(Outcome::Progressed(format!("{}: nothing to apply", short(&commit))));
        }
        Rewritten::Patch(p) => p,
    };

    let report = patch::apply(
        &mirror,
        &patch,
        &BadPatches::new(root),
        state.options.ignore_bad_patches,
    )?;
    state.push_log(&escape_text(&git::commit_message(root, &commit)?));
    if report.halted() && !state.options.ignore_bad_patches {
        state.bad_patches = report.failed + report.deferred;
        return Ok(Outcome::Halted(format!(
            "{} patch section(s) of weld commit {} did not apply to base {}; they are saved \
             under .weld/bad-patches/. Apply them by hand in {}, then run `weld commit`",
            state.bad_patches,
            short(&commit),
            state.base,
            mirror.display()
        )));
    }
    Ok(Outcome::Progressed(format!(
        "applied weld commit {} to base {}",
        short(&commit),
        state.base
    )))
}

pub fn commit(session: &Session, state: &mut OperationState) -> Result<Outcome, SyncError> {
    let mirror = session.mirror(&state.base)?;
    let message = if state.pending_log.trim().is_empty() {
        format!("Changes from weld {}\n", session.weld.name)
    } else {
        state.pending_log.clone()
    };
    let specs: Vec<String> = state.directories.iter().map(|d| pathspec(&d.source)).collect();
    git::add_all(&mirror, &specs)?;
    let options = CommitOptions {
        all: true,
        allow_empty: state.is_halted(),
        edit: state.options.edit_commits,
        ..CommitOptions::default()
    };
    let id = git::commit(&mirror, session.identity.as_ref(), &message, options)?;
    state.pending_log.clear();
    state.log_sanitised = false;
    state.bad_patches = 0;
    state.last_committed = state.next_to_merge.checked_sub(1);
    Ok(Outcome::Progressed(format!("committed {} in the mirror", short(&id))))
}

fn pushed_event(state: &OperationState, head: &str) -> SyncEvent {
    SyncEvent::Pushed(CommitData {
        base: state.base.clone(),
        commit: head.to_string(),
        seams: state.seam_pairs(),
    })
}

/// Add the weld's `Pushed` commit unless `HEAD` already is one for `head`.
fn record_push(session: &Session, state: &OperationState, head: &str) -> Result<(), SyncError> {
    let root = session.root();
    let event = pushed_event(state, head);
    if markers::decode_events(&git::commit_message(root, "HEAD")?)?.contains(&event) {
        return Ok(());
    }
    let message = format!(
        "Weld: push to base {} at {}\n\n{}\n",
        state.base,
        short(head),
        markers::encode(&event)
    );
    let options = CommitOptions {
        allow_empty: true,
        ..CommitOptions::default()
    };
    git::commit(root, session.identity.as_ref(), &message, options)?;
    Ok(())
}

pub fn finish(session: &Session, state: &mut OperationState) -> Result<Outcome, SyncError> {
    let mirror = session.mirror(&state.base)?;
    let branch = state
        .base_branch
        .clone()
        .ok_or_else(|| SyncError::CorruptState("push without a base branch".into()))?;

    if state.finishing {
        if git::is_merge_in_progress(&mirror)? || git::has_local_changes(&mirror)? {
            return Ok(Outcome::Halted(format!(
                "the mirror of {} at {} is still mid-merge; resolve the conflicts, commit, \
                 then run `weld finish`",
                state.base,
                mirror.display()
            )));
        }
    } else {
        git::checkout(&mirror, &branch)?;
        let message = format!(
            "Merge changes from weld {} into {branch}\n",
            session.weld.name
        );
        let result = git::merge(
            &mirror,
            session.identity.as_ref(),
            &state.working_branch,
            &message,
            false,
        )?;
        if let MergeResult::Conflict { conflicting_files } = result {
            state.finishing = true;
            return Ok(Outcome::Halted(format!(
                "merging {} into {branch} in {} conflicted in: {}. Resolve them, `git add` the \
                 files, `git commit`, then run `weld finish`",
                state.working_branch,
                mirror.display(),
                conflicting_files.join(", ")
            )));
        }
    }

    let head = git::rev_parse(&mirror, "HEAD")?;
    if state.options.push_upstream {
        tracing::info!("pushing {branch} of base {} upstream", state.base);
        git::push(&mirror, "origin", &branch)?;
    }
    record_push(session, state, &head)?;
    if git::branch_exists(&mirror, &state.working_branch)? {
        git::delete_branch(&mirror, &state.working_branch)?;
    }
    BadPatches::new(session.root()).clear()?;
    Ok(Outcome::Finished(format!(
        "pushed {} weld commit(s) to base {} ({branch} at {})",
        state.commits.len(),
        state.base,
        short(&head)
    )))
}

pub fn abort(session: &Session, state: &mut OperationState) -> Result<Outcome, SyncError> {
    let mirror = session.mirror(&state.base)?;
    if mirror.join(".git").exists() {
        abort_in_mirror(&mirror, state)?;
    }
    BadPatches::new(session.root()).clear()?;
    Ok(Outcome::Aborted(format!(
        "aborted push to base {}; the weld was not changed",
        state.base
    )))
}

fn abort_in_mirror(mirror: &Path, state: &OperationState) -> Result<(), SyncError> {
    if git::is_merge_in_progress(mirror)? {
        git::merge_abort(mirror)?;
    }
    git::reset_hard(mirror, "HEAD")?;
    git::clean(mirror)?;
    match (&state.base_original, &state.base_branch) {
        (Some(original), _) => mirror::restore(mirror, original)?,
        (None, Some(branch)) => git::checkout(mirror, branch)?,
        (None, None) => {}
    }
    if git::branch_exists(mirror, &state.working_branch)? {
        git::delete_branch(mirror, &state.working_branch)?;
    }
    Ok(())
}
