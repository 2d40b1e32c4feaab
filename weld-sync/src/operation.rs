//! The durable record of an in-progress pull or push.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use weld_core::{BaseName, CombineStyle, Seam, SeamName, SeamPair};

use crate::history::SyncPoint;
use crate::mirror::MirrorHead;

/// Bumped whenever [`OperationState`] changes shape.
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    PullStep,
    PushStep,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::PullStep => "pull_step",
            OperationKind::PushStep => "push_step",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pull_step" => Ok(OperationKind::PullStep),
            "push_step" => Ok(OperationKind::PushStep),
            other => Err(format!("unknown operation kind {other:?}")),
        }
    }
}

/// A named action on an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verb {
    CheckoutSync,
    SeamAdjust,
    InitialCommit,
    Step,
    Commit,
    Sanitise,
    Inspect,
    Finish,
    Abort,
}

impl Verb {
    pub const ALL: [Verb; 9] = [
        Verb::CheckoutSync,
        Verb::SeamAdjust,
        Verb::InitialCommit,
        Verb::Step,
        Verb::Commit,
        Verb::Sanitise,
        Verb::Inspect,
        Verb::Finish,
        Verb::Abort,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Verb::CheckoutSync => "checkout-sync",
            Verb::SeamAdjust => "seam-adjust",
            Verb::InitialCommit => "initial-commit",
            Verb::Step => "step",
            Verb::Commit => "commit",
            Verb::Sanitise => "sanitise",
            Verb::Inspect => "inspect",
            Verb::Finish => "finish",
            Verb::Abort => "abort",
        }
    }

    /// Verbs the driver runs without being asked.
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            Verb::CheckoutSync | Verb::SeamAdjust | Verb::InitialCommit
        )
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Verb::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| format!("unknown verb {s:?}"))
    }
}

/// Where an operation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    CheckoutSync,
    SeamAdjust,
    InitialCommit,
    Replay,
}

/// How much base history one step replays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stepping {
    /// One commit per step, by patch.
    #[default]
    Stepwise,
    /// A single whole-tree copy of the head.
    Bulk,
}

/// How replayed commits are grouped into weld commits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    /// One commit for every replayed commit.
    #[default]
    PerCommit,
    /// Step over uncommitted changes; one commit at the end.
    Grouped,
}

/// Command options captured when the operation starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    pub stepping: Stepping,
    pub grouping: Grouping,
    pub combine: CombineStyle,
    pub edit_commits: bool,
    pub ignore_bad_patches: bool,
    pub sanitise_script: Option<PathBuf>,
    /// Run step/commit/finish without waiting for the operator.
    pub auto: bool,
    /// Push the base branch to its remote after a push finishes.
    pub push_upstream: bool,
    /// Start a pull from `Init`, whatever later markers say.
    pub ignore_history: bool,
}

/// One active seam's directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeamDir {
    pub seam: SeamName,
    pub source: String,
    pub dest: String,
}

impl From<&Seam> for SeamDir {
    fn from(seam: &Seam) -> Self {
        SeamDir {
            seam: seam.name.clone(),
            source: seam.source.clone(),
            dest: seam.dest.clone(),
        }
    }
}

impl SeamDir {
    pub fn pair(&self) -> SeamPair {
        SeamPair::new(self.source.clone(), self.dest.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationState {
    pub version: u32,
    pub kind: OperationKind,
    pub base: BaseName,
    pub options: SyncOptions,
    pub started_at: DateTime<Utc>,
    pub stage: Stage,

    pub original_branch: String,
    pub original_head: String,
    /// `weld-pull-<base>` in the weld, or `weld-push-<base>` in the mirror.
    pub working_branch: String,

    /// Mirror position before the operation touched it.
    pub base_original: Option<MirrorHead>,
    /// Branch of the mirror a push merges into.
    pub base_branch: Option<String>,

    pub sync_point: SyncPoint,
    /// Base head being pulled, or base head a push started from.
    pub target_head: Option<String>,

    /// Commits to replay, oldest first.
    pub commits: Vec<String>,
    pub next_to_merge: usize,
    pub last_committed: Option<usize>,
    pub pending_log: String,
    pub log_sanitised: bool,

    pub seam_added: Vec<SeamPair>,
    pub seam_deleted: Vec<SeamPair>,
    pub directories: Vec<SeamDir>,

    /// Failed plus deferred sections of the last step.
    pub bad_patches: usize,
    /// A finishing merge or rebase stopped on conflicts.
    pub finishing: bool,
}

impl OperationState {
    pub fn new(
        kind: OperationKind,
        base: BaseName,
        options: SyncOptions,
        sync_point: SyncPoint,
        original_branch: String,
        original_head: String,
        working_branch: String,
    ) -> Self {
        OperationState {
            version: STATE_VERSION,
            kind,
            base,
            options,
            started_at: Utc::now(),
            stage: Stage::CheckoutSync,
            original_branch,
            original_head,
            working_branch,
            base_original: None,
            base_branch: None,
            sync_point,
            target_head: None,
            commits: Vec::new(),
            next_to_merge: 0,
            last_committed: None,
            pending_log: String::new(),
            log_sanitised: false,
            seam_added: Vec::new(),
            seam_deleted: Vec::new(),
            directories: Vec::new(),
            bad_patches: 0,
            finishing: false,
        }
    }

    pub fn commits_remaining(&self) -> usize {
        self.commits.len().saturating_sub(self.next_to_merge)
    }

    pub fn is_halted(&self) -> bool {
        self.bad_patches > 0
    }

    pub fn seam_pairs(&self) -> Vec<SeamPair> {
        self.directories.iter().map(SeamDir::pair).collect()
    }

    /// Append one replayed commit message to the pending log.
    pub fn push_log(&mut self, entry: &str) {
        if !self.pending_log.is_empty() {
            self.pending_log.push('\n');
        }
        self.pending_log.push_str(entry.trim_end());
        self.pending_log.push('\n');
        self.log_sanitised = false;
    }
}
