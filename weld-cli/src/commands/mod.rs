pub mod pull;
pub mod push;
pub mod status;
pub mod verbs;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use weld_core::manifest;
use weld_sync::{Grouping, Outcome, Session, Stepping, SyncOptions};

/// Exit status when an operation halts for the operator.
const HALTED: u8 = 2;

/// Open the weld at `root`, or the one enclosing the current directory.
pub fn open_session(root: Option<&Path>) -> Result<Session> {
    let root: PathBuf = match root {
        Some(r) => std::path::absolute(r)
            .with_context(|| format!("could not resolve {}", r.display()))?,
        None => {
            let cwd = std::env::current_dir().context("could not read the current directory")?;
            manifest::find_root(&cwd)?
        }
    };
    tracing::debug!("weld root: {}", root.display());
    Session::open(&root).with_context(|| format!("failed to open weld at {}", root.display()))
}

/// Print an outcome and turn it into the process exit status.
pub fn report(outcome: &Outcome) -> ExitCode {
    match outcome {
        Outcome::Halted(msg) => {
            eprintln!("{} {msg}", "!".yellow().bold());
            ExitCode::from(HALTED)
        }
        Outcome::Progressed(msg) => {
            println!("{msg}");
            ExitCode::SUCCESS
        }
        Outcome::Finished(msg) | Outcome::Aborted(msg) => {
            println!("{} {msg}", "✓".green());
            ExitCode::SUCCESS
        }
    }
}

/// Flags shared by `pull` and `push`.
#[derive(Args, Debug, Default)]
pub struct SyncFlags {
    /// Copy each seam's tree in one step instead of replaying commit by commit.
    #[arg(long)]
    pub bulk: bool,

    /// Stop after every step and wait for `weld step`, `commit` or `finish`.
    #[arg(long)]
    pub manual: bool,

    /// Keep stepping over uncommitted changes and commit once at the end.
    #[arg(long)]
    pub grouped: bool,

    /// Open an editor on every commit message.
    #[arg(long)]
    pub edit: bool,

    /// Record patch sections that do not apply and keep going.
    #[arg(long)]
    pub ignore_bad_patches: bool,

    /// Script run over the replayed changes before each commit.
    #[arg(long, value_name = "SCRIPT")]
    pub sanitise: Option<PathBuf>,
}

impl SyncFlags {
    /// Options for a new operation: flags first, then manifest settings.
    pub fn options(&self, session: &Session) -> SyncOptions {
        SyncOptions {
            stepping: if self.bulk {
                Stepping::Bulk
            } else {
                Stepping::Stepwise
            },
            grouping: if self.grouped {
                Grouping::Grouped
            } else {
                Grouping::PerCommit
            },
            combine: session.settings.combine.unwrap_or_default(),
            edit_commits: self.edit,
            ignore_bad_patches: self.ignore_bad_patches,
            sanitise_script: self
                .sanitise
                .as_ref()
                .map(|p| std::path::absolute(p).unwrap_or_else(|_| p.clone()))
                .or_else(|| session.default_sanitise_script()),
            auto: !self.manual,
            push_upstream: false,
            ignore_history: false,
        }
    }
}
