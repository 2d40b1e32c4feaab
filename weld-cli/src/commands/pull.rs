//! `weld pull`: bring base changes into the weld.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;

use weld_core::{BaseName, CombineStyle};
use weld_sync::{pull, Outcome};

use super::{open_session, report, SyncFlags};

/// Arguments for `weld pull`.
#[derive(Args, Debug)]
pub struct PullArgs {
    /// Base to pull (omit when using `--all`).
    pub base: Option<String>,

    /// Pull every base in turn, stopping at the first that needs attention.
    #[arg(long, conflicts_with = "base")]
    pub all: bool,

    /// Rebase the working branch instead of merging it.
    #[arg(long)]
    pub rebase: bool,

    /// Start from the `Init` marker, ignoring later sync points.
    #[arg(long)]
    pub ignore_history: bool,

    #[command(flatten)]
    pub flags: SyncFlags,
}

impl PullArgs {
    pub fn run(self, root: Option<&Path>) -> Result<ExitCode> {
        let session = open_session(root)?;
        let mut options = self.flags.options(&session);
        options.ignore_history = self.ignore_history;
        if self.rebase {
            options.combine = CombineStyle::Rebase;
        }

        let bases: Vec<BaseName> = if self.all {
            session.weld.bases.keys().cloned().collect()
        } else {
            let name = self.base.context("provide a base name or use --all")?;
            vec![BaseName::from(name)]
        };
        if bases.is_empty() {
            println!("The manifest declares no bases.");
            return Ok(ExitCode::SUCCESS);
        }

        for base in &bases {
            let outcome = pull::start(&session, base, options.clone())
                .with_context(|| format!("pull failed for '{base}'"))?;
            let code = report(&outcome);
            if !matches!(outcome, Outcome::Finished(_)) {
                return Ok(code);
            }
        }
        Ok(ExitCode::SUCCESS)
    }
}
