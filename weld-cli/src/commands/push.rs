//! `weld push`: send weld changes back to a base.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;

use weld_core::BaseName;
use weld_sync::push;

use super::{open_session, report, SyncFlags};

/// Arguments for `weld push`.
#[derive(Args, Debug)]
pub struct PushArgs {
    /// Base to push to.
    pub base: String,

    /// Also push the base branch to the base's origin once finished.
    #[arg(long)]
    pub upstream: bool,

    #[command(flatten)]
    pub flags: SyncFlags,
}

impl PushArgs {
    pub fn run(self, root: Option<&Path>) -> Result<ExitCode> {
        let session = open_session(root)?;
        let mut options = self.flags.options(&session);
        options.push_upstream = self.upstream;

        let base = BaseName::from(self.base);
        let outcome = push::start(&session, &base, options)
            .with_context(|| format!("push failed for '{base}'"))?;
        Ok(report(&outcome))
    }
}
