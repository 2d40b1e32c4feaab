//! Verbs acting on the operation in progress.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};

use weld_sync::{workflow, Outcome, Verb};

use super::{open_session, report};

pub fn run(root: Option<&Path>, verb: Verb) -> Result<ExitCode> {
    let session = open_session(root)?;
    let outcome =
        workflow::invoke(&session, verb).with_context(|| format!("`weld {verb}` failed"))?;
    let code = report(&outcome);

    // An unattended operation carries on after a manual verb.
    if let Outcome::Progressed(_) = outcome {
        if verb != Verb::Inspect && session.store.exists() {
            return report_drive(&session);
        }
    }
    Ok(code)
}

/// `weld continue`.
pub fn resume(root: Option<&Path>) -> Result<ExitCode> {
    let session = open_session(root)?;
    if !session.store.exists() {
        anyhow::bail!("no weld operation is in progress");
    }
    report_drive(&session)
}

fn report_drive(session: &weld_sync::Session) -> Result<ExitCode> {
    let outcome = workflow::drive(session).context("`weld continue` failed")?;
    Ok(report(&outcome))
}
