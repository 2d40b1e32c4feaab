//! Running the operator's sanitise script over pending changes.
//!
//! The script runs in the repository the operation writes to, with:
//!
//! | variable           | value                                          |
//! |--------------------|------------------------------------------------|
//! | `WELD_BASE`        | base name                                      |
//! | `WELD_LOG_FILE`    | file holding the pending commit log; editable  |
//! | `WELD_DIRECTORIES` | affected directories, one per line             |
//!
//! Whatever the script leaves in `WELD_LOG_FILE` becomes the pending log.

use std::path::Path;
use std::process::Command;

use weld_core::BaseName;

use crate::error::{io_err, SyncError};
use crate::operation::{OperationKind, OperationState};
use crate::workflow::{Outcome, Session};

const LOG_FILE: &str = "sanitise-log.txt";

/// Run `script` in `workdir` and return the log it leaves behind.
pub fn run_script(
    script: &Path,
    workdir: &Path,
    state_dir: &Path,
    base: &BaseName,
    directories: &[String],
    log: &str,
) -> Result<String, SyncError> {
    std::fs::create_dir_all(state_dir).map_err(|e| io_err(state_dir, e))?;
    let log_path = state_dir.join(LOG_FILE);
    std::fs::write(&log_path, log).map_err(|e| io_err(&log_path, e))?;

    tracing::info!("running sanitise script {}", script.display());
    let status = Command::new(script)
        .current_dir(workdir)
        .env("WELD_BASE", &base.0)
        .env("WELD_LOG_FILE", &log_path)
        .env("WELD_DIRECTORIES", directories.join("\n"))
        .status()
        .map_err(|e| io_err(script, e))?;

    let result = std::fs::read_to_string(&log_path).map_err(|e| io_err(&log_path, e));
    let _ = std::fs::remove_file(&log_path);
    if !status.success() {
        return Err(SyncError::give_up(format!(
            "sanitise script {} failed ({status}); fix the changes by hand or the script, \
             then run `weld sanitise` again",
            script.display()
        )));
    }
    result
}

/// The `sanitise` verb.
pub fn sanitise_log(session: &Session, state: &mut OperationState) -> Result<Outcome, SyncError> {
    let script = state
        .options
        .sanitise_script
        .clone()
        .ok_or_else(|| SyncError::give_up("no sanitise script is configured"))?;
    let directories: Vec<String> = state
        .directories
        .iter()
        .map(|d| match state.kind {
            OperationKind::PullStep => d.dest.clone(),
            OperationKind::PushStep => d.source.clone(),
        })
        .collect();
    let workdir = session.workdir(state)?;
    state.pending_log = run_script(
        &script,
        &workdir,
        session.store.dir(),
        &state.base,
        &directories,
        &state.pending_log,
    )?;
    state.log_sanitised = true;
    Ok(Outcome::Progressed(format!(
        "sanitised {} director(ies) of base {}",
        directories.len(),
        state.base
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("sanitise.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn script_sees_environment_and_rewrites_log() {
        let tmp = TempDir::new().unwrap();
        let script = script(
            tmp.path(),
            r#"printf '%s|%s\n' "$WELD_BASE" "$WELD_DIRECTORIES" >> "$WELD_LOG_FILE""#,
        );
        let log = run_script(
            &script,
            tmp.path(),
            &tmp.path().join("state"),
            &BaseName::from("lib"),
            &["vendor".to_string()],
            "original\n",
        )
        .unwrap();
        assert_eq!(log, "original\nlib|vendor\n");
        assert!(!tmp.path().join("state").join(LOG_FILE).exists());
    }

    #[cfg(unix)]
    #[test]
    fn failing_script_gives_up() {
        let tmp = TempDir::new().unwrap();
        let script = script(tmp.path(), "exit 3");
        let err = run_script(
            &script,
            tmp.path(),
            &tmp.path().join("state"),
            &BaseName::from("lib"),
            &[],
            "",
        )
        .unwrap_err();
        assert!(err.is_user_error());
    }
}
