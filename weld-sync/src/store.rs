//! Crash-safe persistence of the operation state and its legal verbs.
//!
//! # Storage layout
//!
//! ```text
//! <weld>/.weld/state/
//!   operation.json        (versioned OperationState)
//!   operation.json.tmp    (only while a commit is in flight)
//!   verbs/<verb>          (one file per legal verb, content `<kind>:<verb>`)
//!   verbs.pending/        (the next verb set, staged)
//!   verbs.old/            (the previous verb set, during promotion)
//! ```
//!
//! # Commit protocol
//!
//! 1. Write `operation.json.tmp`.
//! 2. Build `verbs.pending/`.
//! 3. Rename the temp file over `operation.json`. This is the commit point.
//! 4. Promote: `verbs/` → `verbs.old/`, `verbs.pending/` → `verbs/`, drop
//!    `verbs.old/`.
//!
//! [`Store::recover`] rolls an interrupted commit back (before step 3) or
//! forward (after it).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use weld_core::layout;

use crate::error::{io_err, SyncError};
use crate::operation::{OperationKind, OperationState, Verb, STATE_VERSION};

const OPERATION_FILE: &str = "operation.json";
const OPERATION_TMP: &str = "operation.json.tmp";
const VERBS_DIR: &str = "verbs";
const PENDING_DIR: &str = "verbs.pending";
const OLD_DIR: &str = "verbs.old";

#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

fn remove_dir_if_exists(path: &Path) -> Result<(), SyncError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path, e)),
    }
}

fn rename(from: &Path, to: &Path) -> Result<(), SyncError> {
    std::fs::rename(from, to).map_err(|e| io_err(from, e))
}

impl Store {
    pub fn new(weld_root: &Path) -> Self {
        Self {
            dir: layout::state_dir(weld_root),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn operation_path(&self) -> PathBuf {
        self.dir.join(OPERATION_FILE)
    }

    fn tmp_path(&self) -> PathBuf {
        self.dir.join(OPERATION_TMP)
    }

    fn verbs_dir(&self) -> PathBuf {
        self.dir.join(VERBS_DIR)
    }

    fn pending_dir(&self) -> PathBuf {
        self.dir.join(PENDING_DIR)
    }

    fn old_dir(&self) -> PathBuf {
        self.dir.join(OLD_DIR)
    }

    /// True while an operation is in progress.
    pub fn exists(&self) -> bool {
        self.operation_path().exists()
    }

    /// Repair whatever an interrupted [`Store::commit`] left behind.
    pub fn recover(&self) -> Result<(), SyncError> {
        let tmp = self.tmp_path();
        if tmp.exists() {
            tracing::warn!("discarding uncommitted operation state at {}", tmp.display());
            std::fs::remove_file(&tmp).map_err(|e| io_err(&tmp, e))?;
            remove_dir_if_exists(&self.pending_dir())?;
        }
        if self.pending_dir().exists() {
            tracing::warn!("finishing interrupted verb-set promotion");
            self.promote()?;
        }
        let old = self.old_dir();
        if old.exists() {
            if self.verbs_dir().exists() {
                remove_dir_if_exists(&old)?;
            } else {
                rename(&old, &self.verbs_dir())?;
            }
        }
        Ok(())
    }

    fn promote(&self) -> Result<(), SyncError> {
        let verbs = self.verbs_dir();
        let old = self.old_dir();
        if verbs.exists() {
            remove_dir_if_exists(&old)?;
            rename(&verbs, &old)?;
        }
        rename(&self.pending_dir(), &verbs)?;
        remove_dir_if_exists(&old)
    }

    /// Load the state and legal verbs, or `None` when nothing is in progress.
    pub fn load(&self) -> Result<Option<(OperationState, BTreeSet<Verb>)>, SyncError> {
        self.recover()?;
        let path = self.operation_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let state: OperationState = serde_json::from_str(&contents)
            .map_err(|e| SyncError::CorruptState(format!("{}: {e}", path.display())))?;
        if state.version != STATE_VERSION {
            return Err(SyncError::CorruptState(format!(
                "{} has version {}, this weld understands version {STATE_VERSION}",
                path.display(),
                state.version
            )));
        }
        let verbs = self.load_verbs(state.kind)?;
        Ok(Some((state, verbs)))
    }

    fn load_verbs(&self, kind: OperationKind) -> Result<BTreeSet<Verb>, SyncError> {
        let dir = self.verbs_dir();
        let mut verbs = BTreeSet::new();
        if !dir.exists() {
            return Ok(verbs);
        }
        for entry in std::fs::read_dir(&dir).map_err(|e| io_err(&dir, e))? {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let verb: Verb = name.parse().map_err(SyncError::CorruptState)?;
            let content =
                std::fs::read_to_string(entry.path()).map_err(|e| io_err(entry.path(), e))?;
            let expected = handler_name(kind, verb);
            if content.trim() != expected {
                return Err(SyncError::CorruptState(format!(
                    "verb file {} names {:?}, expected {expected:?}",
                    entry.path().display(),
                    content.trim()
                )));
            }
            verbs.insert(verb);
        }
        Ok(verbs)
    }

    /// Record a new operation. Fails if one is already in progress.
    pub fn begin(&self, state: &OperationState, verbs: &BTreeSet<Verb>) -> Result<(), SyncError> {
        self.recover()?;
        if self.exists() {
            return Err(SyncError::give_up(
                "an operation is already in progress; run `weld finish` or `weld abort`",
            ));
        }
        self.commit(state, verbs)
    }

    /// Atomically replace the state and verb set.
    pub fn commit(&self, state: &OperationState, verbs: &BTreeSet<Verb>) -> Result<(), SyncError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;

        let tmp = self.tmp_path();
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;

        let pending = self.pending_dir();
        remove_dir_if_exists(&pending)?;
        std::fs::create_dir_all(&pending).map_err(|e| io_err(&pending, e))?;
        for verb in verbs {
            let path = pending.join(verb.as_str());
            std::fs::write(&path, handler_name(state.kind, *verb))
                .map_err(|e| io_err(&path, e))?;
        }

        rename(&tmp, &self.operation_path())?;
        self.promote()
    }

    /// Forget the operation entirely.
    pub fn clear(&self) -> Result<(), SyncError> {
        remove_dir_if_exists(&self.dir)
    }
}

/// `<kind>:<verb>`, the content of a verb file.
pub fn handler_name(kind: OperationKind, verb: Verb) -> String {
    format!("{kind}:{verb}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::SyncPoint;
    use crate::operation::SyncOptions;
    use tempfile::TempDir;
    use weld_core::markers::EventVerb;
    use weld_core::BaseName;

    fn state() -> OperationState {
        OperationState::new(
            OperationKind::PullStep,
            BaseName::from("lib"),
            SyncOptions::default(),
            SyncPoint {
                marker_commit: "abc".into(),
                verb: EventVerb::Init,
                base_commit: None,
                seams: vec![],
            },
            "main".into(),
            "abc".into(),
            "weld-pull-lib".into(),
        )
    }

    fn verbs(list: &[Verb]) -> BTreeSet<Verb> {
        list.iter().copied().collect()
    }

    #[test]
    fn commit_then_load() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        assert!(store.load().unwrap().is_none());

        store.begin(&state(), &verbs(&[Verb::CheckoutSync, Verb::Abort])).unwrap();
        let (loaded, legal) = store.load().unwrap().unwrap();
        assert_eq!(loaded, state_with_time(&loaded));
        assert_eq!(legal, verbs(&[Verb::CheckoutSync, Verb::Abort]));
        assert_eq!(
            std::fs::read_to_string(store.dir().join("verbs/checkout-sync")).unwrap(),
            "pull_step:checkout-sync"
        );

        store.commit(&loaded, &verbs(&[Verb::Step])).unwrap();
        let (_, legal) = store.load().unwrap().unwrap();
        assert_eq!(legal, verbs(&[Verb::Step]));
        assert!(!store.dir().join("verbs.old").exists());
    }

    fn state_with_time(loaded: &OperationState) -> OperationState {
        let mut s = state();
        s.started_at = loaded.started_at;
        s
    }

    #[test]
    fn second_begin_is_refused() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        store.begin(&state(), &verbs(&[Verb::Abort])).unwrap();
        let err = store.begin(&state(), &verbs(&[Verb::Abort])).unwrap_err();
        assert!(err.to_string().contains("weld abort"));
        store.clear().unwrap();
        assert!(!store.exists());
    }

    #[test]
    fn recover_discards_uncommitted_tmp() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        store.begin(&state(), &verbs(&[Verb::Step])).unwrap();

        std::fs::write(store.dir().join(OPERATION_TMP), "{ half written").unwrap();
        std::fs::create_dir_all(store.dir().join(PENDING_DIR)).unwrap();
        std::fs::write(store.dir().join("verbs.pending/finish"), "pull_step:finish").unwrap();

        let (_, legal) = store.load().unwrap().unwrap();
        assert_eq!(legal, verbs(&[Verb::Step]));
        assert!(!store.dir().join(PENDING_DIR).exists());
    }

    #[test]
    fn recover_completes_interrupted_promotion() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        store.begin(&state(), &verbs(&[Verb::Step])).unwrap();

        // Crash after the commit point, halfway through promotion.
        std::fs::create_dir_all(store.dir().join(PENDING_DIR)).unwrap();
        std::fs::write(store.dir().join("verbs.pending/finish"), "pull_step:finish").unwrap();
        rename(&store.dir().join(VERBS_DIR), &store.dir().join(OLD_DIR)).unwrap();

        let (_, legal) = store.load().unwrap().unwrap();
        assert_eq!(legal, verbs(&[Verb::Finish]));
        assert!(!store.dir().join(OLD_DIR).exists());
    }

    #[test]
    fn version_mismatch_is_corrupt_state() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        let mut s = state();
        s.version = STATE_VERSION + 1;
        store.commit(&s, &verbs(&[Verb::Abort])).unwrap();
        assert!(matches!(store.load(), Err(SyncError::CorruptState(_))));
    }
}
