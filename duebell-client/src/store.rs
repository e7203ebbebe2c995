use std::io::Write;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use duebell_shared::domain::Reminder;
use tracing::debug;

use crate::AppError;

/// On-disk snapshot of non-completed reminders.
///
/// Writes stage into a temp file in the same directory and land with an
/// atomic rename, so a crash mid-write leaves the previous snapshot
/// intact.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn open_default() -> Result<Self, AppError> {
        let pd = ProjectDirs::from("dev", "duebell", "duebell")
            .ok_or_else(|| AppError::State("could not determine data dir".into()))?;
        Ok(StateStore {
            path: pd.data_dir().join("pending.json"),
        })
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        StateStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing snapshot means a first run, not an error.
    pub fn load(&self) -> Result<Vec<Reminder>, AppError> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path=?self.path, "no snapshot yet");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(AppError::State(format!(
                    "read {} failed: {e}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_str(&data)
            .map_err(|e| AppError::State(format!("parse {} failed: {e}", self.path.display())))
    }

    pub fn save(&self, reminders: &[Reminder]) -> Result<(), AppError> {
        let live: Vec<&Reminder> = reminders.iter().filter(|r| !r.is_completed()).collect();
        let dir = self
            .path
            .parent()
            .ok_or_else(|| AppError::State(format!("no parent dir for {}", self.path.display())))?;
        std::fs::create_dir_all(dir)
            .map_err(|e| AppError::State(format!("create {} failed: {e}", dir.display())))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| AppError::State(format!("stage snapshot failed: {e}")))?;
        serde_json::to_writer_pretty(&mut tmp, &live)
            .map_err(|e| AppError::State(format!("serialize snapshot failed: {e}")))?;
        tmp.flush()
            .map_err(|e| AppError::State(format!("flush snapshot failed: {e}")))?;
        tmp.persist(&self.path)
            .map_err(|e| AppError::State(format!("persist {} failed: {e}", self.path.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duebell_shared::domain::{now_utc, ReminderAction};

    #[test]
    fn missing_snapshot_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::at(dir.path().join("pending.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::at(dir.path().join("pending.json"));
        let now = now_utc();

        let mut snoozed = Reminder::new("n1".into(), "Take medication", now);
        snoozed.apply(ReminderAction::Snooze15, now).unwrap();
        let pending = Reminder::new("n2".into(), "Stand up", now);

        store.save(&[snoozed.clone(), pending.clone()]).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, vec![snoozed, pending]);
    }

    #[test]
    fn completed_items_are_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::at(dir.path().join("pending.json"));
        let now = now_utc();

        let mut done = Reminder::new("n1".into(), "done", now);
        done.apply(ReminderAction::Complete, now).unwrap();
        store.save(&[done]).unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::at(dir.path().join("deep/nested/pending.json"));
        store
            .save(&[Reminder::new("n1".into(), "x", now_utc())])
            .unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn corrupt_snapshot_is_a_state_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending.json");
        std::fs::write(&path, "not json").unwrap();
        let err = StateStore::at(path).load().unwrap_err();
        assert!(matches!(err, AppError::State(_)));
    }
}
