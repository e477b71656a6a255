use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::error::{HltvError, Result};
use crate::model::{CrawlCheckpoint, CHECKPOINT_VERSION};

/// File-backed checkpoint persistence.
///
/// `commit` is called only after the corresponding page of work is durably
/// stored, so a crash between store and commit re-does at most one page of
/// idempotent units on resume. The file itself is replaced atomically
/// (write-new-then-rename), never overwritten in place.
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted checkpoint, if any.
    ///
    /// A missing file is `None`; an unreadable file or one written by a
    /// different format version is an error. The caller decides whether to
    /// start fresh, and says so out loud. A checkpoint is never discarded
    /// silently.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn load(&self) -> Result<Option<CrawlCheckpoint>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(HltvError::Checkpoint {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        let checkpoint: CrawlCheckpoint = serde_json::from_str(&raw)?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(HltvError::CheckpointVersion {
                found: checkpoint.version,
                expected: CHECKPOINT_VERSION,
            });
        }

        debug!(
            mode = %checkpoint.mode,
            next_offset = checkpoint.next_offset,
            completed = checkpoint.completed,
            "loaded checkpoint"
        );
        Ok(Some(checkpoint))
    }

    /// Persist the checkpoint atomically.
    #[instrument(skip(self, checkpoint), fields(path = %self.path.display()))]
    pub fn commit(&self, checkpoint: &CrawlCheckpoint) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HltvError::Checkpoint {
                path: self.path.clone(),
                source: e,
            })?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(checkpoint)?;
        std::fs::write(&tmp, raw).map_err(|e| HltvError::Checkpoint {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| HltvError::Checkpoint {
            path: self.path.clone(),
            source: e,
        })?;

        debug!(next_offset = checkpoint.next_offset, "committed checkpoint");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use crate::model::{DateRange, RunMode};

    use super::*;

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
        )
    }

    #[test]
    fn load_of_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn commit_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));

        let mut cp = CrawlCheckpoint::new(RunMode::Historical, Some(range()));
        cp.next_offset = 300;
        cp.counts.stored = 42;
        store.commit(&cp).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, cp);
        assert!(loaded.resumes(RunMode::Historical, Some(range())));
    }

    #[test]
    fn recommit_replaces_rather_than_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));

        let mut cp = CrawlCheckpoint::new(RunMode::Incremental, None);
        store.commit(&cp).unwrap();
        cp.next_offset = 100;
        store.commit(&cp).unwrap();

        assert_eq!(store.load().unwrap().unwrap().next_offset, 100);
    }

    #[test]
    fn version_mismatch_is_an_explicit_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let store = CheckpointStore::new(path.clone());

        let mut cp = CrawlCheckpoint::new(RunMode::Historical, Some(range()));
        cp.version = 0;
        let raw = serde_json::to_string(&cp).unwrap();
        std::fs::write(&path, raw).unwrap();

        match store.load() {
            Err(HltvError::CheckpointVersion { found: 0, expected }) => {
                assert_eq!(expected, CHECKPOINT_VERSION);
            }
            other => panic!("expected version mismatch, got {other:?}"),
        }
    }
}
