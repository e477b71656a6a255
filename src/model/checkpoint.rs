use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Current checkpoint format version. Bumped on any breaking change to
/// [`CrawlCheckpoint`] so an old file is rejected instead of misread.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Inclusive date range for a historical crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Which entry mode a run was started in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunMode {
    Historical,
    Incremental,
}

/// Aggregate outcome counts for one run, reported through the status
/// surface and persisted in the checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub pages: u32,
    pub stored: u32,
    pub skipped_already_stored: u32,
    pub skipped_not_found: u32,
    pub skipped_parse_error: u32,
    pub failed: u32,
}

impl RunCounts {
    /// Total units attempted so far.
    pub fn attempted(&self) -> u32 {
        self.stored
            + self.skipped_already_stored
            + self.skipped_not_found
            + self.skipped_parse_error
            + self.failed
    }
}

/// Persisted crawl position, committed only after the corresponding page of
/// work is durably stored.
///
/// Created at run start, updated atomically after each committed page, read
/// back on the next start to resume. Never reset implicitly: a checkpoint
/// for a different mode or range simply does not
/// [`resume`](CrawlCheckpoint::resumes) the new run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlCheckpoint {
    pub version: u32,
    pub mode: RunMode,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Listing offset of the first page that has not been fully processed.
    pub next_offset: u32,
    pub counts: RunCounts,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed: bool,
}

impl CrawlCheckpoint {
    pub fn new(mode: RunMode, range: Option<DateRange>) -> Self {
        let now = Utc::now();
        Self {
            version: CHECKPOINT_VERSION,
            mode,
            start_date: range.map(|r| r.start),
            end_date: range.map(|r| r.end),
            next_offset: 0,
            counts: RunCounts::default(),
            started_at: now,
            updated_at: now,
            completed: false,
        }
    }

    /// Whether this checkpoint belongs to an interrupted run of the given
    /// mode and range and should be picked up instead of starting fresh.
    pub fn resumes(&self, mode: RunMode, range: Option<DateRange>) -> bool {
        !self.completed
            && self.mode == mode
            && self.start_date == range.map(|r| r.start)
            && self.end_date == range.map(|r| r.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
        )
    }

    #[test]
    fn resume_requires_same_mode_and_range() {
        let cp = CrawlCheckpoint::new(RunMode::Historical, Some(range()));
        assert!(cp.resumes(RunMode::Historical, Some(range())));
        assert!(!cp.resumes(RunMode::Incremental, Some(range())));

        let other = DateRange::new(
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 6, 30).unwrap(),
        );
        assert!(!cp.resumes(RunMode::Historical, Some(other)));
    }

    #[test]
    fn completed_checkpoint_never_resumes() {
        let mut cp = CrawlCheckpoint::new(RunMode::Historical, Some(range()));
        cp.completed = true;
        assert!(!cp.resumes(RunMode::Historical, Some(range())));
    }
}
