mod csv_backend;

pub use csv_backend::CsvStorage;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{MapRecord, MatchBundle, MatchRecord, PlayerRecord, PlayerStatRecord, TeamRecord};

/// What a [`StorageBackend::store_match`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// First time this match was seen.
    Inserted,
    /// The match existed with different content and was overwritten
    /// (typically a match first captured while still in progress).
    Updated,
    /// The match existed with identical content; nothing was written.
    Unchanged,
}

/// Aggregate counts over everything in storage, for the status/export
/// surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    pub matches: u64,
    pub maps: u64,
    pub player_stats: u64,
    pub teams: u64,
    pub players: u64,
    pub latest_match_date: Option<NaiveDateTime>,
}

/// Contract for durable, idempotent match storage.
///
/// All writes are keyed upserts: re-submitting a record with the same
/// identity never creates a duplicate and overwrites when content differs.
/// [`store_match`](StorageBackend::store_match) is the atomic unit the
/// orchestrator uses: a match's maps and stat rows commit together with
/// the match row or not at all. [`has_match`](StorageBackend::has_match)
/// and [`latest_known_date`](StorageBackend::latest_known_date) are the
/// primitives for skipping already-collected work without re-fetching.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn upsert_match(&self, record: &MatchRecord) -> Result<()>;

    async fn upsert_maps(&self, maps: &[MapRecord]) -> Result<()>;

    async fn upsert_player_stats(&self, stats: &[PlayerStatRecord]) -> Result<()>;

    async fn upsert_teams(&self, teams: &[TeamRecord]) -> Result<()>;

    async fn upsert_players(&self, players: &[PlayerRecord]) -> Result<()>;

    /// Validate and commit one match's full record set atomically.
    async fn store_match(&self, bundle: &MatchBundle) -> Result<StoreOutcome>;

    async fn has_match(&self, match_id: u64) -> Result<bool>;

    /// Date of the most recent match in storage, if any. Drives the
    /// incremental cutoff.
    async fn latest_known_date(&self) -> Result<Option<NaiveDateTime>>;

    async fn match_count(&self) -> Result<u64>;

    async fn stats(&self) -> Result<StorageStats>;
}
