use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::error::Result;
use crate::model::{MapRecord, MatchBundle, MatchRecord, PlayerRecord, PlayerStatRecord, TeamRecord};

use super::{StorageBackend, StorageStats, StoreOutcome};

const MATCHES_FILE: &str = "matches.csv";
const MAPS_FILE: &str = "maps.csv";
const STATS_FILE: &str = "player_stats.csv";
const TEAMS_FILE: &str = "teams.csv";
const PLAYERS_FILE: &str = "players.csv";

/// Flat-file storage backend: one CSV per table, mirroring the relational
/// schema (matches, maps, player_stats, teams, players).
///
/// The whole dataset is indexed in memory at open. New matches append; a
/// re-scraped match that changed rewrites the affected files through a
/// write-temp-then-rename. Within [`store_match`] the match row is flushed
/// last so it acts as the commit record: the loader drops map/stat rows
/// that have no match row, which makes a crash between flushes invisible
/// on the next open.
pub struct CsvStorage {
    dir: PathBuf,
    inner: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    matches: BTreeMap<u64, MatchRecord>,
    maps: BTreeMap<u64, Vec<MapRecord>>,
    stats: BTreeMap<u64, Vec<PlayerStatRecord>>,
    teams: BTreeMap<u64, TeamRecord>,
    players: BTreeMap<u64, PlayerRecord>,
}

impl CsvStorage {
    /// Open (or initialize) a CSV data directory and load its index.
    #[instrument]
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let mut tables = Tables::default();
        for record in read_table::<MatchRecord>(&dir.join(MATCHES_FILE))? {
            tables.matches.insert(record.match_id, record);
        }

        let mut orphans = 0usize;
        for record in read_table::<MapRecord>(&dir.join(MAPS_FILE))? {
            if tables.matches.contains_key(&record.match_id) {
                tables.maps.entry(record.match_id).or_default().push(record);
            } else {
                orphans += 1;
            }
        }
        for record in read_table::<PlayerStatRecord>(&dir.join(STATS_FILE))? {
            if tables.matches.contains_key(&record.match_id) {
                tables.stats.entry(record.match_id).or_default().push(record);
            } else {
                orphans += 1;
            }
        }
        if orphans > 0 {
            // Leftovers from a crash between flushes; superseded on the next
            // rewrite of the affected files.
            warn!(orphans, "dropped rows without a committed match row");
        }

        for record in read_table::<TeamRecord>(&dir.join(TEAMS_FILE))? {
            tables.teams.insert(record.team_id, record);
        }
        for record in read_table::<PlayerRecord>(&dir.join(PLAYERS_FILE))? {
            tables.players.insert(record.player_id, record);
        }

        debug!(
            matches = tables.matches.len(),
            teams = tables.teams.len(),
            players = tables.players.len(),
            "loaded CSV storage"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            inner: Mutex::new(tables),
        })
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    fn rewrite_maps(&self, tables: &Tables) -> Result<()> {
        write_table(&self.path(MAPS_FILE), tables.maps.values().flatten())
    }

    fn rewrite_stats(&self, tables: &Tables) -> Result<()> {
        write_table(&self.path(STATS_FILE), tables.stats.values().flatten())
    }

    fn rewrite_teams(&self, tables: &Tables) -> Result<()> {
        write_table(&self.path(TEAMS_FILE), tables.teams.values())
    }

    fn rewrite_players(&self, tables: &Tables) -> Result<()> {
        write_table(&self.path(PLAYERS_FILE), tables.players.values())
    }

    fn rewrite_matches(&self, tables: &Tables) -> Result<()> {
        write_table(&self.path(MATCHES_FILE), tables.matches.values())
    }

    fn upsert_team_rows(tables: &mut Tables, teams: &[TeamRecord]) -> bool {
        let mut changed = false;
        for team in teams {
            match tables.teams.get(&team.team_id) {
                Some(existing) if existing.same_content(team) => {}
                _ => {
                    tables.teams.insert(team.team_id, team.clone());
                    changed = true;
                }
            }
        }
        changed
    }

    fn upsert_player_rows(tables: &mut Tables, players: &[PlayerRecord]) -> bool {
        let mut changed = false;
        for player in players {
            match tables.players.get(&player.player_id) {
                Some(existing) if existing.same_content(player) => {}
                _ => {
                    tables.players.insert(player.player_id, player.clone());
                    changed = true;
                }
            }
        }
        changed
    }
}

#[async_trait]
impl StorageBackend for CsvStorage {
    async fn upsert_match(&self, record: &MatchRecord) -> Result<()> {
        let mut tables = self.inner.lock().await;
        tables.matches.insert(record.match_id, record.clone());
        self.rewrite_matches(&tables)
    }

    async fn upsert_maps(&self, maps: &[MapRecord]) -> Result<()> {
        let mut tables = self.inner.lock().await;
        for map in maps {
            let rows = tables.maps.entry(map.match_id).or_default();
            rows.retain(|m| m.map_number != map.map_number);
            rows.push(map.clone());
            rows.sort_by_key(|m| m.map_number);
        }
        self.rewrite_maps(&tables)
    }

    async fn upsert_player_stats(&self, stats: &[PlayerStatRecord]) -> Result<()> {
        let mut tables = self.inner.lock().await;
        for stat in stats {
            let rows = tables.stats.entry(stat.match_id).or_default();
            rows.retain(|s| !(s.player_id == stat.player_id && s.map_number == stat.map_number));
            rows.push(stat.clone());
        }
        self.rewrite_stats(&tables)
    }

    async fn upsert_teams(&self, teams: &[TeamRecord]) -> Result<()> {
        let mut tables = self.inner.lock().await;
        if Self::upsert_team_rows(&mut tables, teams) {
            self.rewrite_teams(&tables)?;
        }
        Ok(())
    }

    async fn upsert_players(&self, players: &[PlayerRecord]) -> Result<()> {
        let mut tables = self.inner.lock().await;
        if Self::upsert_player_rows(&mut tables, players) {
            self.rewrite_players(&tables)?;
        }
        Ok(())
    }

    #[instrument(skip(self, bundle), fields(match_id = bundle.match_record.match_id))]
    async fn store_match(&self, bundle: &MatchBundle) -> Result<StoreOutcome> {
        // Nothing is written until the whole bundle has passed validation.
        bundle.validate()?;

        let id = bundle.match_record.match_id;
        let mut tables = self.inner.lock().await;

        let outcome = match tables.matches.get(&id) {
            Some(existing)
                if existing.same_content(&bundle.match_record)
                    && tables.maps.get(&id).map(Vec::as_slice).unwrap_or_default()
                        == bundle.maps.as_slice()
                    && tables.stats.get(&id).map(Vec::as_slice).unwrap_or_default()
                        == bundle.player_stats.as_slice() =>
            {
                debug!(id, "match unchanged, skipping write");
                return Ok(StoreOutcome::Unchanged);
            }
            Some(_) => StoreOutcome::Updated,
            None => StoreOutcome::Inserted,
        };

        let is_new = outcome == StoreOutcome::Inserted;
        tables.maps.insert(id, bundle.maps.clone());
        tables.stats.insert(id, bundle.player_stats.clone());
        let teams_changed = Self::upsert_team_rows(&mut tables, &bundle.teams);
        let players_changed = Self::upsert_player_rows(&mut tables, &bundle.players);
        tables.matches.insert(id, bundle.match_record.clone());

        // Flush order is the commit protocol: the match row goes last.
        if is_new {
            append_rows(&self.path(MAPS_FILE), &bundle.maps)?;
            append_rows(&self.path(STATS_FILE), &bundle.player_stats)?;
        } else {
            self.rewrite_maps(&tables)?;
            self.rewrite_stats(&tables)?;
        }
        if teams_changed {
            self.rewrite_teams(&tables)?;
        }
        if players_changed {
            self.rewrite_players(&tables)?;
        }
        if is_new {
            append_rows(&self.path(MATCHES_FILE), &[bundle.match_record.clone()])?;
        } else {
            self.rewrite_matches(&tables)?;
        }

        debug!(id, ?outcome, "stored match");
        Ok(outcome)
    }

    async fn has_match(&self, match_id: u64) -> Result<bool> {
        Ok(self.inner.lock().await.matches.contains_key(&match_id))
    }

    async fn latest_known_date(&self) -> Result<Option<NaiveDateTime>> {
        Ok(self
            .inner
            .lock()
            .await
            .matches
            .values()
            .map(|m| m.date)
            .max())
    }

    async fn match_count(&self) -> Result<u64> {
        Ok(self.inner.lock().await.matches.len() as u64)
    }

    async fn stats(&self) -> Result<StorageStats> {
        let tables = self.inner.lock().await;
        Ok(StorageStats {
            matches: tables.matches.len() as u64,
            maps: tables.maps.values().map(Vec::len).sum::<usize>() as u64,
            player_stats: tables.stats.values().map(Vec::len).sum::<usize>() as u64,
            teams: tables.teams.len() as u64,
            players: tables.players.len() as u64,
            latest_match_date: tables.matches.values().map(|m| m.date).max(),
        })
    }
}

fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Rewrite a whole table through a temp file and rename, so a crash
/// mid-write never leaves a truncated table behind.
fn write_table<'a, T: Serialize + 'a>(
    path: &Path,
    rows: impl Iterator<Item = &'a T>,
) -> Result<()> {
    let tmp = path.with_extension("csv.tmp");
    let mut writer = csv::Writer::from_writer(File::create(&tmp)?);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Append rows to an existing table, creating it with headers first if
/// needed.
fn append_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if !path.exists() {
        return write_table(path, rows.iter());
    }
    let file = OpenOptions::new().append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
