use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Slowly-changing team metadata, keyed by HLTV team id.
///
/// Match rows reference the id; rank, name and country may drift over time,
/// so a re-fetch overwrites this row and bumps `last_updated` rather than
/// freezing a copy per match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRecord {
    pub team_id: u64,
    pub team_name: String,
    pub country: Option<String>,
    pub rank: Option<u32>,
    pub logo_url: Option<String>,
    pub last_updated: DateTime<Utc>,
}

/// Slowly-changing player metadata, keyed by HLTV player id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub player_id: u64,
    pub player_nick: String,
    pub player_name: Option<String>,
    pub country: Option<String>,
    /// Current roster affiliation at scrape time, not at match time.
    pub team_id: Option<u64>,
    pub last_updated: DateTime<Utc>,
}

impl TeamRecord {
    pub fn same_content(&self, other: &TeamRecord) -> bool {
        self.team_id == other.team_id
            && self.team_name == other.team_name
            && self.country == other.country
            && self.rank == other.rank
            && self.logo_url == other.logo_url
    }
}

impl PlayerRecord {
    pub fn same_content(&self, other: &PlayerRecord) -> bool {
        self.player_id == other.player_id
            && self.player_nick == other.player_nick
            && self.player_name == other.player_name
            && self.country == other.country
            && self.team_id == other.team_id
    }
}
