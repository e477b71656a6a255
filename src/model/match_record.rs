use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// A candidate match discovered on the results listing, before its detail
/// page has been fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRef {
    pub id: u64,
    pub url: String,
    pub date: NaiveDate,
}

/// Which side of a match a reference points at.
///
/// Winner and pick attributions are expressed as slots rather than free-form
/// team names, so a winner outside {team1, team2} is unrepresentable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TeamSlot {
    Team1,
    Team2,
}

/// Declared series format (best-of-N).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SeriesFormat {
    Bo1,
    Bo2,
    Bo3,
    Bo5,
}

impl SeriesFormat {
    /// Maximum number of maps a series of this format can contain.
    pub fn max_maps(self) -> u8 {
        match self {
            SeriesFormat::Bo1 => 1,
            SeriesFormat::Bo2 => 2,
            SeriesFormat::Bo3 => 3,
            SeriesFormat::Bo5 => 5,
        }
    }

    /// Parse an HLTV format label such as "Best of 3 (LAN)".
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.to_lowercase();
        if label.contains("best of 1") {
            Some(SeriesFormat::Bo1)
        } else if label.contains("best of 2") {
            Some(SeriesFormat::Bo2)
        } else if label.contains("best of 3") {
            Some(SeriesFormat::Bo3)
        } else if label.contains("best of 5") {
            Some(SeriesFormat::Bo5)
        } else {
            None
        }
    }
}

/// One fully scraped match, flattened for relational storage.
///
/// Immutable once the match has finished; a match captured while still in
/// progress is re-scraped only to correct `winner` and `final_score`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: u64,
    pub match_url: String,
    pub team1_id: u64,
    pub team1_name: String,
    pub team1_score: Option<u8>,
    pub team2_id: u64,
    pub team2_name: String,
    pub team2_score: Option<u8>,
    pub event_id: Option<u64>,
    pub event_name: String,
    pub date: NaiveDateTime,
    pub format: SeriesFormat,
    /// `None` for unresolved or forfeited matches.
    pub winner: Option<TeamSlot>,
    pub final_score: String,
    pub scraped_at: DateTime<Utc>,
}

impl MatchRecord {
    /// Content equality ignoring `scraped_at`, used by storage upserts to
    /// detect a genuinely unchanged re-scrape.
    pub fn same_content(&self, other: &MatchRecord) -> bool {
        self.match_id == other.match_id
            && self.match_url == other.match_url
            && self.team1_id == other.team1_id
            && self.team1_name == other.team1_name
            && self.team1_score == other.team1_score
            && self.team2_id == other.team2_id
            && self.team2_name == other.team2_name
            && self.team2_score == other.team2_score
            && self.event_id == other.event_id
            && self.event_name == other.event_name
            && self.date == other.date
            && self.format == other.format
            && self.winner == other.winner
            && self.final_score == other.final_score
    }
}
