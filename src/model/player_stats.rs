use serde::{Deserialize, Serialize};

/// Per-player performance numbers for one match.
///
/// A row with `map_number: None` is the series-aggregate line from the match
/// page scoreboard; rows with a map number belong to that map only. Fields
/// the source omits (old matches predate several of these columns) stay
/// `None` and are never coerced to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatRecord {
    pub match_id: u64,
    pub map_number: Option<u8>,
    pub team_id: u64,
    pub player_id: u64,
    pub player_nick: String,
    pub country: Option<String>,
    pub kills: u32,
    pub deaths: u32,
    pub assists: Option<u32>,
    /// Average damage per round.
    pub adr: Option<f64>,
    /// Percentage of rounds with a kill, assist, survival or trade, 0-100.
    pub kast: Option<f64>,
    /// HLTV rating (2.0 where available, 1.0 on old matches).
    pub rating: Option<f64>,
    /// Headshot percentage, 0-100.
    pub hs_pct: Option<f64>,
    pub opening_kills: Option<u32>,
    pub opening_deaths: Option<u32>,
    pub flash_assists: Option<u32>,
    pub clutches_won: Option<u32>,
}

impl PlayerStatRecord {
    /// Percentage fields must sit within [0, 100]; counts are non-negative
    /// by construction.
    pub fn percentages_in_range(&self) -> bool {
        let in_range = |v: Option<f64>| v.is_none_or(|p| (0.0..=100.0).contains(&p));
        in_range(self.kast) && in_range(self.hs_pct)
    }
}
