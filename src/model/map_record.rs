use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::TeamSlot;

/// The CS competitive map pool, past and present. Maps outside the known
/// pool are preserved verbatim rather than dropped.
#[derive(Debug, Clone, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
pub enum MapName {
    Ancient,
    Anubis,
    Cache,
    Cobblestone,
    Dust2,
    Inferno,
    Mirage,
    Nuke,
    Overpass,
    Train,
    Vertigo,
    #[strum(default)]
    Other(String),
}

impl Serialize for MapName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MapName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        MapName::from_str(&s).map_err(D::Error::custom)
    }
}

/// One map played (or scheduled) within a match.
///
/// `map_number` is the 1-based ordinal within the series; ordinals for a
/// match are contiguous and bounded by the declared format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapRecord {
    pub match_id: u64,
    pub map_number: u8,
    pub map_name: MapName,
    pub team1_score: Option<u8>,
    pub team2_score: Option<u8>,
    pub team1_ct_score: Option<u8>,
    pub team1_t_score: Option<u8>,
    pub team2_ct_score: Option<u8>,
    pub team2_t_score: Option<u8>,
    pub winner: Option<TeamSlot>,
    /// Which side picked this map in the veto, when the page shows it.
    pub picked_by: Option<TeamSlot>,
}

impl fmt::Display for MapRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (map {})", self.map_name, self.map_number)
    }
}
