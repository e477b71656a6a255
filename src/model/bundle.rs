use std::collections::HashSet;

use crate::error::{HltvError, Result};

use super::{MapRecord, MatchRecord, PlayerRecord, PlayerStatRecord, TeamRecord};

/// Everything extracted from one match detail page.
///
/// A bundle is the atomic unit of storage: either all of it commits or none
/// of it does. [`validate`](MatchBundle::validate) is called before any
/// write so a malformed extraction can never leave a half-recorded match.
#[derive(Debug, Clone)]
pub struct MatchBundle {
    pub match_record: MatchRecord,
    pub maps: Vec<MapRecord>,
    pub player_stats: Vec<PlayerStatRecord>,
    pub teams: Vec<TeamRecord>,
    pub players: Vec<PlayerRecord>,
}

impl MatchBundle {
    /// Check the cross-record invariants of the data model.
    pub fn validate(&self) -> Result<()> {
        let id = self.match_record.match_id;

        for map in &self.maps {
            if map.match_id != id {
                return Err(HltvError::InvalidRecord {
                    context: format!("map row for match {} inside bundle {id}", map.match_id),
                });
            }
        }
        for stat in &self.player_stats {
            if stat.match_id != id {
                return Err(HltvError::InvalidRecord {
                    context: format!("stat row for match {} inside bundle {id}", stat.match_id),
                });
            }
        }

        // Map ordinals: contiguous from 1, bounded by the declared format.
        let max = self.match_record.format.max_maps();
        if self.maps.len() > max as usize {
            return Err(HltvError::InvalidRecord {
                context: format!(
                    "match {id}: {} maps exceeds {} maximum",
                    self.maps.len(),
                    self.match_record.format
                ),
            });
        }
        let mut ordinals: Vec<u8> = self.maps.iter().map(|m| m.map_number).collect();
        ordinals.sort_unstable();
        for (i, number) in ordinals.iter().enumerate() {
            if *number != i as u8 + 1 {
                return Err(HltvError::InvalidRecord {
                    context: format!("match {id}: map ordinals {ordinals:?} are not 1..=n"),
                });
            }
        }

        let known_maps: HashSet<u8> = ordinals.into_iter().collect();
        for stat in &self.player_stats {
            if let Some(number) = stat.map_number {
                if !known_maps.contains(&number) {
                    return Err(HltvError::InvalidRecord {
                        context: format!(
                            "match {id}: stat row for {} references unknown map {number}",
                            stat.player_nick
                        ),
                    });
                }
            }
            if !stat.percentages_in_range() {
                return Err(HltvError::InvalidRecord {
                    context: format!(
                        "match {id}: stat row for {} has a percentage outside 0-100",
                        stat.player_nick
                    ),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use crate::model::{MapName, SeriesFormat, TeamSlot};

    use super::*;

    fn match_record(id: u64) -> MatchRecord {
        MatchRecord {
            match_id: id,
            match_url: format!("https://www.hltv.org/matches/{id}/x"),
            team1_id: 4608,
            team1_name: "Natus Vincere".to_string(),
            team1_score: Some(2),
            team2_id: 6665,
            team2_name: "Astralis".to_string(),
            team2_score: Some(0),
            event_id: Some(7148),
            event_name: "IEM Katowice".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 2, 4).unwrap().and_hms_opt(18, 0, 0).unwrap(),
            format: SeriesFormat::Bo3,
            winner: Some(TeamSlot::Team1),
            final_score: "2-0".to_string(),
            scraped_at: Utc::now(),
        }
    }

    fn map_record(match_id: u64, number: u8) -> MapRecord {
        MapRecord {
            match_id,
            map_number: number,
            map_name: MapName::Mirage,
            team1_score: Some(13),
            team2_score: Some(7),
            team1_ct_score: None,
            team1_t_score: None,
            team2_ct_score: None,
            team2_t_score: None,
            winner: Some(TeamSlot::Team1),
            picked_by: None,
        }
    }

    fn stat_record(match_id: u64, map_number: Option<u8>) -> PlayerStatRecord {
        PlayerStatRecord {
            match_id,
            map_number,
            team_id: 4608,
            player_id: 7998,
            player_nick: "s1mple".to_string(),
            country: Some("Ukraine".to_string()),
            kills: 21,
            deaths: 14,
            assists: Some(3),
            adr: Some(88.4),
            kast: Some(74.1),
            rating: Some(1.31),
            hs_pct: None,
            opening_kills: None,
            opening_deaths: None,
            flash_assists: None,
            clutches_won: None,
        }
    }

    fn bundle(id: u64) -> MatchBundle {
        MatchBundle {
            match_record: match_record(id),
            maps: vec![map_record(id, 1), map_record(id, 2)],
            player_stats: vec![stat_record(id, None), stat_record(id, Some(1))],
            teams: vec![],
            players: vec![],
        }
    }

    #[test]
    fn valid_bundle_passes() {
        bundle(1).validate().unwrap();
    }

    #[test]
    fn gap_in_map_ordinals_is_rejected() {
        let mut b = bundle(1);
        b.maps[1].map_number = 3;
        assert!(b.validate().is_err());
    }

    #[test]
    fn too_many_maps_for_format_is_rejected() {
        let mut b = bundle(1);
        b.match_record.format = SeriesFormat::Bo1;
        assert!(b.validate().is_err());
    }

    #[test]
    fn out_of_range_percentage_is_rejected() {
        let mut b = bundle(1);
        b.player_stats[0].kast = Some(120.0);
        assert!(b.validate().is_err());
    }

    #[test]
    fn stat_row_for_unknown_map_is_rejected() {
        let mut b = bundle(1);
        b.player_stats[1].map_number = Some(5);
        assert!(b.validate().is_err());
    }
}
