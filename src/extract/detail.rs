use chrono::{DateTime, NaiveDateTime, Utc};
use itertools::Itertools;
use scraper::{CaseSensitivity, ElementRef, Html, Selector};
use tracing::debug;

use crate::error::{HltvError, Result};
use crate::model::{
    MapName, MapRecord, MatchBundle, MatchRecord, PlayerRecord, PlayerStatRecord, SeriesFormat,
    TeamRecord, TeamSlot,
};

use super::{id_from_href, select_text};

/// Parse one HLTV match page into the full record bundle.
pub(crate) fn parse_match_detail(id: u64, html: &str) -> Result<MatchBundle> {
    let document = Html::parse_document(html);

    let page_selector = Selector::parse("div.match-page")?;
    let page = document
        .select(&page_selector)
        .next()
        .ok_or(HltvError::ElementNotFound {
            context: "match page root (div.match-page)",
        })?;

    let url = canonical_url(&document)
        .unwrap_or_else(|| format!("https://www.hltv.org/matches/{id}/-"));

    let team1 = parse_team_box(&page, TeamSlot::Team1)?;
    let team2 = parse_team_box(&page, TeamSlot::Team2)?;
    let date = parse_date(&page)?;
    let (event_id, event_name) = parse_event(&page)?;
    let maps = parse_maps(&page, id)?;
    let format = parse_format(&page).or_else(|| infer_format(maps.len()));
    let format = format.ok_or(HltvError::Parse {
        context: format!("match {id}: no series format and no maps to infer it from"),
    })?;

    let winner = match (team1.score, team2.score) {
        (Some(a), Some(b)) if a > b => Some(TeamSlot::Team1),
        (Some(a), Some(b)) if b > a => Some(TeamSlot::Team2),
        _ => None,
    };
    let final_score = match (team1.score, team2.score) {
        (Some(a), Some(b)) => format!("{a}-{b}"),
        _ => String::new(),
    };

    let (player_stats, players) = parse_stats_tables(&page, id, team1.id, team2.id)?;

    let scraped_at = Utc::now();
    let bundle = MatchBundle {
        match_record: MatchRecord {
            match_id: id,
            match_url: url,
            team1_id: team1.id,
            team1_name: team1.name.clone(),
            team1_score: team1.score,
            team2_id: team2.id,
            team2_name: team2.name.clone(),
            team2_score: team2.score,
            event_id,
            event_name,
            date,
            format,
            winner,
            final_score,
            scraped_at,
        },
        maps,
        player_stats,
        teams: vec![team1.into_record(scraped_at), team2.into_record(scraped_at)],
        players,
    };

    bundle.validate()?;
    debug!(
        id,
        maps = bundle.maps.len(),
        stat_rows = bundle.player_stats.len(),
        "parsed match detail"
    );
    Ok(bundle)
}

struct TeamBox {
    id: u64,
    name: String,
    score: Option<u8>,
    logo_url: Option<String>,
}

impl TeamBox {
    fn into_record(self, now: DateTime<Utc>) -> TeamRecord {
        TeamRecord {
            team_id: self.id,
            team_name: self.name,
            country: None,
            rank: None,
            logo_url: self.logo_url,
            last_updated: now,
        }
    }
}

fn canonical_url(document: &Html) -> Option<String> {
    let selector = Selector::parse("link[rel=canonical]").ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|l| l.value().attr("href"))
        .map(str::to_owned)
}

fn parse_team_box(page: &ElementRef, slot: TeamSlot) -> Result<TeamBox> {
    let gradient = match slot {
        TeamSlot::Team1 => "div.team1-gradient",
        TeamSlot::Team2 => "div.team2-gradient",
    };
    let context = match slot {
        TeamSlot::Team1 => "team box (div.team1-gradient)",
        TeamSlot::Team2 => "team box (div.team2-gradient)",
    };
    let gradient_selector = Selector::parse(gradient)?;
    let team = page
        .select(&gradient_selector)
        .next()
        .ok_or(HltvError::ElementNotFound { context })?;

    let link_selector = Selector::parse("a")?;
    let id = team
        .select(&link_selector)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| id_from_href(href, "team"))
        .ok_or(HltvError::ElementNotFound {
            context: "team link in team box",
        })?;

    let name_selector = Selector::parse("div.teamName")?;
    let name = select_text(&team, &name_selector);
    if name.is_empty() {
        return Err(HltvError::ElementNotFound {
            context: "team name (div.teamName)",
        });
    }

    let score_selector = Selector::parse("div.won, div.lost, div.tie")?;
    let score = select_text(&team, &score_selector).parse().ok();

    let logo_selector = Selector::parse("img.logo")?;
    let logo_url = team
        .select(&logo_selector)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(str::to_owned);

    Ok(TeamBox {
        id,
        name,
        score,
        logo_url,
    })
}

fn parse_date(page: &ElementRef) -> Result<NaiveDateTime> {
    let selector = Selector::parse("div.timeAndEvent div.date")?;
    let unix_ms: i64 = page
        .select(&selector)
        .next()
        .and_then(|d| d.value().attr("data-unix"))
        .ok_or(HltvError::ElementNotFound {
            context: "match date (div.date[data-unix])",
        })?
        .parse()?;
    DateTime::from_timestamp_millis(unix_ms)
        .map(|dt| dt.naive_utc())
        .ok_or(HltvError::Parse {
            context: format!("match date out of range: {unix_ms}"),
        })
}

fn parse_event(page: &ElementRef) -> Result<(Option<u64>, String)> {
    let selector = Selector::parse("div.timeAndEvent div.event a")?;
    let event = page.select(&selector).next();
    let id = event
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| id_from_href(href, "events").or_else(|| id_from_href(href, "event")));
    let name = event
        .map(|a| a.text().map(str::trim).join(""))
        .unwrap_or_default();
    Ok((id, name))
}

fn parse_format(page: &ElementRef) -> Option<SeriesFormat> {
    let selector = Selector::parse("div.padding.preformatted-text").ok()?;
    let text = page.select(&selector).next()?.text().join(" ");
    SeriesFormat::from_label(&text)
}

/// Old pages occasionally lack the format note; fall back to the widest
/// format consistent with the number of maps shown.
fn infer_format(map_count: usize) -> Option<SeriesFormat> {
    match map_count {
        1 => Some(SeriesFormat::Bo1),
        2 | 3 => Some(SeriesFormat::Bo3),
        4 | 5 => Some(SeriesFormat::Bo5),
        _ => None,
    }
}

fn parse_maps(page: &ElementRef, match_id: u64) -> Result<Vec<MapRecord>> {
    let holder_selector = Selector::parse("div.mapholder")?;
    let name_selector = Selector::parse("div.mapname")?;
    let score_selector = Selector::parse("div.results-team-score")?;
    let left_selector = Selector::parse("div.results-left")?;
    let right_selector = Selector::parse("span.results-right, div.results-right")?;
    let half_selector = Selector::parse("div.results-center-half-score span")?;

    let mut maps = Vec::new();
    let mut number = 0u8;
    for holder in page.select(&holder_selector) {
        let name = select_text(&holder, &name_selector);
        if name.is_empty() || name.eq_ignore_ascii_case("tba") {
            // Unplayed slot of a short series.
            continue;
        }
        number += 1;

        let scores = holder
            .select(&score_selector)
            .map(|s| {
                s.text()
                    .map(str::trim)
                    .find(|t| !t.is_empty())
                    .and_then(|t| t.parse::<u8>().ok())
            })
            .collect_vec();
        let team1_score = scores.first().copied().flatten();
        let team2_score = scores.get(1).copied().flatten();

        let left = holder.select(&left_selector).next();
        let right = holder.select(&right_selector).next();
        let has_class = |el: Option<ElementRef>, class: &str| {
            el.map(|e| {
                e.value()
                    .has_class(class, CaseSensitivity::AsciiCaseInsensitive)
            })
            .unwrap_or_default()
        };

        let winner = if has_class(left, "won") {
            Some(TeamSlot::Team1)
        } else if has_class(right, "won") {
            Some(TeamSlot::Team2)
        } else {
            None
        };
        let picked_by = if has_class(left, "pick") {
            Some(TeamSlot::Team1)
        } else if has_class(right, "pick") {
            Some(TeamSlot::Team2)
        } else {
            None
        };

        // Half scores come as four spans: team1/team2 first half, then
        // team1/team2 second half, with the side encoded in the class.
        let halves = holder
            .select(&half_selector)
            .map(|s| {
                let score: Option<u8> = s
                    .text()
                    .map(str::trim)
                    .find(|t| !t.is_empty())
                    .and_then(|t| t.parse().ok());
                let is_ct = s
                    .value()
                    .has_class("ct", CaseSensitivity::AsciiCaseInsensitive);
                (score, is_ct)
            })
            .collect_vec();
        let half = |team_offset: usize, want_ct: bool| {
            [team_offset, team_offset + 2]
                .into_iter()
                .filter_map(|i| halves.get(i))
                .find(|(_, is_ct)| *is_ct == want_ct)
                .and_then(|(score, _)| *score)
        };
        let (team1_ct_score, team1_t_score, team2_ct_score, team2_t_score) =
            if halves.len() >= 4 {
                (half(0, true), half(0, false), half(1, true), half(1, false))
            } else {
                (None, None, None, None)
            };

        maps.push(MapRecord {
            match_id,
            map_number: number,
            map_name: name.parse().unwrap_or(MapName::Other(name)),
            team1_score,
            team2_score,
            team1_ct_score,
            team1_t_score,
            team2_ct_score,
            team2_t_score,
            winner,
            picked_by,
        });
    }
    Ok(maps)
}

fn parse_stats_tables(
    page: &ElementRef,
    match_id: u64,
    team1_id: u64,
    team2_id: u64,
) -> Result<(Vec<PlayerStatRecord>, Vec<PlayerRecord>)> {
    let table_selector = Selector::parse("table.totalstats")?;
    let row_selector = Selector::parse("tr")?;
    let player_cell_selector = Selector::parse("td.players a")?;
    let flag_selector = Selector::parse("td.players img.flag")?;
    let kd_selector = Selector::parse("td.kd")?;
    let adr_selector = Selector::parse("td.adr")?;
    let kast_selector = Selector::parse("td.kast")?;
    let rating_selector = Selector::parse("td.rating")?;

    let now = Utc::now();
    let mut stats = Vec::new();
    let mut players = Vec::new();

    // The first two tables are the series totals, one per team, in header
    // order. Per-map tables repeat the same shape further down the page and
    // are intentionally not double-counted here.
    for (index, table) in page.select(&table_selector).take(2).enumerate() {
        let team_id = if index == 0 { team1_id } else { team2_id };

        for row in table.select(&row_selector) {
            if row
                .value()
                .has_class("header-row", CaseSensitivity::AsciiCaseInsensitive)
            {
                continue;
            }

            let Some(anchor) = row.select(&player_cell_selector).next() else {
                continue;
            };
            let Some(player_id) = anchor
                .value()
                .attr("href")
                .and_then(|href| id_from_href(href, "player"))
            else {
                continue;
            };
            let player_nick = anchor.text().map(str::trim).find(|t| !t.is_empty());
            let Some(player_nick) = player_nick.map(str::to_owned) else {
                continue;
            };

            let country = row
                .select(&flag_selector)
                .next()
                .and_then(|img| img.value().attr("title"))
                .map(str::to_owned);

            let kd = select_text(&row, &kd_selector);
            let (kills, deaths) = parse_kd(&kd).ok_or(HltvError::Parse {
                context: format!("match {match_id}: bad K-D cell {kd:?} for {player_nick}"),
            })?;

            stats.push(PlayerStatRecord {
                match_id,
                map_number: None,
                team_id,
                player_id,
                player_nick: player_nick.clone(),
                country: country.clone(),
                kills,
                deaths,
                assists: None,
                adr: parse_opt_f64(&select_text(&row, &adr_selector)),
                kast: parse_opt_f64(select_text(&row, &kast_selector).trim_end_matches('%')),
                rating: parse_opt_f64(&select_text(&row, &rating_selector)),
                hs_pct: None,
                opening_kills: None,
                opening_deaths: None,
                flash_assists: None,
                clutches_won: None,
            });
            players.push(PlayerRecord {
                player_id,
                player_nick,
                player_name: None,
                country,
                team_id: Some(team_id),
                last_updated: now,
            });
        }
    }

    Ok((stats, players))
}

/// Parse an HLTV K-D cell such as "21-14".
fn parse_kd(text: &str) -> Option<(u32, u32)> {
    let (kills, deaths) = text.split_once('-')?;
    Some((kills.trim().parse().ok()?, deaths.trim().parse().ok()?))
}

/// "-" and empty cells mean the source does not have the value; keep None.
fn parse_opt_f64(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() || text == "-" {
        return None;
    }
    text.parse().ok()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    // 2024-02-04T18:00:00Z
    const DATE_UNIX_MS: i64 = 1707069600000;

    fn detail_page() -> String {
        format!(
            r#"<html><head>
              <link rel="canonical" href="https://www.hltv.org/matches/2371621/navi-vs-astralis-iem"/>
            </head><body><div class="match-page">
              <div class="teamsBox">
                <div class="team">
                  <div class="team1-gradient">
                    <a href="/team/4608/natus-vincere"><img class="logo" src="/img/4608.png"/>
                      <div class="teamName">Natus Vincere</div></a>
                    <div class="team1-gradient-score won">2</div>
                  </div>
                </div>
                <div class="timeAndEvent">
                  <div class="time" data-unix="{DATE_UNIX_MS}">19:00</div>
                  <div class="date" data-unix="{DATE_UNIX_MS}">4th of February 2024</div>
                  <div class="event text-ellipsis"><a href="/events/7148/iem-katowice-2024">IEM Katowice 2024</a></div>
                </div>
                <div class="team">
                  <div class="team2-gradient">
                    <a href="/team/6665/astralis"><img class="logo" src="/img/6665.png"/>
                      <div class="teamName">Astralis</div></a>
                    <div class="team2-gradient-score lost">0</div>
                  </div>
                </div>
              </div>
              <div class="padding preformatted-text">Best of 3 (LAN)</div>
              <div class="mapholder">
                <div class="mapname">Mirage</div>
                <div class="results-left won pick">
                  <div class="results-team-score">13</div>
                </div>
                <div class="results-center-half-score">
                  (<span class="ct">7</span>:<span class="t">5</span>;
                   <span class="t">6</span>:<span class="ct">2</span>)
                </div>
                <span class="results-right lost">
                  <div class="results-team-score">7</div>
                </span>
              </div>
              <div class="mapholder">
                <div class="mapname">Nuke</div>
                <div class="results-left lost">
                  <div class="results-team-score">10</div>
                </div>
                <span class="results-right won pick">
                  <div class="results-team-score">13</div>
                </span>
              </div>
              <div class="mapholder"><div class="mapname">TBA</div></div>
              <table class="totalstats">
                <tr class="header-row"><td class="players"><a href="/team/4608/natus-vincere">Natus Vincere</a></td></tr>
                <tr>
                  <td class="players"><img class="flag" title="Ukraine"/><a href="/player/7998/s1mple">s1mple</a></td>
                  <td class="kd">47-30</td><td class="adr">91.2</td>
                  <td class="kast">76.4%</td><td class="rating">1.42</td>
                </tr>
              </table>
              <table class="totalstats">
                <tr class="header-row"><td class="players"><a href="/team/6665/astralis">Astralis</a></td></tr>
                <tr>
                  <td class="players"><img class="flag" title="Denmark"/><a href="/player/7592/device">device</a></td>
                  <td class="kd">35-34</td><td class="adr">-</td>
                  <td class="kast">-</td><td class="rating">1.04</td>
                </tr>
              </table>
            </div></body></html>"#
        )
    }

    #[test]
    fn full_detail_page_parses_into_a_bundle() {
        let bundle = parse_match_detail(2371621, &detail_page()).unwrap();
        let m = &bundle.match_record;

        assert_eq!(m.match_id, 2371621);
        assert_eq!(m.match_url, "https://www.hltv.org/matches/2371621/navi-vs-astralis-iem");
        assert_eq!(m.team1_id, 4608);
        assert_eq!(m.team2_name, "Astralis");
        assert_eq!((m.team1_score, m.team2_score), (Some(2), Some(0)));
        assert_eq!(m.winner, Some(TeamSlot::Team1));
        assert_eq!(m.final_score, "2-0");
        assert_eq!(m.format, SeriesFormat::Bo3);
        assert_eq!(m.event_id, Some(7148));
        assert_eq!(m.date.date(), NaiveDate::from_ymd_opt(2024, 2, 4).unwrap());

        // TBA holder is skipped; ordinals stay contiguous.
        assert_eq!(bundle.maps.len(), 2);
        let mirage = &bundle.maps[0];
        assert_eq!(mirage.map_name, MapName::Mirage);
        assert_eq!((mirage.team1_score, mirage.team2_score), (Some(13), Some(7)));
        assert_eq!(mirage.winner, Some(TeamSlot::Team1));
        assert_eq!(mirage.picked_by, Some(TeamSlot::Team1));
        assert_eq!(mirage.team1_ct_score, Some(7));
        assert_eq!(mirage.team1_t_score, Some(6));
        assert_eq!(mirage.team2_ct_score, Some(2));
        assert_eq!(mirage.team2_t_score, Some(5));
        let nuke = &bundle.maps[1];
        assert_eq!(nuke.map_number, 2);
        assert_eq!(nuke.winner, Some(TeamSlot::Team2));
        assert_eq!(nuke.picked_by, Some(TeamSlot::Team2));
        assert_eq!(nuke.team1_ct_score, None);

        assert_eq!(bundle.player_stats.len(), 2);
        let s1mple = &bundle.player_stats[0];
        assert_eq!(s1mple.team_id, 4608);
        assert_eq!((s1mple.kills, s1mple.deaths), (47, 30));
        assert_eq!(s1mple.kast, Some(76.4));
        assert_eq!(s1mple.country.as_deref(), Some("Ukraine"));
        // "-" cells stay None rather than becoming zero.
        let device = &bundle.player_stats[1];
        assert_eq!(device.adr, None);
        assert_eq!(device.kast, None);
        assert_eq!(device.rating, Some(1.04));

        assert_eq!(bundle.teams.len(), 2);
        assert_eq!(bundle.players.len(), 2);
        assert_eq!(bundle.players[1].team_id, Some(6665));
    }

    #[test]
    fn malformed_page_is_a_parse_error_not_a_partial_bundle() {
        let err = parse_match_detail(1, "<html><body>MALFORMED</body></html>").unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    fn kd_cell_parsing() {
        assert_eq!(parse_kd("21-14"), Some((21, 14)));
        assert_eq!(parse_kd(" 3 - 0 "), Some((3, 0)));
        assert_eq!(parse_kd("n/a"), None);
    }
}
