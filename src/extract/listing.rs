use chrono::DateTime;
use itertools::Itertools;
use scraper::{Html, Selector};
use tracing::debug;

use crate::error::{HltvError, Result};
use crate::model::MatchRef;

use super::id_from_href;

/// Parse a results listing page into candidate match references.
///
/// The listing is date-descending; order is preserved here because resume
/// and the incremental short-circuit both depend on it. An empty last page
/// parses to an empty vec, which is not an error.
pub(crate) fn parse_listing(html: &str) -> Result<Vec<MatchRef>> {
    let document = Html::parse_document(html);

    // Distinguish "empty last page" from "not a results page at all".
    let container_selector = Selector::parse("div.results-all")?;
    if document.select(&container_selector).next().is_none() {
        return Err(HltvError::ElementNotFound {
            context: "results container (div.results-all)",
        });
    }

    let result_selector = Selector::parse("div.result-con")?;
    let link_selector = Selector::parse("a.a-reset")?;

    let refs = document
        .select(&result_selector)
        .filter_map(|result| {
            let href = result
                .select(&link_selector)
                .next()
                .and_then(|a| a.value().attr("href"))?;
            let id = id_from_href(href, "matches")?;

            let unix_ms: i64 = result
                .value()
                .attr("data-zonedgrouping-entry-unix")?
                .parse()
                .ok()?;
            let date = DateTime::from_timestamp_millis(unix_ms)?.date_naive();

            Some(MatchRef {
                id,
                url: format!("https://www.hltv.org{href}"),
                date,
            })
        })
        .collect_vec();

    debug!(count = refs.len(), "parsed results listing");
    Ok(refs)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn result_con(id: u64, unix_ms: i64) -> String {
        format!(
            r#"<div class="result-con" data-zonedgrouping-entry-unix="{unix_ms}">
                 <a href="/matches/{id}/team-a-vs-team-b-event" class="a-reset">
                   <div class="result"><table><tr><td>a</td></tr></table></div>
                 </a>
               </div>"#
        )
    }

    fn listing_page(bodies: &[String]) -> String {
        format!(
            r#"<html><body><div class="results-all"><div class="results-sublist">{}</div></div></body></html>"#,
            bodies.join("\n")
        )
    }

    #[test]
    fn listing_rows_become_match_refs() {
        // 2024-05-21T18:00:00Z
        let html = listing_page(&[
            result_con(2371621, 1716314400000),
            result_con(2371600, 1716228000000),
        ]);
        let refs = parse_listing(&html).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].id, 2371621);
        assert_eq!(refs[0].date, NaiveDate::from_ymd_opt(2024, 5, 21).unwrap());
        assert!(refs[0].url.ends_with("/matches/2371621/team-a-vs-team-b-event"));
        assert_eq!(refs[1].date, NaiveDate::from_ymd_opt(2024, 5, 20).unwrap());
    }

    #[test]
    fn empty_last_page_is_not_an_error() {
        let refs = parse_listing(&listing_page(&[])).unwrap();
        assert!(refs.is_empty());
    }

    #[test]
    fn page_without_results_container_is_a_parse_error() {
        let err = parse_listing("<html><body><h1>oops</h1></body></html>").unwrap_err();
        assert!(err.is_parse());
    }
}
