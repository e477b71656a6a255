pub(crate) mod detail;
pub(crate) mod listing;

use ::scraper::{ElementRef, Selector};

use crate::error::Result;
use crate::model::{MatchBundle, MatchRef};

/// Pure page-to-record extraction, swappable per source-page version.
///
/// Implementations must signal a parse-class [`HltvError`](crate::HltvError)
/// on malformed input instead of returning partial or zeroed structures;
/// the orchestrator relies on that to contain a bad page as one skipped
/// unit rather than half-storing it.
pub trait Extractor: Send + Sync {
    /// Extract candidate match references from a results listing page.
    fn listing_page(&self, html: &str) -> Result<Vec<MatchRef>>;

    /// Extract one match's full record set from its detail page.
    fn match_detail(&self, id: u64, html: &str) -> Result<MatchBundle>;
}

/// Selector-based extractor for the current HLTV page layout.
#[derive(Debug, Default)]
pub struct HtmlExtractor;

impl HtmlExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for HtmlExtractor {
    fn listing_page(&self, html: &str) -> Result<Vec<MatchRef>> {
        listing::parse_listing(html)
    }

    fn match_detail(&self, id: u64, html: &str) -> Result<MatchBundle> {
        detail::parse_match_detail(id, html)
    }
}

/// Extract trimmed text content from the first element matching `selector`
/// inside `element`. Returns an empty string if nothing matches.
pub(crate) fn select_text(element: &ElementRef, selector: &Selector) -> String {
    element
        .select(selector)
        .next()
        .and_then(|d| d.text().map(|t| t.trim()).find(|t| !t.is_empty()))
        .unwrap_or_default()
        .trim()
        .replace(['\n', '\t'], "")
        .to_string()
}

/// Pull the numeric id out of an HLTV entity href such as
/// `/matches/2371621/faze-vs-navi` or `/team/4608/natus-vincere`.
pub(crate) fn id_from_href(href: &str, kind: &str) -> Option<u64> {
    let rest = href.strip_prefix('/')?;
    let rest = rest.strip_prefix(kind)?.strip_prefix('/')?;
    let id = rest.split('/').next()?;
    id.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn href_ids_are_extracted() {
        assert_eq!(
            id_from_href("/matches/2371621/faze-vs-navi", "matches"),
            Some(2371621)
        );
        assert_eq!(id_from_href("/team/4608/natus-vincere", "team"), Some(4608));
        assert_eq!(id_from_href("/player/7998/s1mple", "player"), Some(7998));
        assert_eq!(id_from_href("/events/7148/iem-katowice", "events"), Some(7148));
        assert_eq!(id_from_href("/results?offset=100", "matches"), None);
    }
}
