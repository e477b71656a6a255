use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::client::PageFetcher;
use crate::error::Result;
use crate::extract::Extractor;
use crate::model::{DateRange, MatchRef};

/// Build the listing URL for a pagination offset.
pub(crate) fn listing_url(base_url: &str, offset: u32) -> String {
    if offset == 0 {
        format!("{base_url}/results")
    } else {
        format!("{base_url}/results?offset={offset}")
    }
}

/// Sequential walker over the results listing.
///
/// The listing is **date-descending** (newest first); both resume
/// correctness and the incremental short-circuit depend on that order, so
/// the walker never reorders what the extractor returns. One call to
/// [`next_page`](ResultsWalker::next_page) performs exactly one fetch, and
/// the cursor only advances after a page parses, so a failed call can be
/// retried without skipping anything.
///
/// The walk ends on an empty page or once a page's oldest item falls before
/// the requested range. Identifiers are de-duplicated across pages: the
/// source re-lists an item when sort-order ties on the same date break
/// differently between two requests.
pub struct ResultsWalker {
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn Extractor>,
    base_url: String,
    range: DateRange,
    page_size: u32,
    offset: u32,
    seen: HashSet<u64>,
    done: bool,
}

impl ResultsWalker {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn Extractor>,
        base_url: impl Into<String>,
        range: DateRange,
        page_size: u32,
        start_offset: u32,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            base_url: base_url.into(),
            range,
            page_size,
            offset: start_offset,
            seen: HashSet::new(),
            done: false,
        }
    }

    /// Listing offset of the next unfetched page.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Fetch and parse the next listing page, returning the in-range,
    /// de-duplicated references on it. `None` once the sequence is
    /// exhausted. A short page (fewer items than the nominal page size) is
    /// normal on the last page, not an error.
    #[instrument(skip(self), fields(offset = self.offset))]
    pub async fn next_page(&mut self) -> Result<Option<Vec<MatchRef>>> {
        if self.done {
            return Ok(None);
        }

        let url = listing_url(&self.base_url, self.offset);
        let html = self.fetcher.fetch(&url).await?;
        let refs = self.extractor.listing_page(&html)?;

        if refs.is_empty() {
            debug!("empty listing page, walk complete");
            self.done = true;
            return Ok(None);
        }

        self.offset += self.page_size;

        // Oldest item on a date-descending page; once it predates the range
        // start, no later page can contain anything in range.
        if let Some(oldest) = refs.iter().map(|r| r.date).min() {
            if oldest < self.range.start {
                debug!(%oldest, "page crossed the range start, walk complete");
                self.done = true;
            }
        }

        let page: Vec<MatchRef> = refs
            .into_iter()
            .filter(|r| self.range.contains(r.date))
            .filter(|r| self.seen.insert(r.id))
            .collect();

        debug!(kept = page.len(), "walked listing page");
        Ok(Some(page))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::NaiveDate;

    use crate::error::HltvError;
    use crate::model::MatchBundle;

    use super::*;

    /// Serves canned listing "pages" keyed by URL and records every fetch.
    struct FakeFetcher {
        pages: HashMap<String, String>,
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PageFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<String> {
            self.log.lock().unwrap().push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| HltvError::NotFound {
                    url: url.to_string(),
                })
        }
    }

    /// Parses the line format `id date` used by the fake pages.
    struct LineExtractor;

    impl Extractor for LineExtractor {
        fn listing_page(&self, html: &str) -> Result<Vec<MatchRef>> {
            html.lines()
                .filter(|l| !l.trim().is_empty())
                .map(|line| {
                    let (id, date) = line.trim().split_once(' ').ok_or(HltvError::Parse {
                        context: format!("bad listing line: {line}"),
                    })?;
                    Ok(MatchRef {
                        id: id.parse().map_err(HltvError::IntParse)?,
                        url: format!("https://www.hltv.org/matches/{id}/x"),
                        date: date.parse().map_err(HltvError::DateParse)?,
                    })
                })
                .collect()
        }

        fn match_detail(&self, _id: u64, _html: &str) -> Result<MatchBundle> {
            unreachable!("walker never fetches details")
        }
    }

    fn walker(pages: &[(&str, &str)], range: DateRange) -> ResultsWalker {
        let fetcher = FakeFetcher {
            pages: pages
                .iter()
                .map(|(u, b)| (u.to_string(), b.to_string()))
                .collect(),
            log: Mutex::new(Vec::new()),
        };
        ResultsWalker::new(
            Arc::new(fetcher),
            Arc::new(LineExtractor),
            "https://www.hltv.org",
            range,
            2,
            0,
        )
    }

    fn range(start: &str, end: &str) -> DateRange {
        DateRange::new(start.parse().unwrap(), end.parse().unwrap())
    }

    #[tokio::test]
    async fn walks_pages_until_the_listing_is_empty() {
        let mut w = walker(
            &[
                ("https://www.hltv.org/results", "10 2024-05-03\n9 2024-05-02"),
                ("https://www.hltv.org/results?offset=2", "8 2024-05-01"),
                ("https://www.hltv.org/results?offset=4", ""),
            ],
            range("2024-01-01", "2024-12-31"),
        );

        let p1 = w.next_page().await.unwrap().unwrap();
        assert_eq!(p1.iter().map(|r| r.id).collect::<Vec<_>>(), vec![10, 9]);
        // Short last page is fine.
        let p2 = w.next_page().await.unwrap().unwrap();
        assert_eq!(p2.len(), 1);
        assert!(w.next_page().await.unwrap().is_none());
        assert!(w.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deduplicates_items_relisted_across_pages() {
        let mut w = walker(
            &[
                ("https://www.hltv.org/results", "10 2024-05-03\n9 2024-05-03"),
                // Tie on the same date broke differently; 9 shows up again.
                ("https://www.hltv.org/results?offset=2", "9 2024-05-03\n8 2024-05-02"),
                ("https://www.hltv.org/results?offset=4", ""),
            ],
            range("2024-01-01", "2024-12-31"),
        );

        let mut ids = Vec::new();
        while let Some(page) = w.next_page().await.unwrap() {
            ids.extend(page.into_iter().map(|r| r.id));
        }
        assert_eq!(ids, vec![10, 9, 8]);
    }

    #[tokio::test]
    async fn stops_once_a_page_crosses_the_range_start() {
        let mut w = walker(
            &[
                ("https://www.hltv.org/results", "10 2024-05-03\n9 2024-05-02"),
                ("https://www.hltv.org/results?offset=2", "8 2024-05-01\n7 2024-04-20"),
                ("https://www.hltv.org/results?offset=4", "6 2024-04-19"),
            ],
            range("2024-05-01", "2024-05-31"),
        );

        let p1 = w.next_page().await.unwrap().unwrap();
        assert_eq!(p1.len(), 2);
        // Page 2 straddles the boundary: in-range item kept, walk ends.
        let p2 = w.next_page().await.unwrap().unwrap();
        assert_eq!(p2.iter().map(|r| r.id).collect::<Vec<_>>(), vec![8]);
        assert!(w.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn items_newer_than_the_range_end_are_dropped_without_stopping() {
        let mut w = walker(
            &[
                ("https://www.hltv.org/results", "10 2024-06-03\n9 2024-05-30"),
                ("https://www.hltv.org/results?offset=2", ""),
            ],
            range("2024-05-01", "2024-05-31"),
        );

        let p1 = w.next_page().await.unwrap().unwrap();
        assert_eq!(p1.iter().map(|r| r.id).collect::<Vec<_>>(), vec![9]);
    }

    #[tokio::test]
    async fn failed_page_fetch_does_not_advance_the_cursor() {
        let mut w = walker(&[], range("2024-01-01", "2024-12-31"));
        assert_eq!(w.offset(), 0);
        assert!(w.next_page().await.is_err());
        assert_eq!(w.offset(), 0);
    }
}
