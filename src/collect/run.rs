use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::client::{HltvClient, PageFetcher};
use crate::config::{CollectorConfig, CrawlConfig};
use crate::error::{HltvError, Result};
use crate::extract::{Extractor, HtmlExtractor};
use crate::model::{CrawlCheckpoint, DateRange, MatchRef, RunMode};
use crate::pagination::ResultsWalker;
use crate::progress::CheckpointStore;
use crate::storage::{CsvStorage, StorageBackend, StorageStats};

use super::{RunHandle, RunShared, RunState, SkipReason};

/// Entry point for collection runs.
///
/// A collector owns the fetch, extraction, storage and checkpoint layers
/// and spawns one background task per run. Runs are driven entirely through
/// the returned [`RunHandle`]; the collector itself stays usable for status
/// queries while a run is in flight.
pub struct Collector {
    config: CollectorConfig,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn Extractor>,
    storage: Arc<dyn StorageBackend>,
    checkpoints: Arc<CheckpointStore>,
}

impl Collector {
    /// Build a collector with the production stack: rate-limited HTTP
    /// client, HTML extractor and CSV storage under the configured data
    /// directory.
    pub fn new(config: CollectorConfig) -> Result<Self> {
        let fetcher: Arc<dyn PageFetcher> = Arc::new(HltvClient::new(&config.fetch)?);
        let storage: Arc<dyn StorageBackend> = Arc::new(CsvStorage::open(&config.storage.data_dir)?);
        let checkpoints = Arc::new(CheckpointStore::new(config.checkpoint_path()));
        Ok(Self {
            fetcher,
            extractor: Arc::new(HtmlExtractor::new()),
            storage,
            checkpoints,
            config,
        })
    }

    /// Assemble a collector from explicit parts. This is the seam the
    /// pipeline tests use to substitute fakes for the network and storage.
    pub fn with_parts(
        config: CollectorConfig,
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn Extractor>,
        storage: Arc<dyn StorageBackend>,
        checkpoints: Arc<CheckpointStore>,
    ) -> Self {
        Self {
            config,
            fetcher,
            extractor,
            storage,
            checkpoints,
        }
    }

    /// Start a historical run over an inclusive date range.
    ///
    /// `batch_size` bounds how many units are dispatched between
    /// cancellation checks within one listing page; pass
    /// `config.crawl.batch_size` unless a caller has a reason to chunk
    /// differently. An interrupted run over the same range resumes from its
    /// checkpoint.
    pub fn start_historical(&self, range: DateRange, batch_size: usize) -> RunHandle {
        self.spawn(RunMode::Historical, Some(range), batch_size)
    }

    /// Start an incremental run: collect everything newer than the most
    /// recent match already in storage, or fall back to the configured
    /// lookback window when storage is empty.
    pub fn start_incremental(&self) -> RunHandle {
        self.spawn(RunMode::Incremental, None, self.config.crawl.batch_size)
    }

    /// Aggregate counts over everything in storage.
    pub async fn storage_stats(&self) -> Result<StorageStats> {
        self.storage.stats().await
    }

    fn spawn(&self, mode: RunMode, range: Option<DateRange>, batch_size: usize) -> RunHandle {
        let shared = Arc::new(RunShared::new(mode));
        let engine = Engine {
            config: self.config.clone(),
            fetcher: Arc::clone(&self.fetcher),
            extractor: Arc::clone(&self.extractor),
            storage: Arc::clone(&self.storage),
            checkpoints: Arc::clone(&self.checkpoints),
            shared: Arc::clone(&shared),
        };
        let task = tokio::spawn(async move { engine.run(mode, range, batch_size).await });
        RunHandle::new(shared, task)
    }
}

/// What processing one match reference came to.
enum ItemOutcome {
    /// Stored, skipped or given up on; accounted for in the run counts.
    Done,
    /// The source blocked every attempt; the run should pause.
    Blocked,
    /// Storage failed; the run cannot continue.
    Fatal(HltvError),
}

/// Whether the run may continue after a chunk.
enum ChunkSignal {
    Continue,
    Blocked,
}

/// The run task. Cheap to clone; every field is shared.
#[derive(Clone)]
struct Engine {
    config: CollectorConfig,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn Extractor>,
    storage: Arc<dyn StorageBackend>,
    checkpoints: Arc<CheckpointStore>,
    shared: Arc<RunShared>,
}

impl Engine {
    #[instrument(skip_all, fields(%mode))]
    async fn run(self, mode: RunMode, range: Option<DateRange>, batch_size: usize) {
        self.shared.set_state(RunState::Running);
        let state = match self.crawl(mode, range, batch_size).await {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, "run failed");
                RunState::Failed
            }
        };
        self.shared.set_state(state);
    }

    async fn crawl(
        &self,
        mode: RunMode,
        requested: Option<DateRange>,
        batch_size: usize,
    ) -> Result<RunState> {
        let range = match requested {
            Some(range) => range,
            None => match self.incremental_range().await? {
                Some(range) => range,
                None => {
                    info!("storage is already up to date");
                    return Ok(RunState::Completed);
                }
            },
        };
        info!(start = %range.start, end = %range.end, "starting crawl");

        let previous = match self.checkpoints.load() {
            Ok(previous) => previous,
            Err(e @ (HltvError::CheckpointFormat(_) | HltvError::CheckpointVersion { .. })) => {
                warn!(error = %e, "existing checkpoint is unusable, starting fresh");
                None
            }
            Err(e) => return Err(e),
        };
        let mut checkpoint = match previous {
            Some(cp) if cp.resumes(mode, Some(range)) => {
                info!(
                    next_offset = cp.next_offset,
                    stored = cp.counts.stored,
                    "resuming interrupted run"
                );
                cp
            }
            _ => CrawlCheckpoint::new(mode, Some(range)),
        };
        self.shared.seed_counts(checkpoint.counts);

        let mut walker = ResultsWalker::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.extractor),
            self.config.fetch.base_url.clone(),
            range,
            self.config.crawl.page_size,
            checkpoint.next_offset,
        );

        loop {
            // The checkpoint still points at the first unprocessed page, so
            // pausing here loses nothing.
            let page_offset = walker.offset();
            if self.shared.is_cancelled() {
                info!("cancel requested, pausing run");
                self.commit(&mut checkpoint, page_offset)?;
                return Ok(RunState::Paused);
            }

            let page = match self.next_page_with_retry(&mut walker).await {
                Ok(page) => page,
                Err(e) if e.is_storage() => return Err(e),
                Err(e) => {
                    warn!(error = %e, offset = page_offset, "listing unavailable, pausing run");
                    self.commit(&mut checkpoint, page_offset)?;
                    return Ok(RunState::Paused);
                }
            };
            let Some(refs) = page else { break };

            for chunk in refs.chunks(batch_size.max(1)) {
                if self.shared.is_cancelled() {
                    info!("cancel requested, pausing run");
                    self.commit(&mut checkpoint, page_offset)?;
                    return Ok(RunState::Paused);
                }
                match self.process_chunk(chunk).await? {
                    ChunkSignal::Continue => {}
                    ChunkSignal::Blocked => {
                        warn!("source is blocking requests, pausing run");
                        self.commit(&mut checkpoint, page_offset)?;
                        return Ok(RunState::Paused);
                    }
                }
            }

            // A cancel that landed during the final chunk may have cut
            // units short, so the page cannot be committed as complete; the
            // resumed run re-walks it and skips whatever did get stored.
            if self.shared.is_cancelled() {
                info!("cancel requested, pausing run");
                self.commit(&mut checkpoint, page_offset)?;
                return Ok(RunState::Paused);
            }

            self.shared.with_counts(|c| c.pages += 1);
            self.commit(&mut checkpoint, walker.offset())?;
        }

        checkpoint.completed = true;
        self.commit(&mut checkpoint, walker.offset())?;
        let counts = self.shared.counts();
        info!(
            pages = counts.pages,
            stored = counts.stored,
            attempted = counts.attempted(),
            "crawl complete"
        );
        Ok(RunState::Completed)
    }

    /// Date range for an incremental run, `None` when there is nothing
    /// newer to collect.
    ///
    /// The range starts on the day of the newest stored match, not the day
    /// after: listings only carry dates, and a match played later that same
    /// day is newer than the stored timestamp. Re-walking the cutoff day is
    /// cheap because the `has_match` pre-check skips stored matches without
    /// a detail fetch.
    async fn incremental_range(&self) -> Result<Option<DateRange>> {
        let today = Utc::now().date_naive();
        let start = match self.storage.latest_known_date().await? {
            Some(latest) => latest.date(),
            None => {
                let lookback = self.config.crawl.lookback_days;
                info!(lookback_days = lookback, "storage is empty, using lookback window");
                today
                    .checked_sub_days(Days::new(u64::from(lookback)))
                    .unwrap_or(today)
            }
        };
        if start > today {
            return Ok(None);
        }
        Ok(Some(DateRange::new(start, today)))
    }

    fn commit(&self, checkpoint: &mut CrawlCheckpoint, next_offset: u32) -> Result<()> {
        checkpoint.next_offset = next_offset;
        checkpoint.counts = self.shared.counts();
        checkpoint.updated_at = Utc::now();
        self.checkpoints.commit(checkpoint)
    }

    /// Fetch the next listing page, retrying transient and blocked failures
    /// with backoff. The walker's cursor only moves on success, so every
    /// retry re-requests the same offset.
    async fn next_page_with_retry(
        &self,
        walker: &mut ResultsWalker,
    ) -> Result<Option<Vec<MatchRef>>> {
        let max = self.config.crawl.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match walker.next_page().await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_blocked() && attempt + 1 < max => {
                    let strikes = self.shared.blocked_strike();
                    let delay = backoff_delay(&self.config.crawl, attempt + strikes);
                    warn!(error = %e, ?delay, "blocked while listing, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_transient() && attempt + 1 < max => {
                    let delay = backoff_delay(&self.config.crawl, attempt);
                    debug!(error = %e, ?delay, "transient listing failure, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
            attempt += 1;
        }
    }

    /// Dispatch one chunk of references to the bounded worker pool and wait
    /// for all of them.
    async fn process_chunk(&self, refs: &[MatchRef]) -> Result<ChunkSignal> {
        let semaphore = Arc::new(Semaphore::new(self.config.crawl.workers.max(1)));
        let mut tasks: JoinSet<ItemOutcome> = JoinSet::new();

        for r in refs {
            if self.shared.is_cancelled() {
                break;
            }
            if !self.shared.try_claim(r.id) {
                debug!(id = r.id, "id already in flight, skipping");
                continue;
            }
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let engine = self.clone();
            let item = r.clone();
            tasks.spawn(async move {
                let outcome = engine.process_item(&item).await;
                engine.shared.release(item.id);
                drop(permit);
                outcome
            });
        }

        let mut signal = ChunkSignal::Continue;
        let mut fatal = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(ItemOutcome::Done) => {}
                Ok(ItemOutcome::Blocked) => signal = ChunkSignal::Blocked,
                Ok(ItemOutcome::Fatal(e)) => {
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
                Err(e) => {
                    error!(error = %e, "worker task panicked");
                    self.shared.with_counts(|c| c.failed += 1);
                }
            }
        }
        match fatal {
            Some(e) => Err(e),
            None => Ok(signal),
        }
    }

    /// Process one match reference end to end: skip check, fetch with
    /// retry, extract, store. Never returns a non-fatal error; every
    /// outcome lands in the run counts.
    #[instrument(skip(self, item), fields(id = item.id))]
    async fn process_item(&self, item: &MatchRef) -> ItemOutcome {
        match self.storage.has_match(item.id).await {
            Ok(true) => {
                debug!("already stored, skipping");
                self.shared.record_skip(SkipReason::AlreadyStored);
                return ItemOutcome::Done;
            }
            Ok(false) => {}
            Err(e) => return ItemOutcome::Fatal(e),
        }

        let max = self.config.crawl.max_attempts.max(1);
        for attempt in 0..max {
            if self.shared.is_cancelled() {
                return ItemOutcome::Done;
            }

            let html = match self.fetcher.fetch(&item.url).await {
                Ok(html) => html,
                Err(e) if e.is_not_found() => {
                    debug!("match page is gone, skipping");
                    self.shared.record_skip(SkipReason::NotFound);
                    return ItemOutcome::Done;
                }
                Err(e) if e.is_blocked() => {
                    let strikes = self.shared.blocked_strike();
                    if attempt + 1 >= max {
                        warn!(error = %e, attempts = max, "still blocked after retries");
                        return ItemOutcome::Blocked;
                    }
                    let delay = backoff_delay(&self.config.crawl, attempt + strikes);
                    warn!(error = %e, ?delay, "blocked, backing off");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) if e.is_transient() => {
                    if attempt + 1 >= max {
                        warn!(error = %e, attempts = max, "giving up on match");
                        self.shared.with_counts(|c| c.failed += 1);
                        return ItemOutcome::Done;
                    }
                    let delay = backoff_delay(&self.config.crawl, attempt);
                    debug!(error = %e, ?delay, "transient fetch failure, backing off");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "unexpected fetch error, counting as failed");
                    self.shared.with_counts(|c| c.failed += 1);
                    return ItemOutcome::Done;
                }
            };

            return match self.extractor.match_detail(item.id, &html) {
                Ok(bundle) => match self.storage.store_match(&bundle).await {
                    Ok(outcome) => {
                        debug!(?outcome, "stored match");
                        self.shared.with_counts(|c| c.stored += 1);
                        ItemOutcome::Done
                    }
                    Err(e) if e.is_parse() => {
                        self.preserve_failed_page(item.id, &html);
                        warn!(error = %e, "extracted records were inconsistent, skipping");
                        self.shared.record_skip(SkipReason::ParseError);
                        ItemOutcome::Done
                    }
                    Err(e) => ItemOutcome::Fatal(e),
                },
                Err(e) => {
                    self.preserve_failed_page(item.id, &html);
                    warn!(error = %e, "page did not parse, skipping");
                    self.shared.record_skip(SkipReason::ParseError);
                    ItemOutcome::Done
                }
            };
        }
        ItemOutcome::Done
    }

    /// Keep the raw body of a page that failed to parse so the layout drift
    /// can be diagnosed offline. Best-effort; never fails the unit.
    fn preserve_failed_page(&self, id: u64, html: &str) {
        let dir = self.config.failed_pages_dir();
        let written =
            std::fs::create_dir_all(&dir).and_then(|_| std::fs::write(dir.join(format!("{id}.html")), html));
        match written {
            Ok(()) => debug!(id, "preserved raw page"),
            Err(e) => warn!(id, error = %e, "could not preserve raw page"),
        }
    }
}

/// Exponential backoff with a hard cap: `base * 2^exponent`, capped.
fn backoff_delay(crawl: &CrawlConfig, exponent: u32) -> Duration {
    let base = crawl.backoff_base_ms.max(1);
    let delay = base
        .saturating_mul(1u64 << exponent.min(16))
        .min(crawl.backoff_cap_ms);
    Duration::from_millis(delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crawl_config(base_ms: u64, cap_ms: u64) -> CrawlConfig {
        CrawlConfig {
            backoff_base_ms: base_ms,
            backoff_cap_ms: cap_ms,
            ..CrawlConfig::default()
        }
    }

    #[test]
    fn backoff_doubles_until_the_cap() {
        let crawl = crawl_config(1000, 10_000);
        assert_eq!(backoff_delay(&crawl, 0), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&crawl, 1), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&crawl, 2), Duration::from_millis(4000));
        assert_eq!(backoff_delay(&crawl, 3), Duration::from_millis(8000));
        assert_eq!(backoff_delay(&crawl, 4), Duration::from_millis(10_000));
        assert_eq!(backoff_delay(&crawl, 30), Duration::from_millis(10_000));
    }

    #[test]
    fn backoff_never_overflows_on_large_exponents() {
        let crawl = crawl_config(u64::MAX / 2, u64::MAX);
        assert_eq!(backoff_delay(&crawl, 63), Duration::from_millis(u64::MAX));
    }
}
