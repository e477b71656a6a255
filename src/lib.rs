pub use client::{HltvClient, PageFetcher};
pub use collect::{Collector, RunHandle, RunState, RunStatus, SkipReason};
pub use config::CollectorConfig;
pub use error::{HltvError, Result};
pub use extract::{Extractor, HtmlExtractor};
pub use model::{CrawlCheckpoint, DateRange, MatchBundle, MatchRef, RunCounts, RunMode};
pub use storage::{CsvStorage, StorageBackend, StorageStats, StoreOutcome};

pub mod client;
pub mod collect;
pub mod config;
pub mod error;
pub mod extract;
pub mod model;
pub mod pagination;
pub mod progress;
pub mod storage;
