use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

/// Top-level collector configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectorConfig {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// HTTP client and rate-limiter settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Minimum spacing between any two outbound requests, process-wide.
    #[serde(default = "default_request_interval_ms")]
    pub request_interval_ms: u64,

    /// Random extra delay added on top of the interval, never subtracted.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

/// Retry, backoff and scheduling settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Bounded worker pool size for detail-page processing. Egress pacing is
    /// owned by the rate limiter, so raising this never raises request rate.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Units of work between checkpoint-friendly chunk boundaries.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Nominal listing page size; HLTV paginates results in steps of 100.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// How far back an incremental run looks when storage is empty.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

/// Storage backend settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Checkpoint file location; defaults to `checkpoint.json` in `data_dir`.
    #[serde(default)]
    pub checkpoint_file: Option<PathBuf>,
}

fn default_base_url() -> String {
    "https://www.hltv.org".to_string()
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36"
        .to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_interval_ms() -> u64 {
    2500
}
fn default_jitter_ms() -> u64 {
    500
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    2000
}
fn default_backoff_cap_ms() -> u64 {
    60_000
}
fn default_workers() -> usize {
    3
}
fn default_batch_size() -> usize {
    100
}
fn default_page_size() -> u32 {
    100
}
fn default_lookback_days() -> u32 {
    7
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl CollectorConfig {
    /// Load configuration from `config/default.toml`, `config/local.toml`
    /// and `HLTV__`-prefixed environment variables, in that order.
    pub fn load() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("HLTV").separator("__"))
            .build()
            .map_err(|e| crate::error::HltvError::Parse {
                context: format!("configuration: {e}"),
            })?;

        cfg.try_deserialize()
            .map_err(|e| crate::error::HltvError::Parse {
                context: format!("configuration: {e}"),
            })
    }

    /// Resolved checkpoint file path.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.storage
            .checkpoint_file
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("checkpoint.json"))
    }

    /// Directory where raw pages that failed to parse are kept for offline
    /// diagnosis.
    pub fn failed_pages_dir(&self) -> PathBuf {
        self.storage.data_dir.join("failed_pages")
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            crawl: CrawlConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            request_interval_ms: default_request_interval_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            workers: default_workers(),
            batch_size: default_batch_size(),
            page_size: default_page_size(),
            lookback_days: default_lookback_days(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            checkpoint_file: None,
        }
    }
}
