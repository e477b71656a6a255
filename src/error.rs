use ::scraper::error::SelectorErrorKind;
use std::num::{ParseFloatError, ParseIntError};
use std::path::PathBuf;

/// All errors that can occur while collecting HLTV match data.
///
/// The orchestrator drives its retry/skip policy off the classification
/// helpers ([`is_transient`](HltvError::is_transient),
/// [`is_blocked`](HltvError::is_blocked), ...), so every variant belongs to
/// exactly one class: transient, blocked, not-found, parse, checkpoint or
/// storage.
#[derive(thiserror::Error, Debug)]
pub enum HltvError {
    /// HTTP request failed (network, DNS, TLS, timeout, etc.).
    #[error("http request failed for {url}: {source}")]
    Http {
        url: String,
        source: reqwest::Error,
    },

    /// Server returned a non-success HTTP status code.
    #[error("unexpected status {status} for {url}")]
    UnexpectedStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    /// Failed to read the response body as text.
    #[error("failed to read response body from {url}: {source}")]
    ResponseBody {
        url: String,
        source: reqwest::Error,
    },

    /// The source served a block or anti-bot challenge response.
    #[error("blocked by source for {url}: {detail}")]
    Blocked { url: String, detail: String },

    /// The requested page does not exist (removed or never published).
    #[error("page not found: {url}")]
    NotFound { url: String },

    /// A CSS selector string could not be parsed.
    #[error("invalid CSS selector: {0}")]
    Selector(String),

    /// Failed to parse an integer from scraped text.
    #[error("failed to parse integer: {0}")]
    IntParse(#[from] ParseIntError),

    /// Failed to parse a float from scraped text.
    #[error("failed to parse float: {0}")]
    FloatParse(#[from] ParseFloatError),

    /// Failed to parse a date/time from scraped text.
    #[error("failed to parse date: {0}")]
    DateParse(#[from] chrono::ParseError),

    /// An expected HTML element was not found on the page.
    #[error("expected element not found: {context}")]
    ElementNotFound { context: &'static str },

    /// Page content did not match the expected shape.
    #[error("failed to parse page content: {context}")]
    Parse { context: String },

    /// An extracted record violated a data-model invariant.
    #[error("invalid record: {context}")]
    InvalidRecord { context: String },

    /// Checkpoint file could not be read or written.
    #[error("checkpoint I/O failed for {path}: {source}")]
    Checkpoint {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Checkpoint file exists but does not deserialize.
    #[error("checkpoint format error: {0}")]
    CheckpointFormat(#[from] serde_json::Error),

    /// Checkpoint was written by a different format version.
    #[error("checkpoint version mismatch: found {found}, expected {expected}")]
    CheckpointVersion { found: u32, expected: u32 },

    /// Storage backend I/O failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage backend failed to read or write CSV content.
    #[error("storage CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl HltvError {
    /// Network-level failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HltvError::Http { .. }
                | HltvError::ResponseBody { .. }
                | HltvError::UnexpectedStatus { .. }
        )
    }

    /// The source is actively defending; retrying without escalated backoff
    /// would make things worse.
    pub fn is_blocked(&self) -> bool {
        matches!(self, HltvError::Blocked { .. })
    }

    /// Permanent absence, never retried.
    pub fn is_not_found(&self) -> bool {
        matches!(self, HltvError::NotFound { .. })
    }

    /// The page was fetched but its content could not be understood.
    pub fn is_parse(&self) -> bool {
        matches!(
            self,
            HltvError::Selector(_)
                | HltvError::IntParse(_)
                | HltvError::FloatParse(_)
                | HltvError::DateParse(_)
                | HltvError::ElementNotFound { .. }
                | HltvError::Parse { .. }
                | HltvError::InvalidRecord { .. }
        )
    }

    /// Storage or checkpoint failure; fatal to the whole run.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            HltvError::Io(_)
                | HltvError::Csv(_)
                | HltvError::Checkpoint { .. }
                | HltvError::CheckpointFormat(_)
                | HltvError::CheckpointVersion { .. }
        )
    }
}

impl<'a> From<SelectorErrorKind<'a>> for HltvError {
    fn from(err: SelectorErrorKind<'a>) -> Self {
        HltvError::Selector(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HltvError>;
