use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, instrument, warn};

use crate::config::FetchConfig;
use crate::error::{HltvError, Result};

/// Fixed-interval rate limiter shared by every caller in the process.
///
/// The single most important correctness property of the fetch layer: any
/// two grants are at least `interval` apart regardless of how many workers
/// are waiting. The mutex is held across the sleep on purpose so waiters
/// queue up behind it instead of racing for the same slot.
pub struct RateLimiter {
    interval: Duration,
    jitter: Duration,
    last: tokio::sync::Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration, jitter: Duration) -> Self {
        Self {
            interval,
            jitter,
            last: tokio::sync::Mutex::new(None),
        }
    }

    /// Wait until the next request slot is available.
    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let jitter = if self.jitter.is_zero() {
                Duration::ZERO
            } else {
                Duration::from_millis(rand::rng().random_range(0..=self.jitter.as_millis() as u64))
            };
            sleep_until(prev + self.interval + jitter).await;
        }
        *last = Some(Instant::now());
    }
}

/// The seam between the crawl pipeline and the network.
///
/// Implementations return the raw page body or a typed failure and never
/// retry internally; retry policy lives in the orchestrator so backoff can
/// be coordinated with rate limiting instead of stacking delays.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Rate-limited HTTP client for HLTV.org.
///
/// Wraps a [`reqwest::Client`] configured with browser-like headers and
/// funnels every request through one [`RateLimiter`].
pub struct HltvClient {
    http: reqwest::Client,
    limiter: RateLimiter,
}

impl HltvClient {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HltvError::Http {
                url: config.base_url.clone(),
                source: e,
            })?;
        Ok(Self::with_client(http, config))
    }

    /// Create a client using the provided [`reqwest::Client`]. Use this when
    /// you need to configure proxies, extra headers, etc.
    pub fn with_client(http: reqwest::Client, config: &FetchConfig) -> Self {
        Self {
            http,
            limiter: RateLimiter::new(
                Duration::from_millis(config.request_interval_ms),
                Duration::from_millis(config.jitter_ms),
            ),
        }
    }
}

#[async_trait]
impl PageFetcher for HltvClient {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<String> {
        self.limiter.acquire().await;
        debug!(url, "fetching page");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| HltvError::Http {
                url: url.to_owned(),
                source: e,
            })?;

        let status = response.status();
        if let Some(err) = classify_status(url, status) {
            if err.is_blocked() {
                warn!(url, %status, "source returned a blocking status");
            }
            return Err(err);
        }

        let body = response.text().await.map_err(|e| HltvError::ResponseBody {
            url: url.to_owned(),
            source: e,
        })?;

        // Anti-bot challenges come back as 200 pages with no match content.
        if is_challenge_page(&body) {
            warn!(url, "source served a challenge page");
            return Err(HltvError::Blocked {
                url: url.to_owned(),
                detail: "challenge page".to_string(),
            });
        }

        Ok(body)
    }
}

/// Map an HTTP status onto the error taxonomy. `None` means success.
pub(crate) fn classify_status(url: &str, status: StatusCode) -> Option<HltvError> {
    if status.is_success() {
        return None;
    }
    match status {
        StatusCode::NOT_FOUND => Some(HltvError::NotFound {
            url: url.to_owned(),
        }),
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            Some(HltvError::Blocked {
                url: url.to_owned(),
                detail: format!("status {status}"),
            })
        }
        _ => Some(HltvError::UnexpectedStatus {
            url: url.to_owned(),
            status,
        }),
    }
}

/// Heuristic for Cloudflare-style interstitial pages served with HTTP 200.
pub(crate) fn is_challenge_page(body: &str) -> bool {
    body.contains("cf-challenge") || body.contains("Just a moment...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_matches_taxonomy() {
        let not_found = classify_status("u", StatusCode::NOT_FOUND).unwrap();
        assert!(not_found.is_not_found());

        for status in [
            StatusCode::FORBIDDEN,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            assert!(classify_status("u", status).unwrap().is_blocked());
        }

        let server_error = classify_status("u", StatusCode::BAD_GATEWAY).unwrap();
        assert!(server_error.is_transient());

        assert!(classify_status("u", StatusCode::OK).is_none());
    }

    #[test]
    fn challenge_markers_are_detected() {
        assert!(is_challenge_page("<title>Just a moment...</title>"));
        assert!(is_challenge_page("<div id=\"cf-challenge\"></div>"));
        assert!(!is_challenge_page("<div class=\"results-all\"></div>"));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquires_are_spaced_by_the_interval() {
        use std::sync::Arc;

        let interval = Duration::from_millis(200);
        let limiter = Arc::new(RateLimiter::new(interval, Duration::ZERO));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut grants = Vec::new();
        for handle in handles {
            grants.push(handle.await.unwrap());
        }
        grants.sort();

        for pair in grants.windows(2) {
            assert!(
                pair[1] - pair[0] >= interval,
                "grants {:?} closer than {:?}",
                pair[1] - pair[0],
                interval
            );
        }
    }
}
