/// USGS NWIS Water Services client
///
/// Issues the per-unit feed requests against the instantaneous-value and
/// daily-value services. The service is slow and rate sensitive, so every
/// request goes through a shared rate limiter, carries an identifying
/// `User-Agent`, and is retried with linear backoff on timeouts, transport
/// errors and 5xx/429 answers. Client errors (4xx) are never retried.
///
/// API Documentation: https://waterservices.usgs.gov/docs/

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::debug;

use crate::config::{FeedConfig, NwisConfig};
use crate::model::HarvestError;

// ============================================================================
// URL construction
// ============================================================================

/// Builds the request URL for one feed of one unit.
///
/// `siteStatus=active` keeps decommissioned gauges out of the response so
/// they never reach the snapshot.
pub fn build_feed_url(base_url: &str, unit: &str, feed: &FeedConfig) -> String {
    format!(
        "{}/{}/?format=json&stateCd={}&parameterCd={}&period={}&siteStatus=active",
        base_url.trim_end_matches('/'),
        feed.service.path(),
        unit,
        feed.parameter_codes.join(","),
        feed.period
    )
}

// ============================================================================
// Feed source seam
// ============================================================================

/// Anything able to return the raw JSON body of one feed for one unit.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_feed(&self, unit: &str, feed: &FeedConfig) -> Result<serde_json::Value, HarvestError>;
}

// ============================================================================
// HTTP client
// ============================================================================

pub struct NwisClient {
    http: reqwest::Client,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
    max_retries: u32,
    retry_delay: Duration,
}

impl NwisClient {
    pub fn new(config: &NwisConfig) -> Result<Self, HarvestError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| HarvestError::Config(format!("HTTP client: {}", e)))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    async fn get_once(&self, url: &str, timeout: Duration) -> Result<serde_json::Value, HarvestError> {
        self.limiter.until_ready().await;

        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest(e, timeout))?;

        if !response.status().is_success() {
            return Err(HarvestError::Http(response.status().as_u16()));
        }

        response.json::<serde_json::Value>().await.map_err(|e| {
            if e.is_decode() {
                HarvestError::Parse(e.to_string())
            } else {
                classify_reqwest(e, timeout)
            }
        })
    }
}

fn classify_reqwest(err: reqwest::Error, timeout: Duration) -> HarvestError {
    if err.is_timeout() {
        HarvestError::Timeout(timeout.as_millis() as u64)
    } else {
        HarvestError::from(err)
    }
}

/// Whether another attempt could plausibly succeed.
pub fn is_retryable(err: &HarvestError) -> bool {
    match err {
        HarvestError::Timeout(_) | HarvestError::Transport(_) => true,
        HarvestError::Http(code) => *code == 429 || *code >= 500,
        _ => false,
    }
}

#[async_trait]
impl FeedSource for NwisClient {
    async fn fetch_feed(&self, unit: &str, feed: &FeedConfig) -> Result<serde_json::Value, HarvestError> {
        let url = build_feed_url(&self.base_url, unit, feed);
        let mut attempt = 0;

        loop {
            debug!(unit, feed = %feed.name, attempt = attempt + 1, "GET {}", url);
            match self.get_once(&url, feed.timeout()).await {
                Ok(body) => return Ok(body),
                Err(err) if attempt < self.max_retries && is_retryable(&err) => {
                    attempt += 1;
                    debug!(unit, feed = %feed.name, "retrying after {}", err);
                    tokio::time::sleep(self.retry_delay * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
