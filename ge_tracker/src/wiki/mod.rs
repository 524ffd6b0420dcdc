//! OSRS Wiki real-time prices API client
//!
//! One shared `reqwest::Client` with a per-attempt timeout, plus a linear
//! retry policy used by every endpoint.

mod item_mapping;
mod latest_prices;

pub use item_mapping::CatalogItem;
pub use latest_prices::LatestPrice;

#[cfg(test)]
pub use item_mapping::make_test_item;

use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use std::time::Duration;

/// HTTP client for the Wiki price endpoints
#[derive(Clone)]
pub struct WikiClient {
    client: reqwest::Client,
    pub latest_url: String,
    pub mapping_url: String,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl WikiClient {
    pub fn new(config: &TrackerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| TrackerError::UpstreamUnavailable {
                attempts: 0,
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            latest_url: config.latest_url.clone(),
            mapping_url: config.mapping_url.clone(),
            max_attempts: config.max_attempts.max(1),
            retry_backoff: config.retry_backoff,
        })
    }

    /// GET `url` and return the body of the first successful response
    ///
    /// Timeouts, connection errors and non-success statuses are retried up to
    /// `max_attempts` times, sleeping `attempt * retry_backoff` in between.
    async fn get_with_retry(&self, url: &str) -> Result<Vec<u8>> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.try_get(url).await {
                Ok(body) => return Ok(body),
                Err(reason) => {
                    log::warn!(
                        "Attempt {}/{} for {} failed: {}",
                        attempt,
                        self.max_attempts,
                        url,
                        reason
                    );
                    last_error = reason;
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_backoff * attempt).await;
            }
        }

        Err(TrackerError::UpstreamUnavailable {
            attempts: self.max_attempts,
            reason: last_error,
        })
    }

    async fn try_get(&self, url: &str) -> std::result::Result<Vec<u8>, String> {
        let response = self.client.get(url).send().await.map_err(describe)?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }

        let body = response.bytes().await.map_err(describe)?;
        Ok(body.to_vec())
    }
}

fn describe(err: reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timed out: {}", err)
    } else {
        err.to_string()
    }
}
