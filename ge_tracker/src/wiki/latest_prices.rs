//! Latest prices endpoint: fetching, schema validation and filtering

use super::WikiClient;
use crate::error::{Result, TrackerError};
use crate::models::PriceCandidate;
use serde::Deserialize;
use std::collections::HashMap;

/// Latest high/low pair for a single item as reported by the Wiki
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LatestPrice {
    pub high: Option<f64>,
    pub low: Option<f64>,
    #[serde(default)]
    pub high_time: Option<i64>,
    #[serde(default)]
    pub low_time: Option<i64>,
}

/// Full response body: `{"data": {"<item id>": {...}}}`
#[derive(Debug, Deserialize)]
struct LatestPricesResponse {
    data: HashMap<String, LatestPrice>,
}

impl WikiClient {
    /// Fetch the latest price snapshot and keep only usable candidates
    ///
    /// Fails with `UpstreamUnavailable` once retries are exhausted, or with
    /// `InvalidResponseShape` (never retried) when the body does not match the
    /// expected schema.
    pub async fn fetch_latest_prices(&self) -> Result<Vec<PriceCandidate>> {
        log::info!("Fetching latest prices from the OSRS Wiki...");

        let body = self.get_with_retry(&self.latest_url).await?;
        let candidates = parse_latest_prices(&body)?;

        log::info!("Fetched {} valid prices from the API", candidates.len());
        Ok(candidates)
    }
}

/// Validate the payload and map it to price candidates
///
/// Entries with a missing, null or non-positive `high`/`low` are dropped, as are
/// keys that are not numeric item ids. Output is ordered by item id.
pub fn parse_latest_prices(body: &[u8]) -> Result<Vec<PriceCandidate>> {
    let response: LatestPricesResponse = serde_json::from_slice(body)
        .map_err(|e| TrackerError::InvalidResponseShape(e.to_string()))?;

    let total = response.data.len();
    let mut candidates: Vec<PriceCandidate> = response
        .data
        .into_iter()
        .filter_map(|(key, price)| to_candidate(&key, &price))
        .collect();
    candidates.sort_by_key(|c| c.item_id);

    if candidates.len() < total {
        log::debug!(
            "Dropped {} of {} price entries with missing or invalid values",
            total - candidates.len(),
            total
        );
    }

    Ok(candidates)
}

fn to_candidate(key: &str, price: &LatestPrice) -> Option<PriceCandidate> {
    let item_id = match key.parse::<i64>() {
        Ok(id) => id,
        Err(_) => {
            log::debug!("Skipping non-numeric item key: {}", key);
            return None;
        }
    };

    match (price.high, price.low) {
        (Some(high), Some(low)) if high > 0.0 && low > 0.0 => {
            Some(PriceCandidate { item_id, high, low })
        }
        _ => None,
    }
}
