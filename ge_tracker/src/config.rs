//! Runtime configuration for the tracker

use std::time::Duration;

/// OSRS Wiki latest prices endpoint
pub const LATEST_PRICES_URL: &str = "https://prices.runescape.wiki/api/v1/osrs/latest";

/// OSRS Wiki item mapping endpoint (full item catalog)
pub const ITEM_MAPPING_URL: &str = "https://prices.runescape.wiki/api/v1/osrs/mapping";

/// The Wiki asks for a descriptive User-Agent on every request
pub const DEFAULT_USER_AGENT: &str = "ge_tracker/0.1 (price cache)";

/// All tunables for fetching, caching and serving prices
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub latest_url: String,
    pub mapping_url: String,
    pub user_agent: String,
    /// Hard timeout for a single HTTP attempt
    pub request_timeout: Duration,
    /// Attempts per fetch, including the first one
    pub max_attempts: u32,
    /// Delay before retry `n` is `n * retry_backoff`
    pub retry_backoff: Duration,
    /// Minimum time between two successful refreshes
    pub refresh_interval: Duration,
    /// Retry delay after a failure when nothing was ever fetched
    pub cold_retry_delay: Duration,
    /// Lifetime of the in-memory item directory
    pub item_ttl: Duration,
    pub default_search_limit: usize,
    pub max_search_limit: usize,
    pub default_history_hours: u32,
    pub max_history_hours: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            latest_url: LATEST_PRICES_URL.to_string(),
            mapping_url: ITEM_MAPPING_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(10),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(1),
            refresh_interval: Duration::from_secs(60),
            cold_retry_delay: Duration::from_secs(30),
            item_ttl: Duration::from_secs(60 * 60),
            default_search_limit: 10,
            max_search_limit: 20,
            default_history_hours: 24,
            max_history_hours: 168,
        }
    }
}

impl TrackerConfig {
    /// Delay until the next attempt after a failure with no prior success.
    ///
    /// Never longer than the regular interval.
    pub fn cold_recovery_delay(&self) -> Duration {
        self.cold_retry_delay.min(self.refresh_interval)
    }

    /// Clamp a caller supplied search limit to `[0, max_search_limit]`
    pub fn clamp_search_limit(&self, limit: Option<usize>) -> usize {
        limit
            .unwrap_or(self.default_search_limit)
            .min(self.max_search_limit)
    }

    /// Clamp a caller supplied history window to `[1, max_history_hours]`
    pub fn clamp_history_hours(&self, hours: Option<u32>) -> u32 {
        hours
            .unwrap_or(self.default_history_hours)
            .clamp(1, self.max_history_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_upstream_policy() {
        let config = TrackerConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.item_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn cold_recovery_never_exceeds_interval() {
        let mut config = TrackerConfig::default();
        assert_eq!(config.cold_recovery_delay(), Duration::from_secs(30));

        config.refresh_interval = Duration::from_secs(10);
        assert_eq!(config.cold_recovery_delay(), Duration::from_secs(10));
    }

    #[test]
    fn search_limit_is_capped() {
        let config = TrackerConfig::default();
        assert_eq!(config.clamp_search_limit(None), 10);
        assert_eq!(config.clamp_search_limit(Some(5)), 5);
        assert_eq!(config.clamp_search_limit(Some(500)), 20);
        assert_eq!(config.clamp_search_limit(Some(0)), 0);
    }

    #[test]
    fn history_hours_are_clamped() {
        let config = TrackerConfig::default();
        assert_eq!(config.clamp_history_hours(None), 24);
        assert_eq!(config.clamp_history_hours(Some(0)), 1);
        assert_eq!(config.clamp_history_hours(Some(1000)), 168);
        assert_eq!(config.clamp_history_hours(Some(48)), 48);
    }
}
