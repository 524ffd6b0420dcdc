//! Domain types shared across the tracker

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

/// A tradeable item from the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    pub id: i64,
    pub name: String,
}

/// A validated price observation, not yet stamped with a time
#[derive(Debug, Clone, PartialEq)]
pub struct PriceCandidate {
    pub item_id: i64,
    pub high: f64,
    pub low: f64,
}

impl PriceCandidate {
    /// Stamp the candidate with the time of the refresh that persists it
    pub fn at(&self, timestamp: DateTime<Utc>) -> PricePoint {
        PricePoint {
            item_id: self.item_id,
            high: self.high,
            low: self.low,
            timestamp,
        }
    }
}

/// One persisted market observation. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricePoint {
    pub item_id: i64,
    pub high: f64,
    pub low: f64,
    pub timestamp: DateTime<Utc>,
}

impl PricePoint {
    /// Mid price, rounded half-up
    pub fn average(&self) -> i64 {
        mid_price(self.high, self.low)
    }
}

/// `round((high + low) / 2)` with halves rounded up
pub fn mid_price(high: f64, low: f64) -> i64 {
    ((high + low) / 2.0 + 0.5).floor() as i64
}

/// Convert a stored unix-millisecond timestamp back into a UTC instant
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Latest price answer for a single item
#[derive(Debug, Clone, Serialize)]
pub struct ItemPrice {
    pub item: Item,
    pub price: i64,
    pub high: f64,
    pub low: f64,
    pub timestamp: DateTime<Utc>,
}

/// One entry of a price history answer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub high: f64,
    pub low: f64,
    pub average: i64,
}

impl From<&PricePoint> for HistoryPoint {
    fn from(point: &PricePoint) -> Self {
        Self {
            timestamp: point.timestamp,
            high: point.high,
            low: point.low,
            average: point.average(),
        }
    }
}

/// Counters produced by one refresh cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    /// Valid candidates returned by the upstream
    pub fetched: usize,
    /// Candidates dropped because their item is not in the catalog
    pub unknown_items: usize,
    pub inserted: usize,
    /// Records that were already stored
    pub duplicates: usize,
    /// Records that failed to persist for any other reason
    pub errors: usize,
}

/// Read-only snapshot of the tracker's health
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub item_count: i64,
    pub price_point_count: i64,
    pub last_success_at: Option<DateTime<Utc>>,
    /// Seconds since the last successful refresh
    pub cache_age_secs: Option<i64>,
    pub is_refreshing: bool,
    pub refresh_runs: u64,
    pub refresh_failures: u64,
    pub last_report: Option<RefreshReport>,
    pub cached_item_ids: usize,
    pub cached_items: usize,
    pub scheduler_running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mid_price_of_even_sum() {
        assert_eq!(mid_price(100.0, 50.0), 75);
    }

    #[test]
    fn mid_price_rounds_half_up() {
        assert_eq!(mid_price(101.0, 50.0), 76);
        assert_eq!(mid_price(3.0, 2.0), 3);
    }

    #[test]
    fn history_point_carries_average() {
        let point = PricePoint {
            item_id: 4587,
            high: 101.0,
            low: 50.0,
            timestamp: from_millis(1_700_000_000_000),
        };
        let entry = HistoryPoint::from(&point);
        assert_eq!(entry.average, 76);
        assert_eq!(entry.timestamp, point.timestamp);
    }

    #[test]
    fn millis_round_trip() {
        let now = from_millis(1_717_171_717_171);
        assert_eq!(now.timestamp_millis(), 1_717_171_717_171);
    }
}
