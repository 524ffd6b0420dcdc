//! Price refresh orchestration
//!
//! Decides when to pull a fresh snapshot from the Wiki, collapses concurrent
//! triggers into one upstream call, filters the result against the item
//! directory and persists it. Errors never escape [`RefreshOrchestrator::refresh`];
//! they only show up as "freshness did not advance".
//!
//! State transitions are always `Idle -> Refreshing -> Idle`. The gate check and
//! the installation of the in-flight slot happen under one lock, so at most one
//! refresh runs at a time and every caller inside a gate window shares it.

use crate::config::TrackerConfig;
use crate::database::Store;
use crate::directory::ItemDirectory;
use crate::error::{Result, TrackerError};
use crate::models::{PricePoint, RefreshReport};
use crate::wiki::WikiClient;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// What a call to [`RefreshOrchestrator::refresh`] ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The gate was closed; nothing happened
    Skipped,
    /// This call started a refresh and waited for it
    Ran,
    /// Another refresh was already running; this call waited for it
    Joined,
}

/// Mutable refresh bookkeeping, guarded by a single mutex
#[derive(Debug, Default)]
pub struct RefreshState {
    last_success_at: Option<DateTime<Utc>>,
    /// Earliest instant a non-forced refresh may start
    next_eligible: Option<Instant>,
    /// Completion signal of the running refresh, if any
    in_flight: Option<watch::Receiver<bool>>,
    runs: u64,
    failures: u64,
    last_report: Option<RefreshReport>,
}

impl RefreshState {
    /// Whether a non-forced refresh may start at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_eligible.map_or(true, |at| now >= at)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        self.last_success_at
    }

    pub fn record_success(
        &mut self,
        now: Instant,
        wall: DateTime<Utc>,
        interval: Duration,
        report: RefreshReport,
    ) {
        self.runs += 1;
        self.last_success_at = Some(wall);
        self.next_eligible = Some(now + interval);
        self.last_report = Some(report);
    }

    /// Failure bookkeeping
    ///
    /// A fetch failure before any success makes the next attempt eligible after
    /// `cold_delay` instead of the full interval. Otherwise the gate is untouched.
    pub fn record_failure(&mut self, now: Instant, fetch_failed: bool, cold_delay: Duration) {
        self.runs += 1;
        self.failures += 1;
        if fetch_failed && self.last_success_at.is_none() {
            self.next_eligible = Some(now + cold_delay);
        }
    }

    /// How long a periodic scheduler should wait before its next tick
    pub fn next_attempt_delay(&self, now: Instant, interval: Duration) -> Duration {
        match self.next_eligible {
            Some(at) if at > now => (at - now).min(interval),
            _ => interval,
        }
    }

    /// Time until the gate opens, `None` when it is already open
    pub fn next_eligible_in(&self, now: Instant) -> Option<Duration> {
        self.next_eligible
            .filter(|at| *at > now)
            .map(|at| at - now)
    }
}

/// Read-only view of the refresh state
#[derive(Debug, Clone)]
pub struct RefreshStatus {
    pub last_success_at: Option<DateTime<Utc>>,
    pub is_refreshing: bool,
    pub runs: u64,
    pub failures: u64,
    pub last_report: Option<RefreshReport>,
    pub next_eligible_in: Option<Duration>,
}

struct Inner {
    client: WikiClient,
    store: Store,
    directory: Arc<ItemDirectory>,
    interval: Duration,
    cold_delay: Duration,
    state: Mutex<RefreshState>,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the in-flight slot and wakes every waiter when dropped, including
/// when the refresh task panics.
struct FlightGuard {
    inner: Arc<Inner>,
    done: watch::Sender<bool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.inner.lock_state().in_flight = None;
        let _ = self.done.send(true);
    }
}

/// Singleflight coordinator for price refreshes
#[derive(Clone)]
pub struct RefreshOrchestrator {
    inner: Arc<Inner>,
}

impl RefreshOrchestrator {
    pub fn new(
        client: WikiClient,
        store: Store,
        directory: Arc<ItemDirectory>,
        config: &TrackerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                store,
                directory,
                interval: config.refresh_interval,
                cold_delay: config.cold_recovery_delay(),
                state: Mutex::new(RefreshState::default()),
            }),
        }
    }

    /// Refresh prices unless the gate is closed
    ///
    /// With `force` the interval gate is bypassed, but a refresh that is already
    /// running is still joined rather than duplicated. Returns once the refresh
    /// this call started or joined has settled. The refresh itself runs on its
    /// own task, so dropping this future does not cancel it.
    pub async fn refresh(&self, force: bool) -> RefreshOutcome {
        let (mut done, leader) = {
            let mut state = self.inner.lock_state();

            if !force && !state.is_due(Instant::now()) {
                log::debug!("Prices are fresh, skipping refresh");
                return RefreshOutcome::Skipped;
            }

            if let Some(done) = state.in_flight.clone() {
                log::debug!("Refresh already in progress, waiting for it");
                (done, None)
            } else {
                let (tx, rx) = watch::channel(false);
                state.in_flight = Some(rx.clone());
                (rx, Some(tx))
            }
        };

        // Spawned outside the state lock: a runtime that is shutting down drops
        // the task inside `spawn`, and the guard's drop takes that lock.
        let outcome = match leader {
            Some(tx) => {
                let guard = FlightGuard {
                    inner: Arc::clone(&self.inner),
                    done: tx,
                };
                let this = self.clone();
                tokio::spawn(async move { this.run(guard).await });
                RefreshOutcome::Ran
            }
            None => RefreshOutcome::Joined,
        };

        // An error here means the sender is gone, which also means settled
        let _ = done.wait_for(|settled| *settled).await;
        outcome
    }

    async fn run(&self, guard: FlightGuard) {
        let result = self.execute().await;
        let now = Instant::now();

        {
            let mut state = self.inner.lock_state();
            match result {
                Ok(report) => {
                    log::info!(
                        "Refresh completed: {} inserted, {} duplicates, {} errors, {} unknown items",
                        report.inserted,
                        report.duplicates,
                        report.errors,
                        report.unknown_items
                    );
                    state.record_success(now, Utc::now(), self.inner.interval, report);
                }
                Err(e) => {
                    log::error!("Price refresh failed: {}", e);
                    let cold = state.last_success_at().is_none();
                    state.record_failure(now, e.is_fetch_failure(), self.inner.cold_delay);
                    if cold && e.is_fetch_failure() {
                        log::warn!(
                            "No successful refresh yet, next attempt allowed in {}s",
                            self.inner.cold_delay.as_secs()
                        );
                    }
                }
            }
        }

        drop(guard);
    }

    /// Fetch, filter and persist one snapshot
    async fn execute(&self) -> Result<RefreshReport> {
        log::info!("Refreshing prices...");

        let candidates = self.inner.client.fetch_latest_prices().await?;
        let known = self.inner.directory.existing_item_ids().await?;

        let fetched = candidates.len();
        let timestamp = refresh_timestamp();
        let points: Vec<PricePoint> = candidates
            .iter()
            .filter(|c| known.contains(&c.item_id))
            .map(|c| c.at(timestamp))
            .collect();

        let unknown_items = fetched - points.len();
        if unknown_items > 0 {
            log::info!("Ignored {} prices for items not in the catalog", unknown_items);
        }

        let mut report = persist(&self.inner.store, &points)?;
        report.fetched = fetched;
        report.unknown_items = unknown_items;
        Ok(report)
    }

    /// Snapshot of the refresh bookkeeping
    pub fn status(&self) -> RefreshStatus {
        let state = self.inner.lock_state();
        RefreshStatus {
            last_success_at: state.last_success_at,
            is_refreshing: state.is_in_flight(),
            runs: state.runs,
            failures: state.failures,
            last_report: state.last_report.clone(),
            next_eligible_in: state.next_eligible_in(Instant::now()),
        }
    }

    /// Delay a periodic scheduler should wait before the next tick
    pub fn next_attempt_delay(&self) -> Duration {
        self.inner
            .lock_state()
            .next_attempt_delay(Instant::now(), self.inner.interval)
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }
}

/// Millisecond-precision timestamp shared by every record of one refresh
fn refresh_timestamp() -> DateTime<Utc> {
    crate::models::from_millis(Utc::now().timestamp_millis())
}

/// Persist a batch record by record
///
/// Duplicate keys are the expected race with an earlier write and are skipped
/// quietly. Any other per-record failure is counted and logged without
/// aborting the rest of the batch.
pub fn persist(store: &Store, points: &[PricePoint]) -> Result<RefreshReport> {
    let results = store.insert_price_points(points)?;
    let mut report = RefreshReport::default();

    for (point, result) in points.iter().zip(results) {
        match result {
            Ok(()) => report.inserted += 1,
            Err(TrackerError::DuplicateKey { .. }) => report.duplicates += 1,
            Err(e) => {
                report.errors += 1;
                log::warn!("Failed to store price for item {}: {}", point.item_id, e);
            }
        }
    }

    if report.errors > 0 {
        log::error!(
            "{} of {} price records failed to persist",
            report.errors,
            points.len()
        );
    }
    Ok(report)
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
