//! Query facade: the read operations exposed to callers
//!
//! Owns every long-lived piece of the tracker (store handle, item directory,
//! refresh orchestrator, scheduler) from construction until [`PriceService::cleanup`].

use crate::config::TrackerConfig;
use crate::database::Store;
use crate::directory::ItemDirectory;
use crate::error::{Result, TrackerError};
use crate::models::{HistoryPoint, Item, ItemPrice, SystemStatus};
use crate::refresh::{RefreshOrchestrator, RefreshOutcome};
use crate::scheduler::AutoRefreshScheduler;
use crate::search;
use crate::wiki::WikiClient;
use chrono::{Duration, Utc};
use std::sync::Arc;

pub struct PriceService {
    config: TrackerConfig,
    store: Store,
    client: WikiClient,
    directory: Arc<ItemDirectory>,
    orchestrator: RefreshOrchestrator,
    scheduler: AutoRefreshScheduler,
}

impl PriceService {
    pub fn new(store: Store, config: TrackerConfig) -> Result<Self> {
        let client = WikiClient::new(&config)?;
        let directory = Arc::new(ItemDirectory::new(store.clone(), config.item_ttl));
        let orchestrator = RefreshOrchestrator::new(
            client.clone(),
            store.clone(),
            Arc::clone(&directory),
            &config,
        );
        let scheduler = AutoRefreshScheduler::new(orchestrator.clone());

        Ok(Self {
            config,
            store,
            client,
            directory,
            orchestrator,
            scheduler,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &RefreshOrchestrator {
        &self.orchestrator
    }

    pub fn start_auto_refresh(&self) -> bool {
        self.scheduler.start()
    }

    pub fn stop_auto_refresh(&self) -> bool {
        self.scheduler.stop()
    }

    pub async fn refresh(&self, force: bool) -> RefreshOutcome {
        self.orchestrator.refresh(force).await
    }

    /// Pull the item catalog from the Wiki and upsert it
    ///
    /// The directory is invalidated afterwards so the next lookup sees the new
    /// catalog.
    pub async fn sync_items(&self) -> Result<usize> {
        let items = self.client.fetch_item_mapping().await?;
        let count = self.store.upsert_items(&items)?;
        self.directory.invalidate();
        log::info!("Synced {} items to database", count);
        Ok(count)
    }

    async fn resolve(&self, name: &str) -> Result<Item> {
        self.directory
            .lookup_by_name(name)
            .await?
            .ok_or_else(|| TrackerError::NotFound(name.to_string()))
    }

    /// Mid price of the latest stored observation
    ///
    /// Stale data is returned as is. Only when nothing was ever stored for the
    /// item does this wait for one forced refresh before giving up.
    pub async fn get_price(&self, name: &str) -> Result<ItemPrice> {
        let item = self.resolve(name).await?;

        let latest = match self.store.latest_price(item.id)? {
            Some(point) => Some(point),
            None => {
                log::info!("No price stored for {}, forcing a refresh", item.name);
                self.orchestrator.refresh(true).await;
                self.store.latest_price(item.id)?
            }
        };

        let point = latest.ok_or_else(|| TrackerError::NotFound(item.name.clone()))?;
        Ok(ItemPrice {
            price: point.average(),
            high: point.high,
            low: point.low,
            timestamp: point.timestamp,
            item,
        })
    }

    /// Observations from the last `hours_back` hours, oldest first
    ///
    /// A known item without data yields an empty list, not `NotFound`.
    pub async fn get_price_history(&self, name: &str, hours_back: u32) -> Result<Vec<HistoryPoint>> {
        let item = self.resolve(name).await?;
        let from = Utc::now() - Duration::hours(i64::from(hours_back));

        let points = self.store.price_range(item.id, from)?;
        Ok(points.iter().map(HistoryPoint::from).collect())
    }

    /// Ranked name search, `limit` capped at the configured maximum
    pub async fn search_items(&self, query: &str, limit: usize) -> Result<Vec<Item>> {
        let limit = limit.min(self.config.max_search_limit);
        let snapshot = self.directory.snapshot().await?;
        Ok(search::search(&snapshot, query, limit))
    }

    /// Read-only health snapshot; never triggers a refresh or a directory load
    pub fn get_system_status(&self) -> Result<SystemStatus> {
        let refresh = self.orchestrator.status();
        let (cached_item_ids, cached_items) = self.directory.cached_sizes();

        Ok(SystemStatus {
            item_count: self.store.count_items()?,
            price_point_count: self.store.count_price_points()?,
            last_success_at: refresh.last_success_at,
            cache_age_secs: refresh
                .last_success_at
                .map(|at| (Utc::now() - at).num_seconds()),
            is_refreshing: refresh.is_refreshing,
            refresh_runs: refresh.runs,
            refresh_failures: refresh.failures,
            last_report: refresh.last_report,
            cached_item_ids,
            cached_items,
            scheduler_running: self.scheduler.is_running(),
        })
    }

    /// Stop the scheduler and release the store connection
    ///
    /// The connection is released even if stopping the scheduler misbehaves.
    pub fn cleanup(&self) -> Result<()> {
        if self.scheduler.is_running() {
            self.scheduler.stop();
        }
        self.directory.invalidate();
        self.store.close()
    }
}
