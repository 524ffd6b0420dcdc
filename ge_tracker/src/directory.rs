//! In-memory item directory
//!
//! A read-only copy of the item catalog (id set plus case-insensitive name map)
//! loaded from the store and rebuilt once it is older than the configured TTL.
//! Rebuilds swap a whole new snapshot in, so readers see either the old or the
//! new directory, never a half-built one.

use crate::database::Store;
use crate::error::Result;
use crate::models::Item;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Immutable point-in-time copy of the catalog
#[derive(Debug)]
pub struct DirectorySnapshot {
    /// `(lowercased name, item)` in catalog order, one entry per name
    entries: Vec<(String, Item)>,
    by_name: HashMap<String, usize>,
    item_ids: HashSet<i64>,
    loaded_at: Instant,
}

impl DirectorySnapshot {
    /// Build both lookups in one pass. A later item with the same name
    /// (ignoring case) replaces the earlier one in place.
    pub fn build(items: Vec<Item>, loaded_at: Instant) -> Self {
        let mut entries: Vec<(String, Item)> = Vec::with_capacity(items.len());
        let mut by_name = HashMap::with_capacity(items.len());
        let mut item_ids = HashSet::with_capacity(items.len());

        for item in items {
            let key = item.name.to_lowercase();
            item_ids.insert(item.id);
            match by_name.get(&key) {
                Some(&index) => entries[index] = (key, item),
                None => {
                    by_name.insert(key.clone(), entries.len());
                    entries.push((key, item));
                }
            }
        }

        Self {
            entries,
            by_name,
            item_ids,
            loaded_at,
        }
    }

    /// Case-insensitive exact match
    pub fn lookup_by_name(&self, name: &str) -> Option<&Item> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|&index| &self.entries[index].1)
    }

    pub fn contains_id(&self, id: i64) -> bool {
        self.item_ids.contains(&id)
    }

    pub fn item_ids(&self) -> &HashSet<i64> {
        &self.item_ids
    }

    /// Lowercased names with their items, in catalog order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Item)> {
        self.entries.iter().map(|(name, item)| (name.as_str(), item))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.loaded_at) > ttl
    }
}

/// TTL-gated cache of the item catalog
pub struct ItemDirectory {
    store: Store,
    ttl: Duration,
    snapshot: RwLock<Option<Arc<DirectorySnapshot>>>,
    /// Serializes rebuilds so concurrent callers share one store scan
    rebuild_lock: Mutex<()>,
    /// Bumped by every invalidation; a rebuild started under an older value
    /// must not be installed
    generation: AtomicU64,
    rebuilds: AtomicU64,
}

impl ItemDirectory {
    pub fn new(store: Store, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            snapshot: RwLock::new(None),
            rebuild_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            rebuilds: AtomicU64::new(0),
        }
    }

    /// Current snapshot, rebuilding it first if missing or expired
    pub async fn snapshot(&self) -> Result<Arc<DirectorySnapshot>> {
        if let Some(snapshot) = self.fresh_snapshot() {
            return Ok(snapshot);
        }

        let _guard = self.rebuild_lock.lock().await;

        // Another caller may have finished a rebuild while we waited
        if let Some(snapshot) = self.fresh_snapshot() {
            return Ok(snapshot);
        }

        let generation = self.generation.load(Ordering::Acquire);

        log::info!("Loading item directory into memory...");
        let items = self.store.find_all_items()?;
        let snapshot = Arc::new(DirectorySnapshot::build(items, Instant::now()));
        self.rebuilds.fetch_add(1, Ordering::Relaxed);

        if self.install(generation, &snapshot) {
            log::info!("Item directory loaded: {} items in memory", snapshot.len());
        } else {
            log::info!("Item directory invalidated during reload, snapshot not cached");
        }
        Ok(snapshot)
    }

    /// Publish `snapshot` unless the directory was invalidated after
    /// `generation` was read
    fn install(&self, generation: u64, snapshot: &Arc<DirectorySnapshot>) -> bool {
        let mut slot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        *slot = Some(Arc::clone(snapshot));
        true
    }

    /// Ids of every known item, used to filter incoming prices
    pub async fn existing_item_ids(&self) -> Result<HashSet<i64>> {
        Ok(self.snapshot().await?.item_ids().clone())
    }

    /// Case-insensitive exact name lookup
    pub async fn lookup_by_name(&self, name: &str) -> Result<Option<Item>> {
        Ok(self.snapshot().await?.lookup_by_name(name).cloned())
    }

    /// True when there is no snapshot or it is older than the TTL
    pub fn is_expired(&self) -> bool {
        match self.current() {
            Some(snapshot) => snapshot.is_expired(Instant::now(), self.ttl),
            None => true,
        }
    }

    /// Drop the snapshot; the next access reloads from the store
    pub fn invalidate(&self) {
        let mut slot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::AcqRel);
        *slot = None;
        drop(slot);
        log::info!("Item directory invalidated");
    }

    /// `(cached item ids, cached names)`, zero when nothing is loaded
    pub fn cached_sizes(&self) -> (usize, usize) {
        match self.current() {
            Some(snapshot) => (snapshot.item_ids().len(), snapshot.len()),
            None => (0, 0),
        }
    }

    /// Number of store scans performed so far
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::Relaxed)
    }

    fn current(&self) -> Option<Arc<DirectorySnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn fresh_snapshot(&self) -> Option<Arc<DirectorySnapshot>> {
        self.current()
            .filter(|snapshot| !snapshot.is_expired(Instant::now(), self.ttl))
    }
}
