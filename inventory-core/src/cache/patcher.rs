use crate::backend::InventoryBackend;
use crate::core::Config;
use crate::queue::{CacheInvalidator, MutationStorage};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shared::change::{ChangeEvent, ChangeKind, RowChange};
use shared::error::AppResult;
use shared::models::InventoryRecord;
use shared::util::is_temp_id;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DEFAULT_GHOST_WINDOW_MS: i64 = 4000;
const STATE_NAME: &str = "inventory";

/// Who last wrote a cached row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSource {
    Local,
    Remote,
}

#[derive(Debug, Clone)]
struct CachedRow {
    record: InventoryRecord,
    source: UpdateSource,
    local_at: Option<i64>,
}

impl CachedRow {
    fn remote(record: InventoryRecord) -> Self {
        Self {
            record,
            source: UpdateSource::Remote,
            local_at: None,
        }
    }
}

/// Rows of one rendered view and the cache freshness they were read at
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryView {
    pub rows: Vec<InventoryRecord>,
    /// The cache was invalidated and not refetched since
    pub stale: bool,
    pub generation: u64,
}

/// Filter of one rendered inventory view
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewFilter {
    /// Case-insensitive match on SKU, location or note
    pub search: Option<String>,
    pub warehouse: Option<String>,
    pub min_quantity: i64,
    pub show_inactive: bool,
}

impl ViewFilter {
    pub fn matches(&self, record: &InventoryRecord) -> bool {
        if !self.show_inactive && !record.is_active {
            return false;
        }
        if let Some(warehouse) = &self.warehouse
            && &record.warehouse != warehouse
        {
            return false;
        }
        if record.quantity < self.min_quantity {
            return false;
        }
        if let Some(search) = &self.search {
            let query = search.trim().to_lowercase();
            if query.is_empty() {
                return true;
            }
            let contains = |s: Option<&str>| s.is_some_and(|s| s.to_lowercase().contains(&query));
            return contains(Some(&record.sku))
                || contains(record.location.as_deref())
                || contains(record.note.as_deref());
        }
        true
    }
}

/// Location as shown in views: trimmed, uppercase
pub fn normalize_location(location: Option<&str>) -> String {
    location.unwrap_or("").trim().to_uppercase()
}

fn same_slot(a: &InventoryRecord, b: &InventoryRecord) -> bool {
    a.sku == b.sku
        && a.warehouse == b.warehouse
        && normalize_location(a.location.as_deref()) == normalize_location(b.location.as_deref())
}

/// Normalized client-side store of inventory rows
///
/// One entry per row id; every filtered view is derived on read, so a change
/// event patches a single row instead of every cached list.
pub struct InventoryCache {
    rows: DashMap<i64, CachedRow>,
    next_temp_id: AtomicI64,
    ghost_window_ms: i64,
    stale: AtomicBool,
    generation: AtomicU64,
}

impl Default for InventoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_GHOST_WINDOW_MS)
    }
}

impl InventoryCache {
    pub fn new(ghost_window_ms: i64) -> Self {
        Self {
            rows: DashMap::new(),
            next_temp_id: AtomicI64::new(-1),
            ghost_window_ms,
            stale: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.ghost_update_window_ms)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<InventoryRecord> {
        self.rows.get(&id).map(|row| row.record.clone())
    }

    pub fn source_of(&self, id: i64) -> Option<UpdateSource> {
        self.rows.get(&id).map(|row| row.source)
    }

    /// Rows matching `filter`, ordered by warehouse, SKU and location
    ///
    /// Served from memory even when stale; callers that need server truth
    /// check [`InventoryView::stale`] or use [`fresh_view`](Self::fresh_view).
    pub fn view(&self, filter: &ViewFilter) -> InventoryView {
        let stale = self.is_stale();
        let generation = self.generation();
        let mut rows: Vec<InventoryRecord> = self
            .rows
            .iter()
            .filter(|row| filter.matches(&row.record))
            .map(|row| row.record.clone())
            .collect();
        rows.sort_by(|a, b| {
            (&a.warehouse, &a.sku, normalize_location(a.location.as_deref()), a.id).cmp(&(
                &b.warehouse,
                &b.sku,
                normalize_location(b.location.as_deref()),
                b.id,
            ))
        });
        InventoryView {
            rows,
            stale,
            generation,
        }
    }

    /// Like [`view`](Self::view), refetching first when the cache is stale
    pub async fn fresh_view(
        &self,
        backend: &dyn InventoryBackend,
        filter: &ViewFilter,
    ) -> AppResult<InventoryView> {
        if self.is_stale() {
            self.refresh(backend).await?;
        }
        Ok(self.view(filter))
    }

    /// Replace every row with a fresh server read; clears the stale flag
    pub fn replace_all(&self, records: Vec<InventoryRecord>) {
        self.rows.clear();
        for record in records {
            self.rows.insert(record.id, CachedRow::remote(record));
        }
        self.stale.store(false, Ordering::Release);
    }

    /// Refetch everything from the backend
    ///
    /// An invalidation that lands while the read is in flight leaves the
    /// cache stale.
    pub async fn refresh(&self, backend: &dyn InventoryBackend) -> AppResult<usize> {
        let generation = self.generation();
        let records = backend.all_items().await?;
        let count = records.len();
        self.replace_all(records);
        if self.generation() != generation {
            self.stale.store(true, Ordering::Release);
        }
        tracing::debug!(rows = count, "Inventory cache refreshed");
        Ok(count)
    }

    // ========== Optimistic writes ==========

    /// Show a row that does not exist server-side yet; returns its temporary id
    ///
    /// The row is replaced when the matching server INSERT arrives.
    pub fn insert_optimistic(&self, mut record: InventoryRecord) -> i64 {
        let id = self.next_temp_id.fetch_sub(1, Ordering::AcqRel);
        record.id = id;
        self.rows.insert(
            id,
            CachedRow {
                record,
                source: UpdateSource::Local,
                local_at: Some(shared::util::now_millis()),
            },
        );
        id
    }

    /// Record a local edit of an existing row
    pub fn apply_local(&self, record: InventoryRecord) {
        self.apply_local_at(record, shared::util::now_millis());
    }

    pub fn apply_local_at(&self, record: InventoryRecord, now: i64) {
        self.rows.insert(
            record.id,
            CachedRow {
                record,
                source: UpdateSource::Local,
                local_at: Some(now),
            },
        );
    }

    /// Drop an optimistic row (rollback)
    pub fn remove(&self, id: i64) -> Option<InventoryRecord> {
        self.rows.remove(&id).map(|(_, row)| row.record)
    }

    // ========== Change events ==========

    /// Patch the store with one change event; returns whether anything changed
    pub fn apply(&self, event: &ChangeEvent<InventoryRecord>) -> bool {
        self.apply_at(event, shared::util::now_millis())
    }

    pub fn apply_at(&self, event: &ChangeEvent<InventoryRecord>, now: i64) -> bool {
        match event.event_type {
            ChangeKind::Insert => match &event.new {
                Some(new) => {
                    self.upsert_replacing_temp(new);
                    true
                }
                None => false,
            },
            ChangeKind::Update => match &event.new {
                Some(new) => self.patch(new, now),
                None => false,
            },
            ChangeKind::Delete => {
                let Some(id) = event.old.as_ref().or(event.new.as_ref()).map(|r| r.id) else {
                    return false;
                };
                self.rows.remove(&id).is_some()
            }
        }
    }

    fn patch(&self, new: &InventoryRecord, now: i64) -> bool {
        let Some(mut row) = self.rows.get_mut(&new.id) else {
            // A move onto an existing row arrives as UPDATE
            self.upsert_replacing_temp(new);
            return true;
        };

        let fresh_local = row.source == UpdateSource::Local
            && row.local_at.is_some_and(|at| now - at < self.ghost_window_ms);
        if fresh_local && row.record.quantity != new.quantity {
            tracing::debug!(
                sku = %new.sku,
                local = row.record.quantity,
                remote = new.quantity,
                "Ignoring stale remote update"
            );
            return false;
        }

        let keep_local = row.source == UpdateSource::Local && row.record.quantity == new.quantity;
        row.record = new.clone();
        if !keep_local {
            row.source = UpdateSource::Remote;
            row.local_at = None;
        }
        true
    }

    fn upsert_replacing_temp(&self, new: &InventoryRecord) {
        let temp = self
            .rows
            .iter()
            .find(|row| is_temp_id(*row.key()) && same_slot(&row.record, new))
            .map(|row| *row.key());
        if let Some(temp_id) = temp {
            tracing::debug!(temp_id, id = new.id, "Replacing optimistic row with server row");
            self.rows.remove(&temp_id);
        }
        self.rows.insert(new.id, CachedRow::remote(new.clone()));
    }

    // ========== Invalidation ==========

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Bumped on every full invalidation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    // ========== Persistence ==========

    /// Persist the server rows (optimistic rows are left out)
    pub fn snapshot(&self, storage: &MutationStorage) -> AppResult<usize> {
        let rows: Vec<InventoryRecord> = self
            .rows
            .iter()
            .filter(|row| !is_temp_id(*row.key()))
            .map(|row| row.record.clone())
            .collect();
        let count = rows.len();
        let value = serde_json::to_value(&rows)
            .map_err(|e| shared::error::AppError::internal(e.to_string()))?;
        storage.save_state(STATE_NAME, &value)?;
        Ok(count)
    }

    /// Load a persisted snapshot no older than `max_age_ms`
    ///
    /// Expired or unreadable snapshots are discarded; the cache is marked
    /// stale either way so the next read refetches.
    pub fn restore(&self, storage: &MutationStorage, max_age_ms: i64) -> AppResult<usize> {
        let Some(state) = storage.load_state(STATE_NAME)? else {
            return Ok(0);
        };
        let age = shared::util::now_millis() - state.saved_at;
        if age > max_age_ms {
            tracing::info!(age_ms = age, "Persisted inventory cache expired, discarding");
            storage.clear_state(STATE_NAME)?;
            return Ok(0);
        }
        let records: Vec<InventoryRecord> = match serde_json::from_value(state.value) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "Persisted inventory cache unreadable, discarding");
                storage.clear_state(STATE_NAME)?;
                return Ok(0);
            }
        };
        let count = records.len();
        self.replace_all(records);
        self.stale.store(true, Ordering::Release);
        Ok(count)
    }

    // ========== Change stream ==========

    /// Pump backend change events into the cache until `cancel` fires
    pub fn spawn_listener(
        self: Arc<Self>,
        backend: Arc<dyn InventoryBackend>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let mut rx = backend.subscribe();
        tokio::spawn(async move {
            tracing::info!("Inventory change listener started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(RowChange::Inventory(event)) => {
                            self.apply(&event);
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(missed = n, "Inventory change listener lagged, invalidating");
                            self.invalidate_all();
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::debug!("Inventory change stream closed");
                            break;
                        }
                    }
                }
            }
            tracing::info!("Inventory change listener stopped");
        })
    }
}

impl CacheInvalidator for InventoryCache {
    fn invalidate_all(&self) {
        self.stale.store(true, Ordering::Release);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(generation, "Inventory cache invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, StockAdjustment};
    use std::time::Duration;

    fn record(id: i64, sku: &str, location: &str, quantity: i64) -> InventoryRecord {
        InventoryRecord {
            id,
            sku: sku.into(),
            warehouse: "LUDLOW".into(),
            location: Some(location.into()),
            location_id: None,
            quantity,
            capacity: None,
            note: None,
            is_active: true,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_view_filters() {
        let cache = InventoryCache::default();
        let mut inactive = record(3, "C-1", "Row 3", 0);
        inactive.is_active = false;
        let mut noted = record(2, "B-1", "Row 2", 4);
        noted.note = Some("Fragile top shelf".into());
        cache.replace_all(vec![record(1, "A-1", " row 1 ", 10), noted, inactive]);

        assert_eq!(cache.view(&ViewFilter::default()).rows.len(), 2);
        let all = ViewFilter {
            show_inactive: true,
            ..Default::default()
        };
        assert_eq!(cache.view(&all).rows.len(), 3);

        let in_stock = ViewFilter {
            min_quantity: 5,
            ..Default::default()
        };
        assert_eq!(cache.view(&in_stock).rows[0].sku, "A-1");

        let search = ViewFilter {
            search: Some("fragile".into()),
            ..Default::default()
        };
        assert_eq!(cache.view(&search).rows[0].id, 2);

        let by_location = ViewFilter {
            search: Some("ROW 1".into()),
            ..Default::default()
        };
        assert_eq!(cache.view(&by_location).rows[0].id, 1);

        let other = ViewFilter {
            warehouse: Some("ATS".into()),
            ..Default::default()
        };
        assert!(cache.view(&other).rows.is_empty());
    }

    #[test]
    fn test_insert_replaces_optimistic_row() {
        let cache = InventoryCache::default();
        let temp = cache.insert_optimistic(record(0, "A-1", "row 5", 3));
        assert!(temp < 0);
        assert_eq!(cache.len(), 1);

        let applied = cache.apply(&ChangeEvent::insert(record(40, "A-1", "ROW 5", 3)));
        assert!(applied);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(temp).is_none());
        assert_eq!(cache.get(40).unwrap().quantity, 3);
    }

    #[test]
    fn test_update_of_unknown_row_replaces_optimistic_row() {
        let cache = InventoryCache::default();
        cache.insert_optimistic(record(0, "A-1", "Row 5", 3));
        cache.apply(&ChangeEvent::update(
            record(41, "A-1", "Row 5", 2),
            record(41, "A-1", "Row 5", 5),
        ));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(41).unwrap().quantity, 5);
    }

    #[test]
    fn test_ghost_update_ignored_within_window() {
        let cache = InventoryCache::new(4000);
        cache.replace_all(vec![record(1, "A-1", "Row 1", 10)]);
        cache.apply_local_at(record(1, "A-1", "Row 1", 7), 1_000);

        // Echo of an older write arrives 1s after the local edit
        let stale = ChangeEvent::update(record(1, "A-1", "Row 1", 10), record(1, "A-1", "Row 1", 9));
        assert!(!cache.apply_at(&stale, 2_000));
        assert_eq!(cache.get(1).unwrap().quantity, 7);

        // Confirming echo keeps the row local
        let confirm = ChangeEvent::update(record(1, "A-1", "Row 1", 10), record(1, "A-1", "Row 1", 7));
        assert!(cache.apply_at(&confirm, 2_500));
        assert_eq!(cache.source_of(1), Some(UpdateSource::Local));

        // After the window remote wins
        assert!(cache.apply_at(&stale, 5_001));
        assert_eq!(cache.get(1).unwrap().quantity, 9);
        assert_eq!(cache.source_of(1), Some(UpdateSource::Remote));
    }

    #[test]
    fn test_delete_removes_row() {
        let cache = InventoryCache::default();
        cache.replace_all(vec![record(1, "A-1", "Row 1", 10)]);
        assert!(cache.apply(&ChangeEvent::delete(record(1, "A-1", "Row 1", 10))));
        assert!(cache.is_empty());
        assert!(!cache.apply(&ChangeEvent::delete(record(1, "A-1", "Row 1", 10))));
    }

    #[test]
    fn test_invalidate_bumps_generation() {
        let cache = InventoryCache::default();
        assert!(!cache.is_stale());
        cache.invalidate_all();
        cache.invalidate_all();
        assert!(cache.is_stale());
        assert_eq!(cache.generation(), 2);
        cache.replace_all(Vec::new());
        assert!(!cache.is_stale());
    }

    #[tokio::test]
    async fn test_stale_view_is_flagged_and_fresh_view_refetches() {
        let backend = MemoryBackend::new();
        let seeded = backend.seed_item("A-1", "LUDLOW", "Row 1", 10);
        let cache = InventoryCache::default();
        cache.refresh(&backend).await.unwrap();
        assert!(!cache.view(&ViewFilter::default()).stale);

        // Server-side change the cache never heard about
        backend
            .adjust_quantity(
                &StockAdjustment::new(seeded.identity(), -3),
                &shared::models::ActorContext::staff("Ana", "u-1"),
            )
            .await
            .unwrap();
        cache.invalidate_all();

        let view = cache.view(&ViewFilter::default());
        assert!(view.stale);
        assert_eq!(view.generation, 1);
        assert_eq!(view.rows[0].quantity, 10);

        let calls = backend.call_count();
        let view = cache.fresh_view(&backend, &ViewFilter::default()).await.unwrap();
        assert!(!view.stale);
        assert_eq!(view.rows[0].quantity, 7);
        assert_eq!(backend.call_count(), calls + 1);

        // Already fresh: served from memory
        cache.fresh_view(&backend, &ViewFilter::default()).await.unwrap();
        assert_eq!(backend.call_count(), calls + 1);
    }

    #[test]
    fn test_snapshot_restore_and_expiry() {
        let storage = MutationStorage::open_in_memory().unwrap();
        let cache = InventoryCache::default();
        cache.replace_all(vec![record(1, "A-1", "Row 1", 10)]);
        cache.insert_optimistic(record(0, "B-1", "Row 2", 1));
        assert_eq!(cache.snapshot(&storage).unwrap(), 1);

        let restored = InventoryCache::default();
        assert_eq!(restored.restore(&storage, 60_000).unwrap(), 1);
        assert_eq!(restored.get(1).unwrap().quantity, 10);
        assert!(restored.is_stale());

        let expired = InventoryCache::default();
        assert_eq!(expired.restore(&storage, -1).unwrap(), 0);
        assert!(storage.load_state(STATE_NAME).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_listener_applies_backend_changes() {
        let backend = MemoryBackend::new();
        let cache = Arc::new(InventoryCache::default());
        let cancel = CancellationToken::new();
        let handle = cache
            .clone()
            .spawn_listener(Arc::new(backend.clone()), cancel.clone());

        let seeded = backend.seed_item("A-1", "LUDLOW", "Row 1", 10);
        let actor = shared::models::ActorContext::staff("Ana", "u-1");
        backend
            .adjust_quantity(&StockAdjustment::new(seeded.identity(), -4), &actor)
            .await
            .unwrap();

        for _ in 0..50 {
            if cache.get(seeded.id).is_some_and(|r| r.quantity == 6) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cache.get(seeded.id).unwrap().quantity, 6);

        cancel.cancel();
        handle.await.unwrap();
    }
}
