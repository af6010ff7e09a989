//! Debounced cart persistence
//!
//! Cart edits arrive in bursts (one per tap). The saver keeps only the
//! latest snapshot per list and writes it once the cart has been quiet for
//! the configured delay. A failed write keeps its snapshot and is retried
//! after another quiet period or on the next flush, unless a newer snapshot
//! for the same list replaced it first.

use crate::backend::InventoryBackend;
use parking_lot::Mutex;
use shared::models::{CartItem, PickingListUpdate};
use shared::util::now_millis;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cart state to persist for one list
#[derive(Debug, Clone, PartialEq)]
pub struct CartSnapshot {
    pub list_id: i64,
    pub items: Vec<CartItem>,
    pub order_number: Option<String>,
}

enum SaverCommand {
    Save(CartSnapshot),
    Flush(oneshot::Sender<()>),
}

#[derive(Default)]
struct SaverStatus {
    saving: AtomicBool,
    writes: AtomicU64,
    last_saved: Mutex<Option<i64>>,
    last_error: Mutex<Option<String>>,
}

/// Handle to the background save task
#[derive(Clone)]
pub struct DebouncedSaver {
    tx: mpsc::UnboundedSender<SaverCommand>,
    status: Arc<SaverStatus>,
}

impl DebouncedSaver {
    /// Spawn the save task on the current runtime
    pub fn spawn(
        backend: Arc<dyn InventoryBackend>,
        delay: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = Arc::new(SaverStatus::default());
        let task = SaveTask {
            backend,
            delay,
            status: status.clone(),
        };
        tokio::spawn(task.run(rx, shutdown));
        Self { tx, status }
    }

    /// Replace the pending snapshot and restart the quiet period
    pub fn schedule(&self, snapshot: CartSnapshot) {
        self.status.saving.store(true, Ordering::SeqCst);
        if self.tx.send(SaverCommand::Save(snapshot)).is_err() {
            self.status.saving.store(false, Ordering::SeqCst);
            tracing::warn!("Cart saver stopped, snapshot dropped");
        }
    }

    /// Write any pending snapshot now
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(SaverCommand::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// A snapshot is pending or being written
    pub fn is_saving(&self) -> bool {
        self.status.saving.load(Ordering::SeqCst)
    }

    /// Millis of the last successful write
    pub fn last_saved(&self) -> Option<i64> {
        *self.status.last_saved.lock()
    }

    pub fn last_error(&self) -> Option<String> {
        self.status.last_error.lock().clone()
    }

    /// Number of writes issued so far
    pub fn write_count(&self) -> u64 {
        self.status.writes.load(Ordering::SeqCst)
    }
}

struct SaveTask {
    backend: Arc<dyn InventoryBackend>,
    delay: Duration,
    status: Arc<SaverStatus>,
}

impl SaveTask {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<SaverCommand>, shutdown: CancellationToken) {
        // Latest snapshot per list; different lists are never coalesced
        let mut pending: BTreeMap<i64, CartSnapshot> = BTreeMap::new();
        let timer = tokio::time::sleep(self.delay);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.write_all(&mut pending).await;
                    break;
                }
                cmd = rx.recv() => match cmd {
                    Some(SaverCommand::Save(snapshot)) => {
                        pending.insert(snapshot.list_id, snapshot);
                        timer.as_mut().reset(Instant::now() + self.delay);
                    }
                    Some(SaverCommand::Flush(ack)) => {
                        if !self.write_all(&mut pending).await {
                            timer.as_mut().reset(Instant::now() + self.delay);
                        }
                        let _ = ack.send(());
                    }
                    None => {
                        self.write_all(&mut pending).await;
                        break;
                    }
                },
                _ = &mut timer, if !pending.is_empty() => {
                    if !self.write_all(&mut pending).await {
                        timer.as_mut().reset(Instant::now() + self.delay);
                    }
                }
            }
        }
        if !pending.is_empty() {
            tracing::warn!(lists = pending.len(), "Cart saver stopped with unsaved carts");
        }
        tracing::debug!("Cart saver stopped");
    }

    /// Write every pending snapshot; failed ones stay pending
    ///
    /// Returns `true` when nothing is left to write.
    async fn write_all(&self, pending: &mut BTreeMap<i64, CartSnapshot>) -> bool {
        for snapshot in std::mem::take(pending).into_values() {
            if let Err(snapshot) = self.write(snapshot).await {
                pending.insert(snapshot.list_id, snapshot);
            }
        }
        let done = pending.is_empty();
        self.status.saving.store(!done, Ordering::SeqCst);
        done
    }

    async fn write(&self, snapshot: CartSnapshot) -> Result<(), CartSnapshot> {
        self.status.writes.fetch_add(1, Ordering::SeqCst);
        let patch = PickingListUpdate {
            items: Some(snapshot.items.clone()),
            order_number: Some(snapshot.order_number.clone()),
            ..Default::default()
        };
        match self.backend.update_picking_list(snapshot.list_id, patch).await {
            Ok(_) => {
                *self.status.last_saved.lock() = Some(now_millis());
                *self.status.last_error.lock() = None;
                tracing::debug!(list_id = snapshot.list_id, "Cart saved");
                Ok(())
            }
            Err(e) => {
                *self.status.last_error.lock() = Some(e.to_string());
                tracing::warn!(list_id = snapshot.list_id, error = %e, "Failed to save cart, will retry");
                Err(snapshot)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, MemoryBackend};
    use shared::models::{ItemIdentity, PickingListCreate, PickingStatus};

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_coalesced_into_one_write() {
        let backend = Arc::new(MemoryBackend::new());
        let list = backend
            .insert_picking_list(PickingListCreate {
                owner_id: "u1".into(),
                status: PickingStatus::Active,
                items: vec![],
                order_number: None,
            })
            .await
            .unwrap();
        let saver = DebouncedSaver::spawn(backend.clone(), Duration::from_millis(1000), CancellationToken::new());

        for qty in 1..=5 {
            saver.schedule(CartSnapshot {
                list_id: list.id,
                items: vec![CartItem::new(ItemIdentity::new("A", "LUDLOW", "Row 1"), qty)],
                order_number: Some("ORD-1".into()),
            });
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert!(saver.is_saving());
        assert_eq!(saver.write_count(), 0);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(saver.write_count(), 1);
        assert!(!saver.is_saving());
        assert!(saver.last_saved().is_some());

        let saved = backend.get_picking_list(list.id).await.unwrap().unwrap();
        assert_eq!(saved.items[0].picking_qty, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_writes_immediately() {
        let backend = Arc::new(MemoryBackend::new());
        let list = backend
            .insert_picking_list(PickingListCreate {
                owner_id: "u1".into(),
                status: PickingStatus::Active,
                items: vec![],
                order_number: None,
            })
            .await
            .unwrap();
        let saver = DebouncedSaver::spawn(backend.clone(), Duration::from_secs(60), CancellationToken::new());
        saver.schedule(CartSnapshot {
            list_id: list.id,
            items: vec![],
            order_number: Some("ORD-9".into()),
        });
        saver.flush().await;
        assert_eq!(saver.write_count(), 1);
        let saved = backend.get_picking_list(list.id).await.unwrap().unwrap();
        assert_eq!(saved.order_number.as_deref(), Some("ORD-9"));
    }

    async fn active_list(backend: &MemoryBackend) -> i64 {
        backend
            .insert_picking_list(PickingListCreate {
                owner_id: "u1".into(),
                status: PickingStatus::Active,
                items: vec![],
                order_number: None,
            })
            .await
            .unwrap()
            .id
    }

    fn snapshot(list_id: i64, qty: i64) -> CartSnapshot {
        CartSnapshot {
            list_id,
            items: vec![CartItem::new(ItemIdentity::new("A", "LUDLOW", "Row 1"), qty)],
            order_number: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_is_kept_and_written_on_next_flush() {
        let backend = Arc::new(MemoryBackend::new());
        let list_id = active_list(&backend).await;
        let saver = DebouncedSaver::spawn(backend.clone(), Duration::from_secs(60), CancellationToken::new());

        backend.fail_next_on(
            "update_picking_list",
            BackendError::Unavailable("Failed to fetch".into()),
        );
        saver.schedule(snapshot(list_id, 3));
        saver.flush().await;
        assert_eq!(saver.write_count(), 1);
        assert!(saver.last_error().is_some());
        assert!(saver.is_saving());
        assert!(backend.get_picking_list(list_id).await.unwrap().unwrap().items.is_empty());

        saver.flush().await;
        assert_eq!(saver.write_count(), 2);
        assert_eq!(saver.last_error(), None);
        assert!(!saver.is_saving());
        let saved = backend.get_picking_list(list_id).await.unwrap().unwrap();
        assert_eq!(saved.items[0].picking_qty, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_retries_after_quiet_period() {
        let backend = Arc::new(MemoryBackend::new());
        let list_id = active_list(&backend).await;
        let saver = DebouncedSaver::spawn(backend.clone(), Duration::from_millis(500), CancellationToken::new());

        backend.fail_next_on("update_picking_list", BackendError::Timeout);
        saver.schedule(snapshot(list_id, 2));
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(saver.write_count(), 1);
        assert!(saver.last_error().is_some());

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(saver.write_count(), 2);
        assert!(!saver.is_saving());
        let saved = backend.get_picking_list(list_id).await.unwrap().unwrap();
        assert_eq!(saved.items[0].picking_qty, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_snapshot_replaces_failed_one() {
        let backend = Arc::new(MemoryBackend::new());
        let list_id = active_list(&backend).await;
        let saver = DebouncedSaver::spawn(backend.clone(), Duration::from_secs(60), CancellationToken::new());

        backend.fail_next_on("update_picking_list", BackendError::Timeout);
        saver.schedule(snapshot(list_id, 1));
        saver.flush().await;
        saver.schedule(snapshot(list_id, 4));
        saver.flush().await;

        assert_eq!(saver.write_count(), 2);
        let saved = backend.get_picking_list(list_id).await.unwrap().unwrap();
        assert_eq!(saved.items[0].picking_qty, 4);
    }
}
