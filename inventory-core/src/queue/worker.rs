//! Mutation Worker - replays the persisted queue against the backend
//!
//! Entries are replayed one at a time in enqueue order. Offline failures stop
//! the pass (the rest would fail the same way) and wait for the next nudge,
//! scan or backoff deadline.

use super::classify::{FailureClass, classify, is_corrupt, requires_reauth};
use super::registry::MutationRegistry;
use super::storage::{MutationStorage, QueueStats};
use super::{CacheInvalidator, MutationStatus, PendingMutation};
use crate::core::Config;
use shared::error::{AppError, AppResult, ErrorCode};
use shared::mutation::MutationPayload;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_SCAN_INTERVAL_MS: u64 = 15_000;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 300_000;
const DEFAULT_APPLIED_RETENTION_MS: i64 = 7 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Counted failures before an entry moves to the failed queue
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub scan_interval_ms: u64,
    pub sweep_interval_ms: u64,
    /// Applied ids older than this are pruned on each sweep
    pub applied_retention_ms: i64,
}

impl QueueConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.mutation_max_retries,
            retry_base_delay_ms: config.retry_base_delay_ms,
            retry_max_delay_ms: config.retry_max_delay_ms,
            scan_interval_ms: config.queue_scan_interval_ms,
            sweep_interval_ms: config.sweep_interval_ms,
            applied_retention_ms: config.applied_retention_ms,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            scan_interval_ms: DEFAULT_SCAN_INTERVAL_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            applied_retention_ms: DEFAULT_APPLIED_RETENTION_MS,
        }
    }
}

/// Exponential backoff: `base * 2^(attempts - 1)`, capped at the max delay
pub fn backoff_ms(config: &QueueConfig, attempts: u32) -> u64 {
    let exp = attempts.saturating_sub(1);
    config
        .retry_base_delay_ms
        .saturating_mul(2u64.saturating_pow(exp))
        .min(config.retry_max_delay_ms)
}

/// Remove provably corrupt entries from the pending and failed queues
pub fn sweep_corrupt(storage: &MutationStorage) -> AppResult<usize> {
    let mut removed = storage.remove_undecodable()?;
    let entries = storage.pending()?.into_iter().chain(storage.failed()?);
    for mutation in entries {
        if is_corrupt(&mutation) && storage.remove(&mutation.id)? {
            tracing::warn!(
                mutation_id = %mutation.id,
                key = %mutation.key,
                last_error = ?mutation.last_error,
                "Removed corrupt mutation"
            );
            removed += 1;
        }
    }
    Ok(removed)
}

/// Result of one maintenance sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Corrupt entries removed from the pending and failed queues
    pub corrupt: usize,
    /// Applied ids pruned past the retention window
    pub pruned: usize,
}

/// Result of one pass over the pending queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    /// Already applied before a restart; removed without replay
    pub skipped: usize,
    pub paused: usize,
    pub failed: usize,
    pub dropped: usize,
    /// Not attempted (backing off, or the pass stopped while offline)
    pub deferred: usize,
    /// Earliest backoff deadline among the entries left behind
    pub next_attempt_at: Option<i64>,
    /// The anti-zombie invalidation ran at the end of this pass
    pub invalidated: bool,
}

enum Outcome {
    Applied,
    Skipped,
    Dropped,
    Paused,
    Offline,
    Failed,
}

/// Handle used to enqueue and manage mutations
#[derive(Clone)]
pub struct MutationQueue {
    storage: MutationStorage,
    registry: Arc<MutationRegistry>,
    nudge: Arc<Notify>,
    reauth: Arc<watch::Sender<bool>>,
}

impl MutationQueue {
    /// Create the queue handle and its worker
    pub fn new(
        storage: MutationStorage,
        registry: MutationRegistry,
        config: QueueConfig,
    ) -> (Self, MutationWorker) {
        let registry = Arc::new(registry);
        let nudge = Arc::new(Notify::new());
        let (reauth_tx, _) = watch::channel(false);
        let reauth = Arc::new(reauth_tx);

        let queue = Self {
            storage: storage.clone(),
            registry: registry.clone(),
            nudge: nudge.clone(),
            reauth: reauth.clone(),
        };
        let worker = MutationWorker {
            storage,
            registry,
            config,
            nudge,
            reauth,
            invalidator: None,
            drained_success: AtomicBool::new(false),
            pass: Mutex::new(()),
        };
        (queue, worker)
    }

    /// Persist a mutation and wake the worker; returns the mutation id
    ///
    /// Families without a registered replay handler are refused, since
    /// nothing could ever replay them after a restart.
    pub fn enqueue(&self, payload: MutationPayload) -> AppResult<String> {
        let key = payload.key();
        if !self.registry.is_registered(key) {
            return Err(AppError::with_message(
                ErrorCode::ReplayNotRegistered,
                format!("Cannot enqueue {}: no replay handler registered", key),
            ));
        }
        let mutation = self.storage.append(payload)?;
        tracing::debug!(mutation_id = %mutation.id, key = %key, seq = mutation.seq, "Mutation enqueued");
        self.nudge.notify_one();
        Ok(mutation.id)
    }

    pub fn storage(&self) -> &MutationStorage {
        &self.storage
    }

    pub fn pending(&self) -> AppResult<Vec<PendingMutation>> {
        Ok(self.storage.pending()?)
    }

    pub fn failed(&self) -> AppResult<Vec<PendingMutation>> {
        Ok(self.storage.failed()?)
    }

    pub fn stats(&self) -> AppResult<QueueStats> {
        Ok(self.storage.stats()?)
    }

    /// Clear backoff on paused entries and wake the worker (connectivity restored)
    pub fn resume(&self) -> AppResult<usize> {
        let mut resumed = 0;
        for mut mutation in self.storage.pending()? {
            if mutation.status == MutationStatus::Paused {
                mutation.status = MutationStatus::Pending;
                mutation.next_attempt_at = 0;
                self.storage.update_pending(&mutation)?;
                resumed += 1;
            }
        }
        if resumed > 0 {
            tracing::info!(count = resumed, "Resumed paused mutations");
        }
        self.nudge.notify_one();
        Ok(resumed)
    }

    /// Move failed entries back to pending with a fresh retry budget
    pub fn retry_errors(&self) -> AppResult<usize> {
        let count = self.storage.retry_failed()?;
        if count > 0 {
            tracing::info!(count, "Failed mutations re-queued");
            self.nudge.notify_one();
        }
        Ok(count)
    }

    /// Drop every failed entry
    pub fn clear_errors(&self) -> AppResult<usize> {
        let count = self.storage.clear_failed()?;
        if count > 0 {
            tracing::info!(count, "Failed mutations cleared");
        }
        Ok(count)
    }

    pub fn sweep(&self) -> AppResult<usize> {
        sweep_corrupt(&self.storage)
    }

    /// Flips to `true` when a replay hit an invalid session
    pub fn reauth_signal(&self) -> watch::Receiver<bool> {
        self.reauth.subscribe()
    }

    pub fn acknowledge_reauth(&self) {
        self.reauth.send_replace(false);
    }
}

/// Worker that drains the pending queue
pub struct MutationWorker {
    storage: MutationStorage,
    registry: Arc<MutationRegistry>,
    config: QueueConfig,
    nudge: Arc<Notify>,
    reauth: Arc<watch::Sender<bool>>,
    invalidator: Option<Arc<dyn CacheInvalidator>>,
    /// A replay succeeded since the queue last drained
    drained_success: AtomicBool,
    /// Serializes passes
    pass: Mutex<()>,
}

impl MutationWorker {
    /// Invalidate `invalidator` whenever the queue drains after a success
    pub fn with_invalidator(mut self, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        self.invalidator = Some(invalidator);
        self
    }

    /// Run until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            max_retries = self.config.max_retries,
            handlers = self.registry.keys().len(),
            "MutationWorker started"
        );

        self.sweep_logged();
        let mut next_due = self.process_logged().await;

        let mut scan_interval =
            tokio::time::interval(Duration::from_millis(self.config.scan_interval_ms.max(1)));
        scan_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        scan_interval.reset();
        let mut sweep_interval =
            tokio::time::interval(Duration::from_millis(self.config.sweep_interval_ms.max(1)));
        sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweep_interval.reset();

        loop {
            let wake_in = next_due.map(|at| {
                Duration::from_millis((at - shared::util::now_millis()).max(0) as u64)
            });
            let backoff = tokio::time::sleep(wake_in.unwrap_or(Duration::MAX));

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("MutationWorker shutting down");
                    break;
                }
                _ = self.nudge.notified() => {
                    next_due = self.process_logged().await;
                }
                _ = backoff, if wake_in.is_some() => {
                    next_due = self.process_logged().await;
                }
                _ = scan_interval.tick() => {
                    next_due = self.process_logged().await;
                }
                _ = sweep_interval.tick() => {
                    self.sweep_logged();
                }
            }
        }
    }

    /// Drop corrupt entries and prune applied ids past the retention window
    pub fn maintain(&self) -> AppResult<SweepReport> {
        let corrupt = sweep_corrupt(&self.storage)?;
        let cutoff = shared::util::now_millis().saturating_sub(self.config.applied_retention_ms);
        let pruned = self.storage.cleanup_applied(cutoff)?;
        Ok(SweepReport { corrupt, pruned })
    }

    fn sweep_logged(&self) {
        match self.maintain() {
            Ok(SweepReport { corrupt: 0, pruned: 0 }) => {}
            Ok(report) => tracing::info!(
                corrupt = report.corrupt,
                pruned = report.pruned,
                "Swept mutation queue"
            ),
            Err(e) => tracing::error!(error = %e, "Failed to sweep mutation queue"),
        }
    }

    async fn process_logged(&self) -> Option<i64> {
        match self.process_pending().await {
            Ok(report) => {
                if report.applied + report.failed + report.paused > 0 {
                    tracing::info!(
                        applied = report.applied,
                        paused = report.paused,
                        failed = report.failed,
                        deferred = report.deferred,
                        "Mutation queue pass finished"
                    );
                }
                report.next_attempt_at
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to process mutation queue");
                None
            }
        }
    }

    /// One pass over every due entry, in enqueue order
    pub async fn process_pending(&self) -> AppResult<DrainReport> {
        let _pass = self.pass.lock().await;
        let mut report = DrainReport::default();

        let pending = self.storage.pending()?;
        let now = shared::util::now_millis();
        let mut offline = false;

        for mutation in pending {
            if offline || !mutation.is_due(now) {
                report.deferred += 1;
                continue;
            }
            match self.process_one(mutation).await? {
                Outcome::Applied => report.applied += 1,
                Outcome::Skipped => report.skipped += 1,
                Outcome::Dropped => report.dropped += 1,
                Outcome::Paused => report.paused += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Offline => {
                    report.paused += 1;
                    offline = true;
                }
            }
        }

        let remaining = self.storage.pending()?;
        report.next_attempt_at = remaining
            .iter()
            .filter(|m| m.next_attempt_at > 0)
            .map(|m| m.next_attempt_at)
            .min();

        if remaining.is_empty() && self.drained_success.swap(false, Ordering::AcqRel) {
            if let Some(invalidator) = &self.invalidator {
                tracing::info!("Mutation queue drained, invalidating cache");
                invalidator.invalidate_all();
            }
            report.invalidated = true;
        }

        Ok(report)
    }

    async fn process_one(&self, mut mutation: PendingMutation) -> AppResult<Outcome> {
        if self.storage.is_applied(&mutation.id)? {
            self.storage.remove(&mutation.id)?;
            tracing::info!(mutation_id = %mutation.id, "Mutation already applied, removed from queue");
            return Ok(Outcome::Skipped);
        }

        if is_corrupt(&mutation) {
            self.storage.remove(&mutation.id)?;
            tracing::warn!(mutation_id = %mutation.id, key = %mutation.key, "Dropped corrupt mutation");
            return Ok(Outcome::Dropped);
        }

        let handler = match self.registry.get(mutation.key) {
            Ok(handler) => handler,
            Err(e) => {
                tracing::error!(mutation_id = %mutation.id, key = %mutation.key, "No replay handler");
                self.storage
                    .move_to_failed(&mutation.id, &e.message, Some(e.code))?;
                return Ok(Outcome::Failed);
            }
        };

        mutation.attempts += 1;
        match handler.replay(&mutation.id, &mutation.payload).await {
            Ok(()) => {
                self.storage.complete(&mutation.id)?;
                self.drained_success.store(true, Ordering::Release);
                tracing::info!(
                    mutation_id = %mutation.id,
                    key = %mutation.key,
                    attempts = mutation.attempts,
                    "Mutation applied"
                );
                Ok(Outcome::Applied)
            }
            Err(e) => self.handle_failure(mutation, e),
        }
    }

    fn handle_failure(&self, mut mutation: PendingMutation, err: AppError) -> AppResult<Outcome> {
        let class = classify(&err);

        if class == FailureClass::Terminal {
            tracing::error!(
                mutation_id = %mutation.id,
                key = %mutation.key,
                error_code = ?err.code,
                error = %err,
                "Mutation failed permanently"
            );
            self.storage
                .move_to_failed(&mutation.id, &err.message, Some(err.code))?;
            if requires_reauth(&err) {
                tracing::warn!("Session invalid, re-authentication required");
                self.reauth.send_replace(true);
            }
            return Ok(Outcome::Failed);
        }

        if class == FailureClass::Transient {
            mutation.retry_count += 1;
        }
        if mutation.retry_count >= self.config.max_retries {
            tracing::error!(
                mutation_id = %mutation.id,
                retry_count = mutation.retry_count,
                error = %err,
                "Max retry count exceeded, moving to failed queue"
            );
            self.storage
                .move_to_failed(&mutation.id, &err.message, Some(err.code))?;
            return Ok(Outcome::Failed);
        }

        let now = shared::util::now_millis();
        let delay = backoff_ms(&self.config, mutation.attempts);
        mutation.status = MutationStatus::Paused;
        mutation.last_error = Some(err.message.clone());
        mutation.last_error_code = Some(err.code);
        mutation.updated_at = now;
        mutation.next_attempt_at = now + delay as i64;
        self.storage.update_pending(&mutation)?;

        tracing::warn!(
            mutation_id = %mutation.id,
            key = %mutation.key,
            retry_count = mutation.retry_count,
            delay_ms = delay,
            error = %err,
            "Mutation paused"
        );

        Ok(match class {
            FailureClass::Offline => Outcome::Offline,
            _ => Outcome::Paused,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::registry::ReplayHandler;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use shared::models::{ActorContext, ItemIdentity};
    use shared::mutation::{DeleteItemVars, MutationKey, UpdateQuantityVars};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Handler that answers with scripted results, `Ok` once the script runs out
    #[derive(Default)]
    struct Scripted {
        script: SyncMutex<VecDeque<AppResult<()>>>,
        seen: SyncMutex<Vec<String>>,
    }

    impl Scripted {
        fn with(results: Vec<AppResult<()>>) -> Arc<Self> {
            Arc::new(Self {
                script: SyncMutex::new(results.into()),
                seen: SyncMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ReplayHandler for Scripted {
        async fn replay(&self, mutation_id: &str, _payload: &MutationPayload) -> AppResult<()> {
            self.seen.lock().push(mutation_id.to_string());
            self.script.lock().pop_front().unwrap_or(Ok(()))
        }
    }

    #[derive(Default)]
    struct CountingInvalidator(AtomicUsize);

    impl CacheInvalidator for CountingInvalidator {
        fn invalidate_all(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn adjust(delta: i64) -> MutationPayload {
        MutationPayload::UpdateQuantity(UpdateQuantityVars {
            actor: ActorContext::staff("Ana", "u-1"),
            identity: ItemIdentity::new("A-1", "LUDLOW", "Row 1"),
            delta,
            list_id: None,
            order_number: None,
        })
    }

    fn fast_config() -> QueueConfig {
        QueueConfig {
            max_retries: 3,
            retry_base_delay_ms: 0,
            retry_max_delay_ms: 0,
            ..QueueConfig::default()
        }
    }

    fn setup(handler: Arc<Scripted>) -> (MutationQueue, MutationWorker) {
        let storage = MutationStorage::open_in_memory().unwrap();
        let mut registry = MutationRegistry::new();
        registry.register(MutationKey::UpdateQuantity, handler);
        MutationQueue::new(storage, registry, fast_config())
    }

    #[test]
    fn test_backoff_calculation() {
        let config = QueueConfig::default();
        let base = config.retry_base_delay_ms;
        let max = config.retry_max_delay_ms;

        assert_eq!(backoff_ms(&config, 1), base); // 1s
        assert_eq!(backoff_ms(&config, 2), base * 2); // 2s
        assert_eq!(backoff_ms(&config, 3), base * 4); // 4s
        assert_eq!(backoff_ms(&config, 5), base * 16); // 16s
        assert_eq!(backoff_ms(&config, 6), max); // capped at 30s
        assert_eq!(backoff_ms(&config, 200), max);
    }

    #[tokio::test]
    async fn test_enqueue_refuses_unregistered_family() {
        let (queue, _worker) = setup(Scripted::with(vec![]));
        let err = queue
            .enqueue(MutationPayload::DeleteItem(DeleteItemVars {
                actor: ActorContext::staff("Ana", "u-1"),
                identity: ItemIdentity::new("A-1", "LUDLOW", "Row 1"),
                item_id: Some(1),
            }))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ReplayNotRegistered);
        assert!(queue.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replays_in_order_and_invalidates_on_drain() {
        let handler = Scripted::with(vec![]);
        let (queue, worker) = setup(handler.clone());
        let invalidator = Arc::new(CountingInvalidator::default());
        let worker = worker.with_invalidator(invalidator.clone());

        let a = queue.enqueue(adjust(1)).unwrap();
        let b = queue.enqueue(adjust(2)).unwrap();

        let report = worker.process_pending().await.unwrap();
        assert_eq!(report.applied, 2);
        assert!(report.invalidated);
        assert_eq!(*handler.seen.lock(), vec![a.clone(), b]);
        assert!(queue.storage().is_applied(&a).unwrap());
        assert_eq!(invalidator.0.load(Ordering::SeqCst), 1);

        // Nothing new succeeded: no second invalidation
        let report = worker.process_pending().await.unwrap();
        assert!(!report.invalidated);
        assert_eq!(invalidator.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_offline_pauses_without_spending_budget() {
        let handler = Scripted::with(vec![
            Err(AppError::new(ErrorCode::BackendUnavailable)),
            Err(AppError::new(ErrorCode::BackendUnavailable)),
            Err(AppError::new(ErrorCode::BackendUnavailable)),
            Err(AppError::new(ErrorCode::BackendUnavailable)),
        ]);
        let (queue, worker) = setup(handler.clone());
        queue.enqueue(adjust(1)).unwrap();
        queue.enqueue(adjust(2)).unwrap();

        for _ in 0..4 {
            let report = worker.process_pending().await.unwrap();
            assert_eq!(report.paused, 1);
            assert_eq!(report.deferred, 1);
        }
        let pending = queue.pending().unwrap();
        assert_eq!(pending[0].status, MutationStatus::Paused);
        assert_eq!(pending[0].retry_count, 0);
        assert_eq!(pending[0].attempts, 4);
        assert!(queue.failed().unwrap().is_empty());

        let report = worker.process_pending().await.unwrap();
        assert_eq!(report.applied, 2);
    }

    #[tokio::test]
    async fn test_transient_errors_exhaust_budget() {
        let handler = Scripted::with(vec![
            Err(AppError::database("deadlock")),
            Err(AppError::database("deadlock")),
            Err(AppError::database("deadlock")),
        ]);
        let (queue, worker) = setup(handler);
        queue.enqueue(adjust(1)).unwrap();

        assert_eq!(worker.process_pending().await.unwrap().paused, 1);
        assert_eq!(worker.process_pending().await.unwrap().paused, 1);
        assert_eq!(worker.process_pending().await.unwrap().failed, 1);

        let failed = queue.failed().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status, MutationStatus::Error);
        assert_eq!(failed[0].retry_count, 3);

        assert_eq!(queue.retry_errors().unwrap(), 1);
        assert_eq!(worker.process_pending().await.unwrap().applied, 1);
    }

    #[tokio::test]
    async fn test_terminal_session_error_raises_reauth() {
        let handler = Scripted::with(vec![Err(AppError::not_authenticated())]);
        let (queue, worker) = setup(handler);
        let mut signal = queue.reauth_signal();
        queue.enqueue(adjust(1)).unwrap();

        let report = worker.process_pending().await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(*signal.borrow_and_update());
        assert_eq!(
            queue.failed().unwrap()[0].last_error_code,
            Some(ErrorCode::NotAuthenticated)
        );

        queue.acknowledge_reauth();
        assert!(!*signal.borrow_and_update());
        assert_eq!(queue.clear_errors().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_already_applied_entry_is_not_replayed() {
        let handler = Scripted::with(vec![]);
        let (queue, worker) = setup(handler.clone());
        let id = queue.enqueue(adjust(1)).unwrap();
        let storage = queue.storage().clone();

        // Applied but still pending, as after a crash between the two writes
        storage.complete(&id).unwrap();
        let mut again = PendingMutation::new(99, adjust(1));
        again.id = id.clone();
        storage.insert_raw_pending(&id, &serde_json::to_vec(&again).unwrap()).unwrap();

        let report = worker.process_pending().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert!(handler.seen.lock().is_empty());
        assert!(queue.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_removes_corrupt_keeps_transient() {
        let handler = Scripted::with(vec![
            Err(AppError::database(
                "column \"qty\" of relation \"inventory\" does not exist",
            )),
            Err(AppError::network("Failed to fetch")),
        ]);
        let (queue, worker) = setup(handler);
        queue.enqueue(adjust(1)).unwrap();
        let kept = queue.enqueue(adjust(2)).unwrap();
        let report = worker.process_pending().await.unwrap();
        assert_eq!(report.paused, 2);

        let pending = queue.pending().unwrap();
        assert_eq!(pending.len(), 2);

        assert_eq!(queue.sweep().unwrap(), 1);
        let pending = queue.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, kept);
    }

    #[tokio::test]
    async fn test_maintain_prunes_applied_ids_past_retention() {
        let storage = MutationStorage::open_in_memory().unwrap();
        let config = QueueConfig {
            applied_retention_ms: 60_000,
            ..fast_config()
        };
        let (queue, worker) = MutationQueue::new(storage.clone(), MutationRegistry::new(), config);

        let now = shared::util::now_millis();
        storage.insert_applied_at("old", now - 120_000).unwrap();
        storage.insert_applied_at("recent", now - 1_000).unwrap();

        let report = worker.maintain().unwrap();
        assert_eq!(report, SweepReport { corrupt: 0, pruned: 1 });
        assert!(!storage.is_applied("old").unwrap());
        assert!(storage.is_applied("recent").unwrap());
        assert_eq!(queue.stats().unwrap().applied, 1);
    }

    #[tokio::test]
    async fn test_resume_clears_backoff() {
        let handler = Scripted::with(vec![Err(AppError::network("Failed to fetch"))]);
        let storage = MutationStorage::open_in_memory().unwrap();
        let mut registry = MutationRegistry::new();
        registry.register(MutationKey::UpdateQuantity, handler);
        let config = QueueConfig {
            retry_base_delay_ms: 60_000,
            retry_max_delay_ms: 60_000,
            ..QueueConfig::default()
        };
        let (queue, worker) = MutationQueue::new(storage, registry, config);
        queue.enqueue(adjust(1)).unwrap();

        assert_eq!(worker.process_pending().await.unwrap().paused, 1);
        let report = worker.process_pending().await.unwrap();
        assert_eq!(report.deferred, 1);
        assert!(report.next_attempt_at.is_some());

        assert_eq!(queue.resume().unwrap(), 1);
        assert_eq!(worker.process_pending().await.unwrap().applied, 1);
    }

    #[tokio::test]
    async fn test_run_drains_on_nudge_and_stops_on_cancel() {
        let handler = Scripted::with(vec![]);
        let (queue, worker) = setup(handler.clone());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(worker.run(cancel.clone()));

        let id = queue.enqueue(adjust(1)).unwrap();
        for _ in 0..100 {
            if queue.storage().is_applied(&id).unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(queue.storage().is_applied(&id).unwrap());

        cancel.cancel();
        task.await.unwrap();
    }
}
