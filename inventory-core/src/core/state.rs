use super::Config;
use crate::backend::InventoryBackend;
use crate::cache::InventoryCache;
use crate::inventory::InventoryService;
use crate::picking::{DebouncedSaver, PickingSession};
use crate::queue::{
    MutationQueue, MutationRegistry, MutationStorage, MutationWorker, QueueConfig,
    register_inventory_handlers,
};
use shared::error::{AppError, AppResult, ErrorCode};
use shared::models::ActorContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Wired inventory core
///
/// Holds every long-lived service. Cheap to clone.
///
/// # Example
///
/// ```ignore
/// let config = Config::load();
/// let (state, worker) = CoreState::initialize(&config, backend).await?;
/// let shutdown = CancellationToken::new();
/// state.start_background_tasks(worker, shutdown.clone());
/// let session = state.picking_session(actor, shutdown.clone());
/// ```
#[derive(Clone)]
pub struct CoreState {
    pub config: Config,
    pub backend: Arc<dyn InventoryBackend>,
    pub service: InventoryService,
    pub queue: MutationQueue,
    pub cache: Arc<InventoryCache>,
}

impl CoreState {
    /// Initialize in order:
    /// 1. Work directory
    /// 2. Queue database (wiped when the cache version changed)
    /// 3. Inventory service and replay registry
    /// 4. Cache, restored from the last snapshot when fresh enough
    pub async fn initialize(
        config: &Config,
        backend: Arc<dyn InventoryBackend>,
    ) -> AppResult<(Self, MutationWorker)> {
        std::fs::create_dir_all(&config.work_dir).map_err(|e| {
            AppError::with_message(
                ErrorCode::ConfigError,
                format!("Failed to create work dir {}: {}", config.work_dir, e),
            )
        })?;

        let (storage, wiped) =
            MutationStorage::open_versioned(config.queue_db_path(), &config.cache_key())?;
        if wiped {
            tracing::info!(cache_key = %config.cache_key(), "Starting from a clean client state");
        }

        let service = InventoryService::new(backend.clone());
        let mut registry = MutationRegistry::new();
        register_inventory_handlers(&mut registry, service.clone());

        let cache = Arc::new(InventoryCache::from_config(config));
        match cache.restore(&storage, config.cache_max_age_ms) {
            Ok(0) => {}
            Ok(n) => tracing::info!(rows = n, "Inventory cache restored"),
            Err(e) => tracing::warn!(error = %e, "Failed to restore inventory cache"),
        }

        let (queue, worker) =
            MutationQueue::new(storage, registry, QueueConfig::from_config(config));
        let worker = worker.with_invalidator(cache.clone());

        let state = Self {
            config: config.clone(),
            backend,
            service,
            queue,
            cache,
        };
        Ok((state, worker))
    }

    /// Spawn the queue worker and the cache change listener
    pub fn start_background_tasks(
        &self,
        worker: MutationWorker,
        shutdown: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(worker.run(shutdown.clone())),
            self.cache
                .clone()
                .spawn_listener(self.backend.clone(), shutdown),
        ]
    }

    /// A picking session whose final deduction goes through the queue
    pub fn picking_session(&self, actor: ActorContext, shutdown: CancellationToken) -> PickingSession {
        let saver = DebouncedSaver::spawn(
            self.backend.clone(),
            Duration::from_millis(self.config.save_debounce_ms),
            shutdown,
        );
        PickingSession::new(
            self.backend.clone(),
            Arc::new(self.queue.clone()),
            saver,
            actor,
        )
        .with_stale_after(self.config.session_stale_ms)
    }

    /// Persist the cache for the next start
    pub fn persist_cache(&self) -> AppResult<usize> {
        self.cache.snapshot(self.queue.storage())
    }
}
