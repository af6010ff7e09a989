//! Durable mutation queue
//!
//! Every write leaves the client through here. `enqueue` persists the payload
//! in redb and returns; the [`MutationWorker`] replays it against the backend
//! whenever the network allows, surviving restarts in between.
//!
//! # Flow
//!
//! ```text
//! enqueue(payload) ──▶ redb pending_mutations ──▶ MutationWorker
//!                                                   │ registry[key].replay(id, payload)
//!                          ┌────────────────────────┼───────────────────────┐
//!                          ▼                        ▼                       ▼
//!                     success                  offline/transient        terminal
//!               applied_mutations          paused + backoff          failed_mutations
//!               (anti-zombie on drain)                               (+ re-auth signal)
//! ```

pub mod classify;
pub mod registry;
pub mod storage;
pub mod worker;

pub use classify::{FailureClass, classify, is_corrupt, requires_reauth};
pub use registry::{MutationRegistry, ReplayHandler, register_inventory_handlers};
pub use storage::{MutationStorage, QueueStats, StorageError, StorageResult, StoredState};
pub use worker::{
    DrainReport, MutationQueue, MutationWorker, QueueConfig, SweepReport, backoff_ms, sweep_corrupt,
};

use crate::inventory::InventoryService;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::error::{AppResult, ErrorCode};
use shared::mutation::{MutationKey, MutationPayload};

/// Where a mutation goes once the caller has decided to perform it
///
/// Either applied right away ([`InventoryService`]) or persisted for replay
/// ([`MutationQueue`]).
#[async_trait]
pub trait MutationSink: Send + Sync {
    async fn submit(&self, payload: MutationPayload) -> AppResult<()>;
}

#[async_trait]
impl MutationSink for InventoryService {
    async fn submit(&self, payload: MutationPayload) -> AppResult<()> {
        self.apply(&payload, None).await
    }
}

#[async_trait]
impl MutationSink for MutationQueue {
    async fn submit(&self, payload: MutationPayload) -> AppResult<()> {
        self.enqueue(payload).map(drop)
    }
}

/// Full cache reconciliation, run once the queue drains
pub trait CacheInvalidator: Send + Sync {
    fn invalidate_all(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    /// Waiting for its first (or next) attempt
    Pending,
    /// Last attempt failed while offline or transiently; waits for backoff
    Paused,
    /// Given up; kept in `failed_mutations` until retried or cleared
    Error,
}

/// One persisted queue entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    /// UUID v4; also sent to the backend as the request id
    pub id: String,
    /// Enqueue order
    pub seq: u64,
    pub key: MutationKey,
    pub payload: MutationPayload,
    pub status: MutationStatus,
    /// Failures counted against the retry budget
    pub retry_count: u32,
    /// Every attempt, including offline ones; drives the backoff
    #[serde(default)]
    pub attempts: u32,
    pub last_error: Option<String>,
    pub last_error_code: Option<ErrorCode>,
    pub created_at: i64,
    pub updated_at: i64,
    /// Epoch millis before which the worker leaves the entry alone
    pub next_attempt_at: i64,
}

impl PendingMutation {
    pub fn new(seq: u64, payload: MutationPayload) -> Self {
        let now = shared::util::now_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            seq,
            key: payload.key(),
            payload,
            status: MutationStatus::Pending,
            retry_count: 0,
            attempts: 0,
            last_error: None,
            last_error_code: None,
            created_at: now,
            updated_at: now,
            next_attempt_at: 0,
        }
    }

    pub fn is_due(&self, now: i64) -> bool {
        now >= self.next_attempt_at
    }
}
