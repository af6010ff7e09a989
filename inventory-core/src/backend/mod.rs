//! Remote store interface
//!
//! The core reaches the relational store only through [`InventoryBackend`]:
//! atomic stored procedures, row-level CRUD guarded by role policies, and a
//! change-notification stream.

pub mod memory;

pub use memory::MemoryBackend;

use async_trait::async_trait;
use shared::error::{AppError, ErrorCode};
use shared::models::{
    ActorContext, InventoryCreate, InventoryLogCreate, InventoryLogEntry, InventoryRecord,
    InventoryUpdate, ItemIdentity, Location, LocationCreate, PickingList, PickingListCreate,
    PickingListUpdate, PickingNote, PickingStatus, UndoOutcome,
};
use shared::RowChange;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors reported by the backend
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("duplicate key value violates unique constraint \"{0}\"")]
    UniqueViolation(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Row policy refused the operation
    #[error("permission denied: {0}")]
    Forbidden(String),

    /// Session missing, expired or invalid
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Domain rule enforced server-side (insufficient stock, LIFO, ...)
    #[error("{message}")]
    Conflict { code: ErrorCode, message: String },

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out")]
    Timeout,

    /// Any other query failure, carrying the raw database message
    #[error("query failed: {0}")]
    Query(String),
}

impl BackendError {
    pub fn conflict(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Conflict {
            code,
            message: message.into(),
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        let message = err.to_string();
        match err {
            BackendError::UniqueViolation(constraint) => {
                AppError::with_message(ErrorCode::AlreadyExists, message)
                    .with_detail("constraint", constraint)
            }
            BackendError::NotFound(_) => AppError::with_message(ErrorCode::NotFound, message),
            BackendError::Forbidden(_) => {
                AppError::with_message(ErrorCode::PermissionDenied, message)
            }
            BackendError::Unauthorized(_) => {
                AppError::with_message(ErrorCode::NotAuthenticated, message)
            }
            BackendError::Conflict { code, message } => AppError::with_message(code, message),
            BackendError::Unavailable(_) => {
                AppError::with_message(ErrorCode::BackendUnavailable, message)
            }
            BackendError::Timeout => AppError::with_message(ErrorCode::TimeoutError, message),
            BackendError::Query(_) => AppError::with_message(ErrorCode::DatabaseError, message),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Quantity change executed by the `adjust_quantity` procedure
///
/// `note` is merged into the record's note and `location_id` links a record
/// that has none, both in the same write as the quantity change.
#[derive(Debug, Clone)]
pub struct StockAdjustment {
    pub identity: ItemIdentity,
    pub delta: i64,
    pub note: Option<String>,
    pub location_id: Option<i64>,
    pub request_id: Option<String>,
}

impl StockAdjustment {
    pub fn new(identity: ItemIdentity, delta: i64) -> Self {
        Self {
            identity,
            delta,
            note: None,
            location_id: None,
            request_id: None,
        }
    }
}

/// Atomic move request executed by the `move_stock` procedure
#[derive(Debug, Clone)]
pub struct MoveStockRequest {
    pub source_id: i64,
    pub quantity: i64,
    pub target: ItemIdentity,
    pub target_location_id: Option<i64>,
    pub request_id: Option<String>,
}

/// Outcome of the `move_stock` procedure
#[derive(Debug, Clone)]
pub struct MoveStockResult {
    pub source_before: InventoryRecord,
    pub source: InventoryRecord,
    /// Target row before the move; `None` when it was created by the move
    pub target_before: Option<InventoryRecord>,
    pub target: InventoryRecord,
}

impl MoveStockResult {
    pub fn merged(&self) -> bool {
        self.target_before.is_some()
    }
}

/// Fold one record into another, executed by the `merge_items` procedure
#[derive(Debug, Clone)]
pub struct MergeItemsRequest {
    pub source_id: i64,
    pub survivor_id: i64,
    /// Units added to the survivor
    pub quantity: i64,
    /// Note merged into the survivor's note
    pub note: Option<String>,
    /// Remove the source row instead of zeroing it
    pub hard: bool,
    pub request_id: Option<String>,
}

/// Outcome of the `merge_items` procedure
#[derive(Debug, Clone)]
pub struct MergeItemsResult {
    pub survivor_before: InventoryRecord,
    pub survivor: InventoryRecord,
    pub source_before: InventoryRecord,
    /// `None` when the source row was removed
    pub source: Option<InventoryRecord>,
}

#[async_trait]
pub trait InventoryBackend: Send + Sync {
    // ========== Stored procedures ==========

    /// Add `delta` (may be negative) to the active record at `identity`
    async fn adjust_quantity(
        &self,
        adjustment: &StockAdjustment,
        actor: &ActorContext,
    ) -> BackendResult<InventoryRecord>;

    /// Decrement the source and merge into (or create) the target record
    async fn move_stock(
        &self,
        request: &MoveStockRequest,
        actor: &ActorContext,
    ) -> BackendResult<MoveStockResult>;

    /// Add the quantity to the survivor and retire the source in one write
    async fn merge_items(
        &self,
        request: &MergeItemsRequest,
        actor: &ActorContext,
    ) -> BackendResult<MergeItemsResult>;

    /// Hard delete (`hard`, admin only) or zero the quantity
    async fn delete_item(
        &self,
        item_id: i64,
        hard: bool,
        actor: &ActorContext,
        request_id: Option<&str>,
    ) -> BackendResult<Option<InventoryRecord>>;

    /// Reverse a log entry; refuses already reversed and non-latest entries
    async fn undo_action(&self, log_id: i64, actor: &ActorContext) -> BackendResult<UndoOutcome>;

    /// Deduct every list line from stock and complete the list
    async fn process_picking_list(
        &self,
        list_id: i64,
        pallets_qty: i64,
        total_units: i64,
        actor: &ActorContext,
    ) -> BackendResult<PickingList>;

    // ========== Inventory rows ==========

    async fn get_item(&self, id: i64) -> BackendResult<Option<InventoryRecord>>;

    /// Active record at `identity`
    async fn find_item(&self, identity: &ItemIdentity) -> BackendResult<Option<InventoryRecord>>;

    async fn items_by_skus(&self, skus: &[String]) -> BackendResult<Vec<InventoryRecord>>;

    async fn all_items(&self) -> BackendResult<Vec<InventoryRecord>>;

    async fn insert_item(
        &self,
        item: InventoryCreate,
        actor: &ActorContext,
        request_id: Option<&str>,
    ) -> BackendResult<InventoryRecord>;

    async fn update_item(
        &self,
        id: i64,
        patch: InventoryUpdate,
        actor: &ActorContext,
        request_id: Option<&str>,
    ) -> BackendResult<InventoryRecord>;

    // ========== Locations ==========

    async fn list_locations(&self, warehouse: &str) -> BackendResult<Vec<Location>>;

    /// Case-insensitive lookup
    async fn find_location(&self, warehouse: &str, name: &str) -> BackendResult<Option<Location>>;

    /// Fails with [`BackendError::UniqueViolation`] when the name already exists
    async fn insert_location(
        &self,
        location: LocationCreate,
        actor: &ActorContext,
    ) -> BackendResult<Location>;

    // ========== Logs ==========

    async fn append_log(&self, entry: InventoryLogCreate) -> BackendResult<InventoryLogEntry>;

    /// Newest first
    async fn logs_for_item(&self, item_id: i64) -> BackendResult<Vec<InventoryLogEntry>>;

    // ========== Request ledger ==========

    /// Whether a mutation stamped with `request_id` has committed
    ///
    /// Every inventory write that carries a request id records it in the same
    /// transaction as its effect.
    async fn request_applied(&self, request_id: &str) -> BackendResult<bool>;

    // ========== Picking lists ==========

    async fn insert_picking_list(&self, list: PickingListCreate) -> BackendResult<PickingList>;

    async fn get_picking_list(&self, id: i64) -> BackendResult<Option<PickingList>>;

    async fn update_picking_list(
        &self,
        id: i64,
        patch: PickingListUpdate,
    ) -> BackendResult<PickingList>;

    async fn delete_picking_list(&self, id: i64) -> BackendResult<()>;

    async fn picking_lists_by_status(
        &self,
        statuses: &[PickingStatus],
    ) -> BackendResult<Vec<PickingList>>;

    /// Put every list checked by `checker` (except `keep`) back in the checker queue
    async fn release_checks_by(&self, checker: &str, keep: Option<i64>) -> BackendResult<usize>;

    async fn add_note(&self, list_id: i64, author_id: &str, message: &str)
    -> BackendResult<PickingNote>;

    async fn notes_for_list(&self, list_id: i64) -> BackendResult<Vec<PickingNote>>;

    // ========== Change stream ==========

    fn subscribe(&self) -> broadcast::Receiver<RowChange>;
}
