//! Inventory Log Model (append-only audit trail)

use super::inventory::InventoryRecord;
use serde::{Deserialize, Serialize};

/// Kind of change recorded by a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogAction {
    Add,
    Move,
    Edit,
    Deduct,
    Delete,
}

impl std::fmt::Display for LogAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogAction::Add => write!(f, "ADD"),
            LogAction::Move => write!(f, "MOVE"),
            LogAction::Edit => write!(f, "EDIT"),
            LogAction::Deduct => write!(f, "DEDUCT"),
            LogAction::Delete => write!(f, "DELETE"),
        }
    }
}

/// Audit record of one mutation
///
/// Never mutated after creation except for `is_reversed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryLogEntry {
    pub id: i64,
    pub action: LogAction,
    pub sku: String,
    /// Record the entry belongs to (the survivor for merges)
    pub item_id: Option<i64>,
    pub from_warehouse: Option<String>,
    pub from_location: Option<String>,
    pub to_warehouse: Option<String>,
    pub to_location: Option<String>,
    pub quantity_change: i64,
    pub prev_quantity: i64,
    pub new_quantity: i64,
    /// Set when an edit renamed the SKU, so undo can restore it
    pub previous_sku: Option<String>,
    pub performed_by: String,
    pub user_id: Option<String>,
    pub list_id: Option<i64>,
    pub order_number: Option<String>,
    /// Row state before the mutation; `None` when the row did not exist
    pub snapshot_before: Option<InventoryRecord>,
    /// Second row touched by a move or merge (the source side)
    pub related_item_id: Option<i64>,
    pub related_snapshot_before: Option<InventoryRecord>,
    /// Queued mutation id that produced this entry
    pub request_id: Option<String>,
    pub is_reversed: bool,
    pub created_at: i64,
}

impl InventoryLogEntry {
    /// Row ids whose state this entry changed
    pub fn touched_items(&self) -> impl Iterator<Item = i64> + '_ {
        self.item_id.into_iter().chain(self.related_item_id)
    }

    pub fn touches(&self, item_id: i64) -> bool {
        self.touched_items().any(|id| id == item_id)
    }
}

/// Append log payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryLogCreate {
    pub action: LogAction,
    pub sku: String,
    pub item_id: Option<i64>,
    pub from_warehouse: Option<String>,
    pub from_location: Option<String>,
    pub to_warehouse: Option<String>,
    pub to_location: Option<String>,
    pub quantity_change: i64,
    pub prev_quantity: i64,
    pub new_quantity: i64,
    pub previous_sku: Option<String>,
    pub performed_by: String,
    pub user_id: Option<String>,
    pub list_id: Option<i64>,
    pub order_number: Option<String>,
    pub snapshot_before: Option<InventoryRecord>,
    pub related_item_id: Option<i64>,
    pub related_snapshot_before: Option<InventoryRecord>,
    pub request_id: Option<String>,
}

impl InventoryLogCreate {
    /// Entry skeleton for `action` on `sku`; callers fill in the rest
    pub fn new(action: LogAction, sku: impl Into<String>, performed_by: impl Into<String>) -> Self {
        Self {
            action,
            sku: sku.into(),
            item_id: None,
            from_warehouse: None,
            from_location: None,
            to_warehouse: None,
            to_location: None,
            quantity_change: 0,
            prev_quantity: 0,
            new_quantity: 0,
            previous_sku: None,
            performed_by: performed_by.into(),
            user_id: None,
            list_id: None,
            order_number: None,
            snapshot_before: None,
            related_item_id: None,
            related_snapshot_before: None,
            request_id: None,
        }
    }
}

/// Result of the undo stored procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoOutcome {
    pub success: bool,
    pub message: String,
}
