//! Picking List Model

use super::inventory::ItemIdentity;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a picking list
///
/// `Active` is the persisted name of the picking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickingStatus {
    Building,
    #[serde(alias = "picking")]
    Active,
    ReadyToDoubleCheck,
    DoubleChecking,
    NeedsCorrection,
    Completed,
}

impl PickingStatus {
    /// Statuses whose items count as reserved stock
    pub const RESERVING: [PickingStatus; 4] = [
        PickingStatus::Active,
        PickingStatus::ReadyToDoubleCheck,
        PickingStatus::DoubleChecking,
        PickingStatus::NeedsCorrection,
    ];

    pub fn is_reserving(&self) -> bool {
        Self::RESERVING.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PickingStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PickingStatus::Building => "building",
            PickingStatus::Active => "active",
            PickingStatus::ReadyToDoubleCheck => "ready_to_double_check",
            PickingStatus::DoubleChecking => "double_checking",
            PickingStatus::NeedsCorrection => "needs_correction",
            PickingStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for PickingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a cart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub sku: String,
    pub warehouse: String,
    pub location: String,
    pub picking_qty: i64,
}

impl CartItem {
    pub fn new(identity: ItemIdentity, picking_qty: i64) -> Self {
        Self {
            sku: identity.sku,
            warehouse: identity.warehouse,
            location: identity.location,
            picking_qty,
        }
    }

    pub fn identity(&self) -> ItemIdentity {
        ItemIdentity::new(&self.sku, &self.warehouse, &self.location)
    }

    pub fn is_same(&self, identity: &ItemIdentity) -> bool {
        self.sku == identity.sku
            && self.warehouse == identity.warehouse
            && self.location == identity.location
    }
}

/// Persisted picking list (order)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickingList {
    pub id: i64,
    /// Picker holding write rights while the list is active
    pub owner_id: String,
    /// Checker holding write rights while the list is double-checked
    pub checked_by: Option<String>,
    pub status: PickingStatus,
    pub items: Vec<CartItem>,
    pub order_number: Option<String>,
    pub correction_notes: Option<String>,
    pub pallets_qty: Option<i64>,
    pub total_units: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PickingList {
    pub fn quantity_of(&self, identity: &ItemIdentity) -> i64 {
        self.items
            .iter()
            .filter(|i| i.is_same(identity))
            .map(|i| i.picking_qty)
            .sum()
    }

    pub fn total_units(&self) -> i64 {
        self.items.iter().map(|i| i.picking_qty).sum()
    }
}

/// Create picking list payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickingListCreate {
    pub owner_id: String,
    pub status: PickingStatus,
    pub items: Vec<CartItem>,
    pub order_number: Option<String>,
}

/// Partial update payload; `Some(None)` clears a nullable column
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PickingListUpdate {
    pub owner_id: Option<String>,
    pub checked_by: Option<Option<String>>,
    pub status: Option<PickingStatus>,
    pub items: Option<Vec<CartItem>>,
    pub order_number: Option<Option<String>>,
    pub correction_notes: Option<Option<String>>,
    pub pallets_qty: Option<i64>,
    pub total_units: Option<i64>,
}

/// Timeline note attached to a picking list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickingNote {
    pub id: i64,
    pub list_id: i64,
    pub author_id: String,
    pub message: String,
    pub created_at: i64,
}
