//! Reservation ledger
//!
//! Derived view of how much stock every in-flight picking list claims.
//! Nothing here is persisted: a ledger is a snapshot rebuilt from the
//! current lists and stock whenever a cart needs an answer.

use crate::backend::InventoryBackend;
use serde::Serialize;
use shared::error::{AppError, AppResult, ErrorCode};
use shared::models::{CartItem, InventoryRecord, ItemIdentity, PickingList, PickingStatus};
use std::collections::{BTreeSet, HashMap};

/// Availability of one identity as seen by one cart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AvailableStock {
    /// Units this cart may hold in total
    pub available: i64,
    pub reserved_by_others: i64,
    pub total_stock: i64,
    pub in_my_cart: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ReservationLedger {
    stock: HashMap<ItemIdentity, i64>,
    /// identity -> list id -> reserved units
    reserved: HashMap<ItemIdentity, HashMap<i64, i64>>,
}

impl ReservationLedger {
    /// Build from picking lists and stock rows; non-reserving lists and
    /// inactive rows are ignored
    pub fn from_lists(lists: &[PickingList], stock: &[InventoryRecord]) -> Self {
        let mut ledger = Self::default();
        for record in stock.iter().filter(|r| r.is_active) {
            *ledger.stock.entry(record.identity()).or_default() += record.quantity;
        }
        for list in lists.iter().filter(|l| l.status.is_reserving()) {
            for item in &list.items {
                *ledger
                    .reserved
                    .entry(item.identity())
                    .or_default()
                    .entry(list.id)
                    .or_default() += item.picking_qty;
            }
        }
        ledger
    }

    /// Load every reserving list plus stock for their SKUs and `extra_skus`
    pub async fn load(backend: &dyn InventoryBackend, extra_skus: &[String]) -> AppResult<Self> {
        let lists = backend
            .picking_lists_by_status(&PickingStatus::RESERVING)
            .await?;
        let skus: BTreeSet<String> = lists
            .iter()
            .flat_map(|l| l.items.iter().map(|i| i.sku.clone()))
            .chain(extra_skus.iter().cloned())
            .collect();
        let skus: Vec<String> = skus.into_iter().collect();
        let stock = if skus.is_empty() {
            Vec::new()
        } else {
            backend.items_by_skus(&skus).await?
        };
        tracing::debug!(lists = lists.len(), skus = skus.len(), "Reservation ledger loaded");
        Ok(Self::from_lists(&lists, &stock))
    }

    pub fn stock_of(&self, identity: &ItemIdentity) -> i64 {
        self.stock.get(identity).copied().unwrap_or(0)
    }

    /// Units reserved across every reserving list
    pub fn reserved_total(&self, identity: &ItemIdentity) -> i64 {
        self.reserved
            .get(identity)
            .map_or(0, |by_list| by_list.values().sum())
    }

    /// Units reserved by one list
    pub fn reserved_by(&self, list_id: i64, identity: &ItemIdentity) -> i64 {
        self.reserved
            .get(identity)
            .and_then(|by_list| by_list.get(&list_id))
            .copied()
            .unwrap_or(0)
    }

    /// Availability for a cart
    ///
    /// `list_id` is the cart's persisted list (if any) so its own
    /// reservation is not counted against it; `in_my_cart` is the cart's
    /// current local quantity.
    pub fn available(
        &self,
        identity: &ItemIdentity,
        list_id: Option<i64>,
        in_my_cart: i64,
    ) -> AvailableStock {
        let mine = list_id.map_or(0, |id| self.reserved_by(id, identity));
        let reserved_by_others = self.reserved_total(identity) - mine;
        let total_stock = self.stock_of(identity);
        AvailableStock {
            available: total_stock - reserved_by_others,
            reserved_by_others,
            total_stock,
            in_my_cart,
        }
    }

    /// Re-check a whole cart at a commit point
    pub fn validate_cart(&self, items: &[CartItem], list_id: Option<i64>) -> AppResult<()> {
        for item in items {
            let identity = item.identity();
            let stock = self.available(&identity, list_id, item.picking_qty);
            if item.picking_qty > stock.available {
                return Err(AppError::with_message(
                    ErrorCode::StockUnavailable,
                    format!(
                        "Only {} units of {} available at {} ({} reserved by other orders)",
                        stock.available.max(0),
                        item.sku,
                        item.location,
                        stock.reserved_by_others
                    ),
                )
                .with_detail("sku", item.sku.clone())
                .with_detail("available", stock.available.max(0))
                .with_detail("requested", item.picking_qty));
            }
        }
        Ok(())
    }
}
