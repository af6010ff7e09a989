//! Cart contents and the availability clamp

use crate::reservation::AvailableStock;
use serde::Serialize;
use shared::error::{AppError, AppResult};
use shared::models::{CartItem, ItemIdentity};
use std::fmt;

/// User-visible warning attached to a cart change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CartWarning {
    /// Nothing left once other carts are accounted for
    FullyReserved { sku: String },
    /// Request cut down to what is available
    Clamped {
        sku: String,
        requested: i64,
        available: i64,
        reserved_by_others: i64,
    },
}

impl fmt::Display for CartWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CartWarning::FullyReserved { sku } => {
                write!(f, "{} is fully reserved by other active orders", sku)
            }
            CartWarning::Clamped {
                available,
                reserved_by_others,
                ..
            } => write!(
                f,
                "Only {} units available. {} units are reserved.",
                available, reserved_by_others
            ),
        }
    }
}

/// Outcome of one cart operation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CartChange {
    /// Line quantity after the operation, 0 when the line is absent
    pub quantity: i64,
    pub changed: bool,
    pub warning: Option<CartWarning>,
}

impl CartChange {
    fn unchanged(quantity: i64) -> Self {
        Self {
            quantity,
            changed: false,
            warning: None,
        }
    }
}

/// Clamp `requested` to `max(1, min(requested, available))`
fn limit(sku: &str, requested: i64, stock: &AvailableStock) -> Result<(i64, Option<CartWarning>), CartWarning> {
    if stock.available <= 0 {
        return Err(CartWarning::FullyReserved { sku: sku.to_string() });
    }
    let allowed = requested.min(stock.available).max(1);
    let warning = (requested > stock.available).then(|| CartWarning::Clamped {
        sku: sku.to_string(),
        requested,
        available: stock.available,
        reserved_by_others: stock.reserved_by_others,
    });
    Ok((allowed, warning))
}

/// A picker's working set of lines, one per identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PickingCart {
    items: Vec<CartItem>,
}

impl PickingCart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<CartItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn total_units(&self) -> i64 {
        self.items.iter().map(|i| i.picking_qty).sum()
    }

    pub fn quantity_of(&self, identity: &ItemIdentity) -> i64 {
        self.items
            .iter()
            .find(|i| i.is_same(identity))
            .map_or(0, |i| i.picking_qty)
    }

    pub fn skus(&self) -> Vec<String> {
        let mut skus: Vec<String> = self.items.iter().map(|i| i.sku.clone()).collect();
        skus.sort();
        skus.dedup();
        skus
    }

    fn line_mut(&mut self, identity: &ItemIdentity) -> Option<&mut CartItem> {
        self.items.iter_mut().find(|i| i.is_same(identity))
    }

    /// Add `qty` units, creating the line if needed
    pub fn add(&mut self, identity: &ItemIdentity, qty: i64, stock: &AvailableStock) -> AppResult<CartChange> {
        let current = self.quantity_of(identity);
        if qty <= 0 {
            return Ok(CartChange::unchanged(current));
        }
        let requested = current
            .checked_add(qty)
            .ok_or_else(|| AppError::invalid_quantity(qty.to_string()))?;
        Ok(match limit(&identity.sku, requested, stock) {
            Err(warning) => CartChange {
                quantity: current,
                changed: false,
                warning: Some(warning),
            },
            Ok((allowed, warning)) => {
                match self.line_mut(identity) {
                    Some(line) => line.picking_qty = allowed,
                    None => self.items.push(CartItem::new(identity.clone(), allowed)),
                }
                CartChange {
                    quantity: allowed,
                    changed: allowed != current,
                    warning,
                }
            }
        })
    }

    /// Change an existing line by `delta`; never drops below 1
    pub fn update_qty(&mut self, identity: &ItemIdentity, delta: i64, stock: &AvailableStock) -> AppResult<CartChange> {
        let current = self.quantity_of(identity);
        if current == 0 {
            return Ok(CartChange::unchanged(0));
        }
        let requested = current
            .checked_add(delta)
            .ok_or_else(|| AppError::invalid_quantity(delta.to_string()))?;
        Ok(self.apply(identity, current, requested, stock))
    }

    /// Set an existing line to `qty`; never drops below 1
    pub fn set_qty(&mut self, identity: &ItemIdentity, qty: i64, stock: &AvailableStock) -> CartChange {
        let current = self.quantity_of(identity);
        if current == 0 {
            return CartChange::unchanged(0);
        }
        self.apply(identity, current, qty, stock)
    }

    fn apply(&mut self, identity: &ItemIdentity, current: i64, requested: i64, stock: &AvailableStock) -> CartChange {
        match limit(&identity.sku, requested, stock) {
            Err(warning) => CartChange {
                quantity: current,
                changed: false,
                warning: Some(warning),
            },
            Ok((allowed, warning)) => {
                if let Some(line) = self.line_mut(identity) {
                    line.picking_qty = allowed;
                }
                CartChange {
                    quantity: allowed,
                    changed: allowed != current,
                    warning,
                }
            }
        }
    }

    pub fn remove(&mut self, identity: &ItemIdentity) -> bool {
        let before = self.items.len();
        self.items.retain(|i| !i.is_same(identity));
        self.items.len() != before
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock(available: i64, reserved_by_others: i64) -> AvailableStock {
        AvailableStock {
            available,
            reserved_by_others,
            total_stock: available + reserved_by_others,
            in_my_cart: 0,
        }
    }

    fn id() -> ItemIdentity {
        ItemIdentity::new("A", "LUDLOW", "Row 1")
    }

    #[test]
    fn test_add_clamps_to_available() {
        let mut cart = PickingCart::new();
        let change = cart.add(&id(), 8, &stock(5, 5)).unwrap();
        assert_eq!(change.quantity, 5);
        assert!(change.changed);
        assert!(matches!(change.warning, Some(CartWarning::Clamped { available: 5, .. })));
        assert_eq!(cart.quantity_of(&id()), 5);
    }

    #[test]
    fn test_fully_reserved_is_rejected() {
        let mut cart = PickingCart::new();
        let change = cart.add(&id(), 1, &stock(0, 10)).unwrap();
        assert!(!change.changed);
        assert_eq!(change.warning, Some(CartWarning::FullyReserved { sku: "A".into() }));
        assert!(cart.is_empty());
    }

    #[test]
    fn test_update_qty_never_drops_below_one() {
        let mut cart = PickingCart::new();
        cart.add(&id(), 3, &stock(10, 0)).unwrap();
        let change = cart.update_qty(&id(), -5, &stock(10, 0)).unwrap();
        assert_eq!(change.quantity, 1);
        assert!(change.warning.is_none());
    }

    #[test]
    fn test_set_qty_on_missing_line_is_noop() {
        let mut cart = PickingCart::new();
        let change = cart.set_qty(&id(), 4, &stock(10, 0));
        assert_eq!(change, CartChange::default());
    }

    #[test]
    fn test_remove() {
        let mut cart = PickingCart::new();
        cart.add(&id(), 2, &stock(10, 0)).unwrap();
        assert!(cart.remove(&id()));
        assert!(!cart.remove(&id()));
    }

    #[test]
    fn test_overflowing_quantity_is_rejected() {
        let mut cart = PickingCart::new();
        cart.add(&id(), 2, &stock(10, 0)).unwrap();

        let err = cart.add(&id(), i64::MAX, &stock(10, 0)).unwrap_err();
        assert_eq!(err.code, shared::error::ErrorCode::InvalidQuantity);
        let err = cart.update_qty(&id(), i64::MAX, &stock(10, 0)).unwrap_err();
        assert_eq!(err.code, shared::error::ErrorCode::InvalidQuantity);
        assert_eq!(cart.quantity_of(&id()), 2);
    }
}
