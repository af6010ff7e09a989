//! Picking path ordering and pallet planning

use serde::Serialize;
use shared::models::{CartItem, Location};
use std::collections::HashMap;

pub const MAX_UNITS_PER_PALLET: i64 = 12;

/// Rank used for locations without a `picking_order`
pub const DEFAULT_PICKING_ORDER: i32 = 9999;

const DEFAULT_LENGTH_FT: f64 = 5.0;
const DEFAULT_WIDTH_IN: f64 = 6.0;

/// Physical size of one unit of a SKU
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkuDimensions {
    pub length_ft: f64,
    pub width_in: f64,
}

impl Default for SkuDimensions {
    fn default() -> Self {
        Self {
            length_ft: DEFAULT_LENGTH_FT,
            width_in: DEFAULT_WIDTH_IN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pallet {
    pub id: usize,
    pub items: Vec<CartItem>,
    pub total_units: i64,
    pub footprint_in2: f64,
}

impl Pallet {
    fn new(id: usize) -> Self {
        Self {
            id,
            items: Vec::new(),
            total_units: 0,
            footprint_in2: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PalletPlan {
    pub pallets: Vec<Pallet>,
    pub pallets_qty: i64,
    pub total_units: i64,
}

/// Sort lines by SKU, then by the location's picking order
pub fn optimized_picking_path(items: &[CartItem], locations: &[Location]) -> Vec<CartItem> {
    let order: HashMap<(&str, &str), i32> = locations
        .iter()
        .map(|l| {
            (
                (l.warehouse.as_str(), l.name.as_str()),
                l.picking_order.unwrap_or(DEFAULT_PICKING_ORDER),
            )
        })
        .collect();
    let rank = |item: &CartItem| {
        order
            .get(&(item.warehouse.as_str(), item.location.as_str()))
            .copied()
            .unwrap_or(DEFAULT_PICKING_ORDER)
    };

    let mut path = items.to_vec();
    path.sort_by(|a, b| a.sku.cmp(&b.sku).then_with(|| rank(a).cmp(&rank(b))));
    path
}

/// Split lines across pallets of at most [`MAX_UNITS_PER_PALLET`] units
///
/// The base layer holds about 40% of a pallet (capped at 5 units); the
/// footprint is `(length_ft * 12) * (width_in * base_units)` square inches.
pub fn calculate_pallets(items: &[CartItem], dimensions: &HashMap<String, SkuDimensions>) -> PalletPlan {
    let mut pallets = Vec::new();
    let mut current = Pallet::new(1);

    for item in items {
        let dims = dimensions.get(&item.sku).copied().unwrap_or_default();
        let mut remaining = item.picking_qty.max(0);

        while remaining > 0 {
            let take = remaining.min(MAX_UNITS_PER_PALLET - current.total_units);
            match current
                .items
                .iter_mut()
                .find(|i| i.sku == item.sku && i.location == item.location)
            {
                Some(line) => line.picking_qty += take,
                None => {
                    let mut line = item.clone();
                    line.picking_qty = take;
                    current.items.push(line);
                }
            }
            current.total_units += take;
            remaining -= take;

            let base_units = ((current.total_units as f64) * 0.4).ceil().min(5.0);
            current.footprint_in2 = (dims.length_ft * 12.0) * (dims.width_in * base_units);

            if current.total_units >= MAX_UNITS_PER_PALLET {
                let next = Pallet::new(pallets.len() + 2);
                pallets.push(std::mem::replace(&mut current, next));
            }
        }
    }
    if !current.items.is_empty() {
        pallets.push(current);
    }

    let total_units = pallets.iter().map(|p| p.total_units).sum();
    PalletPlan {
        pallets_qty: pallets.len() as i64,
        total_units,
        pallets,
    }
}
