//! Picking carts and sessions

pub mod cart;
pub mod path;
pub mod saver;
pub mod session;

pub use cart::{CartChange, CartWarning, PickingCart};
pub use path::{
    DEFAULT_PICKING_ORDER, MAX_UNITS_PER_PALLET, Pallet, PalletPlan, SkuDimensions,
    calculate_pallets, optimized_picking_path,
};
pub use saver::{CartSnapshot, DebouncedSaver};
pub use session::{DEFAULT_STALE_AFTER_MS, PickingSession};
