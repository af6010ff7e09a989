//! Client-side inventory cache
//!
//! Keeps the rows the user is looking at in sync with backend change events
//! without refetching:
//!
//! - INSERT replaces the optimistic row for the same slot (negative id)
//! - UPDATE patches one row; remote quantities that contradict a local edit
//!   younger than the ghost window are ignored
//! - DELETE drops the row
//!
//! Once the mutation queue drains, [`InventoryCache`] is invalidated as a
//! whole to pick up server-side changes that interleaved with ours.

mod patcher;

pub use patcher::{InventoryCache, InventoryView, UpdateSource, ViewFilter, normalize_location};
