//! Inventory mutation service
//!
//! Add, move, update and delete stock records. Every operation re-reads the
//! persisted row before writing and leaves an audit log entry that undo can
//! reverse.

pub mod service;

pub use service::{InventoryService, parse_quantity, sanitize_sku};
