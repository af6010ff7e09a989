//! Data models
//!
//! Row types of the remote store as seen by the inventory core.
//! All row IDs are `i64`; negative IDs are reserved for optimistic rows.

pub mod actor;
pub mod inventory;
pub mod inventory_log;
pub mod location;
pub mod picking;

// Re-exports
pub use actor::*;
pub use inventory::*;
pub use inventory_log::*;
pub use location::*;
pub use picking::*;
