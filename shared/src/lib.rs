//! Shared types for the inventory core
//!
//! Domain models, mutation payloads, change events, and the unified
//! error system used by every crate in the workspace.

pub mod change;
pub mod error;
pub mod models;
pub mod mutation;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use change::{ChangeEvent, ChangeKind, RowChange};
pub use error::{AppError, AppResult, ErrorCode, ErrorKind};
pub use mutation::{MutationKey, MutationPayload};
