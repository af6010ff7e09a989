//! Unified error system for the inventory core
//!
//! - [`ErrorCode`]: Standardized error codes for all error types
//! - [`ErrorCategory`]: Classification of errors by domain
//! - [`ErrorKind`]: Behavioral classification (validation, authorization, conflict, transient, terminal)
//! - [`AppError`]: Rich error type with codes, messages, and details
//!
//! # Error Code Ranges
//!
//! - 0xxx: General errors
//! - 1xxx: Authentication errors
//! - 2xxx: Permission errors
//! - 3xxx: Inventory errors
//! - 4xxx: Location errors
//! - 5xxx: Picking errors
//! - 6xxx: Mutation queue errors
//! - 9xxx: System errors
//!
//! # Example
//!
//! ```
//! use shared::error::{AppError, ErrorCode, ErrorKind};
//!
//! let err = AppError::new(ErrorCode::LifoViolation);
//! assert_eq!(err.kind(), ErrorKind::Conflict);
//!
//! let err = AppError::validation("SKU is required").with_detail("field", "sku");
//! assert!(!err.is_retryable());
//! ```

mod category;
mod codes;
mod kind;
mod types;

pub use category::ErrorCategory;
pub use codes::{ErrorCode, InvalidErrorCode};
pub use kind::ErrorKind;
pub use types::{AppError, AppResult};
