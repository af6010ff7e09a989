//! Error types

use super::codes::ErrorCode;
use super::kind::ErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Application error with structured error code and details
///
/// This is the error type every public operation of the core returns:
/// - Standardized error codes via [`ErrorCode`]
/// - Human-readable messages
/// - Optional structured details (quantities, identities, ids)
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[error("{message}")]
pub struct AppError {
    /// The error code identifying the type of error
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, Value>>,
}

impl AppError {
    /// Create a new error with the default message for the error code
    pub fn new(code: ErrorCode) -> Self {
        Self {
            message: code.message().to_string(),
            code,
            details: None,
        }
    }

    /// Create a new error with a custom message
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Add a detail entry to this error
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Behavioral kind of this error
    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    /// Whether the mutation queue should retry after this error
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    // ==================== Convenience constructors ====================

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::ValidationFailed, msg)
    }

    /// Create an invalid quantity error
    pub fn invalid_quantity(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self::with_message(
            ErrorCode::InvalidQuantity,
            format!("Invalid quantity: '{}'", raw),
        )
        .with_detail("value", raw)
    }

    /// Create a not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        let r = resource.into();
        Self::with_message(ErrorCode::NotFound, format!("{} not found", r))
            .with_detail("resource", r)
    }

    /// Create a not authenticated error
    pub fn not_authenticated() -> Self {
        Self::new(ErrorCode::NotAuthenticated)
    }

    /// Create a permission denied error
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::PermissionDenied, msg)
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::AlreadyExists, msg)
    }

    /// Create an item-not-found conflict
    pub fn item_not_found(item: impl Into<String>) -> Self {
        let item = item.into();
        Self::with_message(ErrorCode::ItemNotFound, format!("Item not found: {}", item))
            .with_detail("item", item)
    }

    /// Create a stock mismatch conflict (stale client quantity)
    pub fn stock_mismatch(found: i64, requested: i64) -> Self {
        Self::with_message(
            ErrorCode::StockMismatch,
            format!(
                "Stock mismatch: Found {} units, but tried to move {}",
                found, requested
            ),
        )
        .with_detail("found", found)
        .with_detail("requested", requested)
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::NetworkError, msg)
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InternalError, msg)
    }

    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::DatabaseError, msg)
    }
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_new() {
        let err = AppError::new(ErrorCode::ItemNotFound);
        assert_eq!(err.code, ErrorCode::ItemNotFound);
        assert_eq!(err.message, "Inventory item not found");
        assert!(err.details.is_none());
    }

    #[test]
    fn test_app_error_with_detail() {
        let err = AppError::validation("SKU is required")
            .with_detail("field", "sku")
            .with_detail("reason", "empty");

        assert_eq!(err.code, ErrorCode::ValidationFailed);
        let details = err.details.unwrap();
        assert_eq!(details.get("field").unwrap(), "sku");
        assert_eq!(details.get("reason").unwrap(), "empty");
    }

    #[test]
    fn test_stock_mismatch_message() {
        let err = AppError::stock_mismatch(3, 5);
        assert_eq!(err.message, "Stock mismatch: Found 3 units, but tried to move 5");
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_retryable() {
        assert!(AppError::network("offline").is_retryable());
        assert!(!AppError::not_authenticated().is_retryable());
    }

    #[test]
    fn test_serde_round_trip_preserves_code() {
        let err = AppError::invalid_quantity("abc");
        let json = serde_json::to_string(&err).unwrap();
        let back: AppError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
