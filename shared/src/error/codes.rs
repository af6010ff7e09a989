//! Unified error codes for the inventory core
//!
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 1xxx: Authentication / session errors
//! - 2xxx: Permission errors
//! - 3xxx: Inventory errors
//! - 4xxx: Location errors
//! - 5xxx: Picking errors
//! - 6xxx: Mutation queue errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values so they survive
/// serialization into the durable mutation queue unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Resource already exists
    AlreadyExists = 4,
    /// Invalid request
    InvalidRequest = 5,
    /// Quantity is negative or not a number
    InvalidQuantity = 6,
    /// Required field missing
    RequiredField = 7,

    // ==================== 1xxx: Auth ====================
    /// Actor is not authenticated
    NotAuthenticated = 1001,
    /// Session has expired
    SessionExpired = 1002,
    /// Token is invalid
    TokenInvalid = 1003,

    // ==================== 2xxx: Permission ====================
    /// Permission denied
    PermissionDenied = 2001,
    /// Creating a new location requires elevated privilege
    LocationCreateForbidden = 2002,
    /// Hard delete requires elevated privilege
    HardDeleteForbidden = 2003,

    // ==================== 3xxx: Inventory ====================
    /// Inventory item not found
    ItemNotFound = 3001,
    /// Not enough stock for the requested operation
    InsufficientStock = 3002,
    /// Client-held quantity no longer matches the server
    StockMismatch = 3003,
    /// Another active record already holds this identity
    IdentityCollision = 3004,
    /// Log entry not found
    LogNotFound = 3101,
    /// Log entry has already been reversed
    AlreadyReversed = 3102,
    /// A newer log entry must be undone first
    LifoViolation = 3103,

    // ==================== 4xxx: Location ====================
    /// Location not found
    LocationNotFound = 4001,
    /// Location name is empty
    LocationNameRequired = 4002,

    // ==================== 5xxx: Picking ====================
    /// Picking list not found
    PickingListNotFound = 5001,
    /// Cart has no items
    CartEmpty = 5002,
    /// Cart cannot be edited in its current state
    CartLocked = 5003,
    /// Picking list is completed
    ListCompleted = 5004,
    /// Status transition is not allowed
    InvalidTransition = 5005,
    /// Acting user already owns the order
    TakeOverSelf = 5006,
    /// Stock already reserved by other carts
    StockUnavailable = 5007,

    // ==================== 6xxx: Mutation queue ====================
    /// Queued mutation not found
    MutationNotFound = 6001,
    /// No replay handler registered for the mutation key
    ReplayNotRegistered = 6002,
    /// Queued mutation payload is corrupt
    MutationCorrupted = 6003,

    // ==================== 9xxx: System ====================
    /// Internal error
    InternalError = 9001,
    /// Database error
    DatabaseError = 9002,
    /// Network error
    NetworkError = 9003,
    /// Operation timed out
    TimeoutError = 9004,
    /// Configuration error
    ConfigError = 9005,
    /// Backend temporarily unavailable
    BackendUnavailable = 9006,
    /// Storage full (disk space insufficient)
    StorageFull = 9401,
    /// Storage corrupted
    StorageCorrupted = 9403,
}

impl ErrorCode {
    /// Get the numeric code value
    #[inline]
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Check if this is a success code
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Success)
    }

    /// Get the default message for this error code
    pub fn message(&self) -> &'static str {
        match self {
            // General
            ErrorCode::Success => "Success",
            ErrorCode::Unknown => "Unknown error",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::AlreadyExists => "Resource already exists",
            ErrorCode::InvalidRequest => "Invalid request",
            ErrorCode::InvalidQuantity => "Quantity must be a non-negative number",
            ErrorCode::RequiredField => "Required field missing",

            // Auth
            ErrorCode::NotAuthenticated => "Not authenticated",
            ErrorCode::SessionExpired => "Session has expired",
            ErrorCode::TokenInvalid => "Token is invalid",

            // Permission
            ErrorCode::PermissionDenied => "Permission denied",
            ErrorCode::LocationCreateForbidden => "Only admins can create new locations",
            ErrorCode::HardDeleteForbidden => "Only admins can permanently delete items",

            // Inventory
            ErrorCode::ItemNotFound => "Inventory item not found",
            ErrorCode::InsufficientStock => "Insufficient stock",
            ErrorCode::StockMismatch => "Stock mismatch",
            ErrorCode::IdentityCollision => "An item already exists at this location",
            ErrorCode::LogNotFound => "Log entry not found",
            ErrorCode::AlreadyReversed => "Action already reversed",
            ErrorCode::LifoViolation => "LIFO Violation: undo newer actions first",

            // Location
            ErrorCode::LocationNotFound => "Location not found",
            ErrorCode::LocationNameRequired => "Location name is required",

            // Picking
            ErrorCode::PickingListNotFound => "Picking list not found",
            ErrorCode::CartEmpty => "Cannot mark an empty order as ready",
            ErrorCode::CartLocked => "Cart is locked in its current state",
            ErrorCode::ListCompleted => "Picking list is already completed",
            ErrorCode::InvalidTransition => "Invalid status transition",
            ErrorCode::TakeOverSelf => "You already own this order",
            ErrorCode::StockUnavailable => "Stock is reserved by other orders",

            // Mutation queue
            ErrorCode::MutationNotFound => "Queued mutation not found",
            ErrorCode::ReplayNotRegistered => "No replay handler registered",
            ErrorCode::MutationCorrupted => "Queued mutation is corrupt",

            // System
            ErrorCode::InternalError => "Internal error",
            ErrorCode::DatabaseError => "Database error",
            ErrorCode::NetworkError => "Network error",
            ErrorCode::TimeoutError => "Operation timed out",
            ErrorCode::ConfigError => "Configuration error",
            ErrorCode::BackendUnavailable => "Backend unavailable",
            ErrorCode::StorageFull => "Storage full (disk space insufficient)",
            ErrorCode::StorageCorrupted => "Storage corrupted (data file damaged)",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error when converting from an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            // General
            0 => Ok(ErrorCode::Success),
            1 => Ok(ErrorCode::Unknown),
            2 => Ok(ErrorCode::ValidationFailed),
            3 => Ok(ErrorCode::NotFound),
            4 => Ok(ErrorCode::AlreadyExists),
            5 => Ok(ErrorCode::InvalidRequest),
            6 => Ok(ErrorCode::InvalidQuantity),
            7 => Ok(ErrorCode::RequiredField),

            // Auth
            1001 => Ok(ErrorCode::NotAuthenticated),
            1002 => Ok(ErrorCode::SessionExpired),
            1003 => Ok(ErrorCode::TokenInvalid),

            // Permission
            2001 => Ok(ErrorCode::PermissionDenied),
            2002 => Ok(ErrorCode::LocationCreateForbidden),
            2003 => Ok(ErrorCode::HardDeleteForbidden),

            // Inventory
            3001 => Ok(ErrorCode::ItemNotFound),
            3002 => Ok(ErrorCode::InsufficientStock),
            3003 => Ok(ErrorCode::StockMismatch),
            3004 => Ok(ErrorCode::IdentityCollision),
            3101 => Ok(ErrorCode::LogNotFound),
            3102 => Ok(ErrorCode::AlreadyReversed),
            3103 => Ok(ErrorCode::LifoViolation),

            // Location
            4001 => Ok(ErrorCode::LocationNotFound),
            4002 => Ok(ErrorCode::LocationNameRequired),

            // Picking
            5001 => Ok(ErrorCode::PickingListNotFound),
            5002 => Ok(ErrorCode::CartEmpty),
            5003 => Ok(ErrorCode::CartLocked),
            5004 => Ok(ErrorCode::ListCompleted),
            5005 => Ok(ErrorCode::InvalidTransition),
            5006 => Ok(ErrorCode::TakeOverSelf),
            5007 => Ok(ErrorCode::StockUnavailable),

            // Mutation queue
            6001 => Ok(ErrorCode::MutationNotFound),
            6002 => Ok(ErrorCode::ReplayNotRegistered),
            6003 => Ok(ErrorCode::MutationCorrupted),

            // System
            9001 => Ok(ErrorCode::InternalError),
            9002 => Ok(ErrorCode::DatabaseError),
            9003 => Ok(ErrorCode::NetworkError),
            9004 => Ok(ErrorCode::TimeoutError),
            9005 => Ok(ErrorCode::ConfigError),
            9006 => Ok(ErrorCode::BackendUnavailable),
            9401 => Ok(ErrorCode::StorageFull),
            9403 => Ok(ErrorCode::StorageCorrupted),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::Success.code(), 0);
        assert_eq!(ErrorCode::InvalidQuantity.code(), 6);
        assert_eq!(ErrorCode::SessionExpired.code(), 1002);
        assert_eq!(ErrorCode::LocationCreateForbidden.code(), 2002);
        assert_eq!(ErrorCode::LifoViolation.code(), 3103);
        assert_eq!(ErrorCode::LocationNotFound.code(), 4001);
        assert_eq!(ErrorCode::StockUnavailable.code(), 5007);
        assert_eq!(ErrorCode::MutationCorrupted.code(), 6003);
        assert_eq!(ErrorCode::BackendUnavailable.code(), 9006);
    }

    #[test]
    fn test_try_from_round_trips_every_known_code() {
        for raw in 0u16..10_000 {
            if let Ok(code) = ErrorCode::try_from(raw) {
                assert_eq!(code.code(), raw);
            }
        }
        assert_eq!(ErrorCode::try_from(4242), Err(InvalidErrorCode(4242)));
    }

    #[test]
    fn test_serde_as_number() {
        let json = serde_json::to_string(&ErrorCode::AlreadyReversed).unwrap();
        assert_eq!(json, "3102");
        let parsed: ErrorCode = serde_json::from_str("3103").unwrap();
        assert_eq!(parsed, ErrorCode::LifoViolation);
    }

    #[test]
    fn test_is_success() {
        assert!(ErrorCode::Success.is_success());
        assert!(!ErrorCode::Unknown.is_success());
    }
}
