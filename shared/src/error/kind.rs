//! Error kind: how callers and the mutation queue react to an error

use super::codes::ErrorCode;
use serde::{Deserialize, Serialize};

/// Behavioral classification of an error code
///
/// | Kind | Reaction |
/// |------|----------|
/// | `Validation` | Rejected locally, never reaches the queue |
/// | `Authorization` | Privilege required, surfaced to the user |
/// | `Conflict` | Stale or colliding state, re-read and resolve |
/// | `Transient` | Network/backend outage, retried with backoff |
/// | `Terminal` | Auth/session invalid, not retried, forces re-authentication |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authorization,
    Conflict,
    Transient,
    Terminal,
}

impl ErrorKind {
    /// Whether a queued mutation failing with this kind should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl ErrorCode {
    /// Map this code onto its behavioral kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Success
            | Self::ValidationFailed
            | Self::InvalidRequest
            | Self::InvalidQuantity
            | Self::RequiredField
            | Self::LocationNameRequired
            | Self::CartEmpty
            | Self::MutationCorrupted => ErrorKind::Validation,

            Self::PermissionDenied
            | Self::LocationCreateForbidden
            | Self::HardDeleteForbidden => ErrorKind::Authorization,

            Self::AlreadyExists
            | Self::ItemNotFound
            | Self::InsufficientStock
            | Self::StockMismatch
            | Self::IdentityCollision
            | Self::LogNotFound
            | Self::AlreadyReversed
            | Self::LifoViolation
            | Self::LocationNotFound
            | Self::PickingListNotFound
            | Self::CartLocked
            | Self::ListCompleted
            | Self::InvalidTransition
            | Self::TakeOverSelf
            | Self::StockUnavailable => ErrorKind::Conflict,

            Self::NotAuthenticated
            | Self::SessionExpired
            | Self::TokenInvalid
            | Self::NotFound
            | Self::ReplayNotRegistered
            | Self::ConfigError
            | Self::StorageCorrupted => ErrorKind::Terminal,

            Self::Unknown
            | Self::MutationNotFound
            | Self::InternalError
            | Self::DatabaseError
            | Self::NetworkError
            | Self::TimeoutError
            | Self::BackendUnavailable
            | Self::StorageFull => ErrorKind::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(ErrorCode::NetworkError.kind().is_retryable());
        assert!(ErrorCode::BackendUnavailable.kind().is_retryable());
        assert!(!ErrorCode::SessionExpired.kind().is_retryable());
        assert!(!ErrorCode::PermissionDenied.kind().is_retryable());
        assert!(!ErrorCode::StockMismatch.kind().is_retryable());
    }

    #[test]
    fn test_session_errors_are_terminal() {
        assert_eq!(ErrorCode::NotAuthenticated.kind(), ErrorKind::Terminal);
        assert_eq!(ErrorCode::TokenInvalid.kind(), ErrorKind::Terminal);
        assert_eq!(ErrorCode::NotFound.kind(), ErrorKind::Terminal);
    }
}
