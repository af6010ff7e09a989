//! Failure classification for queued mutations

use super::PendingMutation;
use shared::error::{AppError, ErrorCode, ErrorKind};

/// Error messages that mean the entry can never succeed against the current schema
const CORRUPT_SIGNATURES: &[&str] = &[
    "invalid input syntax",
    "NaN",
    "schema cache",
    "does not exist",
    "PGRST204",
];

/// How the worker reacts to a failed replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Not retried; moved to the failed queue
    Terminal,
    /// Retried with backoff, counted against the retry budget
    Transient,
    /// No connectivity; paused with backoff, budget untouched
    Offline,
}

/// Classify a replay error
///
/// Session, authorization, validation and not-found failures are terminal.
/// Connectivity failures pause. Everything else, conflicts included, is
/// retried.
pub fn classify(err: &AppError) -> FailureClass {
    match err.code {
        ErrorCode::NetworkError | ErrorCode::BackendUnavailable => return FailureClass::Offline,
        ErrorCode::NotFound
        | ErrorCode::ItemNotFound
        | ErrorCode::LocationNotFound
        | ErrorCode::PickingListNotFound
        | ErrorCode::LogNotFound => return FailureClass::Terminal,
        _ => {}
    }
    match err.kind() {
        ErrorKind::Terminal | ErrorKind::Authorization | ErrorKind::Validation => {
            FailureClass::Terminal
        }
        ErrorKind::Conflict | ErrorKind::Transient => FailureClass::Transient,
    }
}

/// Whether the failure means the session is gone and the user must sign in again
pub fn requires_reauth(err: &AppError) -> bool {
    matches!(
        err.code,
        ErrorCode::NotAuthenticated | ErrorCode::SessionExpired | ErrorCode::TokenInvalid
    )
}

/// Whether a queued entry is provably unrecoverable
///
/// Generic transient errors (network, timeouts) never make an entry corrupt.
pub fn is_corrupt(mutation: &PendingMutation) -> bool {
    if mutation.key != mutation.payload.key() {
        return true;
    }
    if mutation.payload.referenced_ids().iter().any(|id| *id <= 0) {
        return true;
    }
    if mutation.last_error_code == Some(ErrorCode::MutationCorrupted) {
        return true;
    }
    mutation
        .last_error
        .as_deref()
        .is_some_and(|msg| CORRUPT_SIGNATURES.iter().any(|sig| msg.contains(sig)))
}
