//! Error category classification

use super::codes::ErrorCode;
use serde::{Deserialize, Serialize};

/// Error category classification based on error code ranges
///
/// Categories are determined by the leading digit of the error code:
/// - 0xxx: General errors
/// - 1xxx: Authentication errors
/// - 2xxx: Permission errors
/// - 3xxx: Inventory errors
/// - 4xxx: Location errors
/// - 5xxx: Picking errors
/// - 6xxx: Mutation queue errors
/// - 9xxx: System errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// General errors (0xxx)
    General,
    /// Authentication errors (1xxx)
    Auth,
    /// Permission errors (2xxx)
    Permission,
    /// Inventory errors (3xxx)
    Inventory,
    /// Location errors (4xxx)
    Location,
    /// Picking errors (5xxx)
    Picking,
    /// Mutation queue errors (6xxx)
    Queue,
    /// System errors (9xxx and anything unassigned)
    System,
}

impl ErrorCategory {
    /// Determine category from error code value
    pub fn from_code(code: u16) -> Self {
        match code {
            0..1000 => Self::General,
            1000..2000 => Self::Auth,
            2000..3000 => Self::Permission,
            3000..4000 => Self::Inventory,
            4000..5000 => Self::Location,
            5000..6000 => Self::Picking,
            6000..7000 => Self::Queue,
            _ => Self::System,
        }
    }

    /// Get the string name for this category
    pub fn name(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Auth => "auth",
            Self::Permission => "permission",
            Self::Inventory => "inventory",
            Self::Location => "location",
            Self::Picking => "picking",
            Self::Queue => "queue",
            Self::System => "system",
        }
    }
}

impl ErrorCode {
    /// Get the category for this error code
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from_code(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_code() {
        assert_eq!(ErrorCategory::from_code(0), ErrorCategory::General);
        assert_eq!(ErrorCategory::from_code(999), ErrorCategory::General);
        assert_eq!(ErrorCategory::from_code(1001), ErrorCategory::Auth);
        assert_eq!(ErrorCategory::from_code(2001), ErrorCategory::Permission);
        assert_eq!(ErrorCategory::from_code(3103), ErrorCategory::Inventory);
        assert_eq!(ErrorCategory::from_code(4001), ErrorCategory::Location);
        assert_eq!(ErrorCategory::from_code(5001), ErrorCategory::Picking);
        assert_eq!(ErrorCategory::from_code(6001), ErrorCategory::Queue);
        assert_eq!(ErrorCategory::from_code(7001), ErrorCategory::System);
        assert_eq!(ErrorCategory::from_code(9001), ErrorCategory::System);
    }

    #[test]
    fn test_error_code_category() {
        assert_eq!(ErrorCode::NotAuthenticated.category(), ErrorCategory::Auth);
        assert_eq!(ErrorCode::StockMismatch.category(), ErrorCategory::Inventory);
        assert_eq!(ErrorCode::CartLocked.category(), ErrorCategory::Picking);
        assert_eq!(ErrorCode::StorageFull.category(), ErrorCategory::System);
    }
}
