//! Actor context carried inline by every mutation

use serde::{Deserialize, Serialize};

/// Role reported by the identity oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    #[default]
    Staff,
}

/// Who performs a mutation
///
/// Stored inside queued payloads so replay never depends on a live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    /// Display name written to the audit log
    pub performed_by: String,
    pub user_id: Option<String>,
    #[serde(default)]
    pub role: Role,
}

impl ActorContext {
    pub const RESUMED_NAME: &'static str = "System (resumed)";

    pub fn new(performed_by: impl Into<String>, user_id: impl Into<String>, role: Role) -> Self {
        Self {
            performed_by: performed_by.into(),
            user_id: Some(user_id.into()),
            role,
        }
    }

    pub fn admin(name: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::new(name, user_id, Role::Admin)
    }

    pub fn staff(name: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::new(name, user_id, Role::Staff)
    }

    /// Fallback actor for payloads persisted without a usable context
    pub fn resumed() -> Self {
        Self {
            performed_by: Self::RESUMED_NAME.to_string(),
            user_id: None,
            role: Role::Staff,
        }
    }

    pub fn is_privileged(&self) -> bool {
        self.role == Role::Admin
    }

    /// Stable id for ownership checks (falls back to the display name)
    pub fn id(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.performed_by)
    }
}
