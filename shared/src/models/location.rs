//! Location Model

use serde::{Deserialize, Serialize};

/// Canonical storage location inside a warehouse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: i64,
    pub warehouse: String,
    pub name: String,
    pub max_capacity: Option<i64>,
    pub zone: String,
    /// Walk order used by the picking path; lower is visited first
    pub picking_order: Option<i32>,
    pub is_active: bool,
}

/// Create location payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationCreate {
    pub warehouse: String,
    pub name: String,
    pub max_capacity: Option<i64>,
    pub zone: String,
    pub picking_order: Option<i32>,
    pub is_active: bool,
}
