//! Row change notifications pushed by the backend

use crate::models::{InventoryRecord, Location, PickingList};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One change on a watched table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent<T> {
    pub event_type: ChangeKind,
    pub new: Option<T>,
    pub old: Option<T>,
}

impl<T> ChangeEvent<T> {
    pub fn insert(new: T) -> Self {
        Self {
            event_type: ChangeKind::Insert,
            new: Some(new),
            old: None,
        }
    }

    pub fn update(old: T, new: T) -> Self {
        Self {
            event_type: ChangeKind::Update,
            new: Some(new),
            old: Some(old),
        }
    }

    pub fn delete(old: T) -> Self {
        Self {
            event_type: ChangeKind::Delete,
            new: None,
            old: Some(old),
        }
    }
}

/// Change event tagged with its source table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum RowChange {
    Inventory(ChangeEvent<InventoryRecord>),
    Locations(ChangeEvent<Location>),
    PickingLists(ChangeEvent<PickingList>),
}
