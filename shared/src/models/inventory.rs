//! Inventory Record Model

use serde::{Deserialize, Serialize};

/// One stock record, addressed by its (sku, warehouse, location) identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub id: i64,
    pub sku: String,
    pub warehouse: String,
    pub location: Option<String>,
    pub location_id: Option<i64>,
    /// Always >= 0
    pub quantity: i64,
    pub capacity: Option<i64>,
    /// Free-text note; merges join notes with `" | "`
    pub note: Option<String>,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl InventoryRecord {
    pub fn identity(&self) -> ItemIdentity {
        ItemIdentity {
            sku: self.sku.clone(),
            warehouse: self.warehouse.clone(),
            location: self.location.clone().unwrap_or_default(),
        }
    }

    /// Whether this record lives at the given identity
    pub fn is_at(&self, identity: &ItemIdentity) -> bool {
        self.sku == identity.sku
            && self.warehouse == identity.warehouse
            && self.location.as_deref().unwrap_or("") == identity.location
    }
}

/// Identity triple of an inventory record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemIdentity {
    pub sku: String,
    pub warehouse: String,
    pub location: String,
}

impl ItemIdentity {
    pub fn new(
        sku: impl Into<String>,
        warehouse: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            sku: sku.into(),
            warehouse: warehouse.into(),
            location: location.into(),
        }
    }

    /// Stable string key `sku|warehouse|location`
    pub fn key(&self) -> String {
        format!("{}|{}|{}", self.sku, self.warehouse, self.location)
    }
}

impl std::fmt::Display for ItemIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {}/{}", self.sku, self.warehouse, self.location)
    }
}

/// Create inventory record payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryCreate {
    pub sku: String,
    pub warehouse: String,
    pub location: Option<String>,
    pub location_id: Option<i64>,
    pub quantity: i64,
    pub capacity: Option<i64>,
    pub note: Option<String>,
}

/// Partial update payload; `None` leaves a field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventoryUpdate {
    pub sku: Option<String>,
    pub warehouse: Option<String>,
    pub location: Option<String>,
    pub location_id: Option<i64>,
    pub quantity: Option<i64>,
    pub capacity: Option<i64>,
    pub note: Option<String>,
    pub is_active: Option<bool>,
}

/// Join two optional notes with `" | "`, skipping empty or duplicate text
pub fn merge_notes(existing: Option<&str>, incoming: Option<&str>) -> Option<String> {
    let existing = existing.map(str::trim).filter(|s| !s.is_empty());
    let incoming = incoming.map(str::trim).filter(|s| !s.is_empty());
    match (existing, incoming) {
        (Some(a), Some(b)) if a == b => Some(a.to_string()),
        (Some(a), Some(b)) => Some(format!("{} | {}", a, b)),
        (Some(a), None) => Some(a.to_string()),
        (None, Some(b)) => Some(b.to_string()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_key() {
        let id = ItemIdentity::new("SKU-1", "LUDLOW", "Row 9");
        assert_eq!(id.key(), "SKU-1|LUDLOW|Row 9");
    }

    #[test]
    fn test_merge_notes() {
        assert_eq!(merge_notes(Some("old"), Some("new")).as_deref(), Some("old | new"));
        assert_eq!(merge_notes(Some("same"), Some("same")).as_deref(), Some("same"));
        assert_eq!(merge_notes(None, Some("new")).as_deref(), Some("new"));
        assert_eq!(merge_notes(Some("  "), None), None);
    }
}
