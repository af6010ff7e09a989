//! Mutation payloads persisted by the durable queue
//!
//! One variant per mutation family. Payloads are plain data and carry their
//! own [`ActorContext`], so a replay never consults session state.

use crate::models::{ActorContext, ItemIdentity};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Stable identifier of a mutation family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MutationKey {
    #[serde(rename = "inventory.addItem")]
    AddItem,
    #[serde(rename = "inventory.updateQuantity")]
    UpdateQuantity,
    #[serde(rename = "inventory.updateItem")]
    UpdateItem,
    #[serde(rename = "inventory.moveItem")]
    MoveItem,
    #[serde(rename = "inventory.deleteItem")]
    DeleteItem,
    #[serde(rename = "inventory.processPickingList")]
    ProcessPickingList,
}

impl MutationKey {
    pub const ALL: [MutationKey; 6] = [
        MutationKey::AddItem,
        MutationKey::UpdateQuantity,
        MutationKey::UpdateItem,
        MutationKey::MoveItem,
        MutationKey::DeleteItem,
        MutationKey::ProcessPickingList,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKey::AddItem => "inventory.addItem",
            MutationKey::UpdateQuantity => "inventory.updateQuantity",
            MutationKey::UpdateItem => "inventory.updateItem",
            MutationKey::MoveItem => "inventory.moveItem",
            MutationKey::DeleteItem => "inventory.deleteItem",
            MutationKey::ProcessPickingList => "inventory.processPickingList",
        }
    }
}

impl std::fmt::Display for MutationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receive stock into a location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AddItemVars {
    #[serde(default = "ActorContext::resumed")]
    pub actor: ActorContext,
    #[validate(length(min = 1, max = 64))]
    pub warehouse: String,
    #[validate(length(min = 1, max = 128))]
    pub sku: String,
    pub location: String,
    pub quantity: i64,
    pub note: Option<String>,
}

/// Signed stock adjustment through the atomic procedure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateQuantityVars {
    #[serde(default = "ActorContext::resumed")]
    pub actor: ActorContext,
    pub identity: ItemIdentity,
    pub delta: i64,
    pub list_id: Option<i64>,
    pub order_number: Option<String>,
}

/// Edit an existing record, possibly changing its identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct UpdateItemVars {
    #[serde(default = "ActorContext::resumed")]
    pub actor: ActorContext,
    pub item_id: Option<i64>,
    pub original: ItemIdentity,
    #[validate(length(min = 1, max = 128))]
    pub sku: String,
    #[validate(length(min = 1, max = 64))]
    pub warehouse: String,
    pub location: String,
    pub quantity: i64,
    pub note: Option<String>,
}

/// Move units to another location, merging at the target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct MoveItemVars {
    #[serde(default = "ActorContext::resumed")]
    pub actor: ActorContext,
    pub source: ItemIdentity,
    #[validate(length(min = 1, max = 64))]
    pub target_warehouse: String,
    pub target_location: String,
    pub quantity: i64,
}

/// Remove a record (hard for admins, zeroed otherwise)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteItemVars {
    #[serde(default = "ActorContext::resumed")]
    pub actor: ActorContext,
    pub identity: ItemIdentity,
    /// Looked up by identity when absent
    pub item_id: Option<i64>,
}

/// Deduct a completed picking list from stock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessPickingListVars {
    #[serde(default = "ActorContext::resumed")]
    pub actor: ActorContext,
    pub list_id: i64,
    pub pallets_qty: i64,
    pub total_units: i64,
}

/// Tagged union of every queued mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationPayload {
    AddItem(AddItemVars),
    UpdateQuantity(UpdateQuantityVars),
    UpdateItem(UpdateItemVars),
    MoveItem(MoveItemVars),
    DeleteItem(DeleteItemVars),
    ProcessPickingList(ProcessPickingListVars),
}

impl MutationPayload {
    /// The ONLY place with a match from payload to family key
    pub fn key(&self) -> MutationKey {
        match self {
            MutationPayload::AddItem(_) => MutationKey::AddItem,
            MutationPayload::UpdateQuantity(_) => MutationKey::UpdateQuantity,
            MutationPayload::UpdateItem(_) => MutationKey::UpdateItem,
            MutationPayload::MoveItem(_) => MutationKey::MoveItem,
            MutationPayload::DeleteItem(_) => MutationKey::DeleteItem,
            MutationPayload::ProcessPickingList(_) => MutationKey::ProcessPickingList,
        }
    }

    pub fn actor(&self) -> &ActorContext {
        match self {
            MutationPayload::AddItem(v) => &v.actor,
            MutationPayload::UpdateQuantity(v) => &v.actor,
            MutationPayload::UpdateItem(v) => &v.actor,
            MutationPayload::MoveItem(v) => &v.actor,
            MutationPayload::DeleteItem(v) => &v.actor,
            MutationPayload::ProcessPickingList(v) => &v.actor,
        }
    }

    /// Row ids the payload points at
    pub fn referenced_ids(&self) -> Vec<i64> {
        match self {
            MutationPayload::UpdateItem(v) => v.item_id.into_iter().collect(),
            MutationPayload::DeleteItem(v) => v.item_id.into_iter().collect(),
            MutationPayload::ProcessPickingList(v) => vec![v.list_id],
            _ => Vec::new(),
        }
    }

    /// Primary SKU touched by the mutation, for logging
    pub fn sku(&self) -> Option<&str> {
        match self {
            MutationPayload::AddItem(v) => Some(&v.sku),
            MutationPayload::UpdateQuantity(v) => Some(&v.identity.sku),
            MutationPayload::UpdateItem(v) => Some(&v.original.sku),
            MutationPayload::MoveItem(v) => Some(&v.source.sku),
            MutationPayload::DeleteItem(v) => Some(&v.identity.sku),
            MutationPayload::ProcessPickingList(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn test_key_serializes_as_family_id() {
        let json = serde_json::to_string(&MutationKey::MoveItem).unwrap();
        assert_eq!(json, "\"inventory.moveItem\"");
    }

    #[test]
    fn test_payload_is_tagged() {
        let payload = MutationPayload::DeleteItem(DeleteItemVars {
            actor: ActorContext::staff("Ana", "u-1"),
            identity: ItemIdentity::new("A", "LUDLOW", "Row 1"),
            item_id: Some(7),
        });
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["type"], "DELETE_ITEM");
        assert_eq!(value["actor"]["performed_by"], "Ana");
        assert_eq!(payload.key(), MutationKey::DeleteItem);
        assert_eq!(payload.referenced_ids(), vec![7]);
    }

    #[test]
    fn test_missing_actor_falls_back_to_resumed() {
        let json = r#"{"type":"PROCESS_PICKING_LIST","list_id":3,"pallets_qty":1,"total_units":4}"#;
        let payload: MutationPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.actor().performed_by, "System (resumed)");
        assert_eq!(payload.actor().role, Role::Staff);
    }

    #[test]
    fn test_add_item_validation() {
        let vars = AddItemVars {
            actor: ActorContext::resumed(),
            warehouse: String::new(),
            sku: "A".into(),
            location: "Row 1".into(),
            quantity: 1,
            note: None,
        };
        assert!(vars.validate().is_err());
    }
}
