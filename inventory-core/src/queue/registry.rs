//! Replay handlers keyed by mutation family
//!
//! Persisted payloads are plain data. After a restart the worker finds the
//! function to run by looking up the payload's [`MutationKey`] here, so every
//! family must be registered before the worker resumes.

use crate::inventory::InventoryService;
use async_trait::async_trait;
use shared::error::{AppError, AppResult, ErrorCode};
use shared::mutation::{MutationKey, MutationPayload};
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait ReplayHandler: Send + Sync {
    /// Perform the mutation; `mutation_id` doubles as the backend request id
    async fn replay(&self, mutation_id: &str, payload: &MutationPayload) -> AppResult<()>;
}

#[derive(Default, Clone)]
pub struct MutationRegistry {
    handlers: HashMap<MutationKey, Arc<dyn ReplayHandler>>,
}

impl MutationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for a family
    pub fn register(&mut self, key: MutationKey, handler: Arc<dyn ReplayHandler>) {
        if self.handlers.insert(key, handler).is_some() {
            tracing::debug!(key = %key, "Replay handler replaced");
        }
    }

    pub fn is_registered(&self, key: MutationKey) -> bool {
        self.handlers.contains_key(&key)
    }

    pub fn get(&self, key: MutationKey) -> AppResult<Arc<dyn ReplayHandler>> {
        self.handlers.get(&key).cloned().ok_or_else(|| {
            AppError::with_message(
                ErrorCode::ReplayNotRegistered,
                format!("No replay handler registered for {}", key),
            )
            .with_detail("key", key.as_str())
        })
    }

    pub fn keys(&self) -> Vec<MutationKey> {
        let mut keys: Vec<_> = self.handlers.keys().copied().collect();
        keys.sort();
        keys
    }
}

/// Replays through [`InventoryService::apply`]
struct InventoryReplay {
    service: InventoryService,
}

#[async_trait]
impl ReplayHandler for InventoryReplay {
    async fn replay(&self, mutation_id: &str, payload: &MutationPayload) -> AppResult<()> {
        self.service.apply(payload, Some(mutation_id)).await
    }
}

/// Register every inventory family against `service`
pub fn register_inventory_handlers(registry: &mut MutationRegistry, service: InventoryService) {
    let handler: Arc<dyn ReplayHandler> = Arc::new(InventoryReplay { service });
    for key in MutationKey::ALL {
        registry.register(key, handler.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[test]
    fn test_unregistered_key_is_refused() {
        let registry = MutationRegistry::new();
        let err = registry.get(MutationKey::MoveItem).err().unwrap();
        assert_eq!(err.code, ErrorCode::ReplayNotRegistered);
    }

    #[test]
    fn test_inventory_handlers_cover_every_family() {
        let mut registry = MutationRegistry::new();
        let service = InventoryService::new(Arc::new(MemoryBackend::new()));
        register_inventory_handlers(&mut registry, service);
        assert_eq!(registry.keys(), MutationKey::ALL.to_vec());
        assert!(MutationKey::ALL.iter().all(|k| registry.is_registered(*k)));
    }
}
