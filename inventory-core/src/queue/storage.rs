//! redb-backed persistence for the mutation queue
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `pending_mutations` | `mutation_id` | `PendingMutation` | Replay queue (pending + paused) |
//! | `failed_mutations` | `mutation_id` | `PendingMutation` | Given-up entries (status `error`) |
//! | `applied_mutations` | `mutation_id` | `i64` | Idempotency: applied-at millis |
//! | `client_state` | `name` | `StoredState` | Persisted cache blobs |
//! | `meta` | `"cache_key"` | `String` | Version key the state was written under |
//! | `sequence_counter` | `"seq"` | `u64` | Enqueue order |
//!
//! Every multi-table change (complete, move to failed, version wipe) runs in a
//! single write transaction, so a crash never leaves an entry both applied and
//! pending.

use super::{MutationStatus, PendingMutation};
use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition,
};
use serde::{Deserialize, Serialize};
use shared::error::{AppError, ErrorCode};
use shared::mutation::MutationPayload;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const PENDING_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("pending_mutations");

const FAILED_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("failed_mutations");

const APPLIED_TABLE: TableDefinition<&str, i64> = TableDefinition::new("applied_mutations");

const STATE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("client_state");

const META_TABLE: TableDefinition<&str, &str> = TableDefinition::new("meta");

const SEQUENCE_TABLE: TableDefinition<&str, u64> = TableDefinition::new("sequence_counter");

const SEQUENCE_KEY: &str = "seq";
const CACHE_KEY: &str = "cache_key";

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Mutation not found: {0}")]
    MutationNotFound(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

fn classify_storage_error(e: &StorageError) -> ErrorCode {
    match e {
        StorageError::Serialization(_) => return ErrorCode::MutationCorrupted,
        StorageError::MutationNotFound(_) => return ErrorCode::MutationNotFound,
        _ => {}
    }

    // redb errors only expose their cause through the message
    let err_str = e.to_string().to_lowercase();
    if err_str.contains("no space") || err_str.contains("disk full") || err_str.contains("enospc")
    {
        return ErrorCode::StorageFull;
    }
    if err_str.contains("corrupt") || err_str.contains("invalid database") {
        return ErrorCode::StorageCorrupted;
    }
    ErrorCode::DatabaseError
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        let code = classify_storage_error(&e);
        tracing::error!(error = %e, error_code = ?code, "Queue storage error");
        AppError::with_message(code, e.to_string())
    }
}

/// Persisted client-state blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredState {
    pub saved_at: i64,
    pub value: serde_json::Value,
}

/// Queue statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: u64,
    pub failed: u64,
    pub applied: u64,
}

/// Mutation queue storage backed by redb
#[derive(Clone)]
pub struct MutationStorage {
    db: Arc<Database>,
}

impl MutationStorage {
    /// Open or create the queue database at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open and wipe queued work and client state written under another cache key
    ///
    /// Returns the storage and whether a wipe happened.
    pub fn open_versioned(path: impl AsRef<Path>, cache_key: &str) -> StorageResult<(Self, bool)> {
        let storage = Self::open(path)?;
        let wiped = storage.ensure_cache_key(cache_key)?;
        Ok((storage, wiped))
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(PENDING_TABLE)?;
            let _ = write_txn.open_table(FAILED_TABLE)?;
            let _ = write_txn.open_table(APPLIED_TABLE)?;
            let _ = write_txn.open_table(STATE_TABLE)?;
            let _ = write_txn.open_table(META_TABLE)?;
            let mut seq_table = write_txn.open_table(SEQUENCE_TABLE)?;
            if seq_table.get(SEQUENCE_KEY)?.is_none() {
                seq_table.insert(SEQUENCE_KEY, 0u64)?;
            }
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    // ========== Pending Queue ==========

    /// Persist a new mutation at the tail of the queue
    pub fn append(&self, payload: MutationPayload) -> StorageResult<PendingMutation> {
        let txn = self.db.begin_write()?;
        let mutation = {
            let mut seq_table = txn.open_table(SEQUENCE_TABLE)?;
            let seq = seq_table.get(SEQUENCE_KEY)?.map(|g| g.value()).unwrap_or(0) + 1;
            seq_table.insert(SEQUENCE_KEY, seq)?;

            let mutation = PendingMutation::new(seq, payload);
            let value = serde_json::to_vec(&mutation)?;
            let mut table = txn.open_table(PENDING_TABLE)?;
            table.insert(mutation.id.as_str(), value.as_slice())?;
            mutation
        };
        txn.commit()?;
        Ok(mutation)
    }

    /// All pending entries in enqueue order
    ///
    /// Entries that no longer decode are skipped here and removed by
    /// [`remove_undecodable`](Self::remove_undecodable).
    pub fn pending(&self) -> StorageResult<Vec<PendingMutation>> {
        let mut entries = self.read_all(PENDING_TABLE)?;
        entries.sort_by_key(|m| m.seq);
        Ok(entries)
    }

    /// Overwrite an existing pending entry
    pub fn update_pending(&self, mutation: &PendingMutation) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(PENDING_TABLE)?;
            if table.get(mutation.id.as_str())?.is_none() {
                return Err(StorageError::MutationNotFound(mutation.id.clone()));
            }
            let value = serde_json::to_vec(mutation)?;
            table.insert(mutation.id.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Remove from the pending queue and record the id as applied
    pub fn complete(&self, id: &str) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut pending = txn.open_table(PENDING_TABLE)?;
            pending.remove(id)?;
            let mut applied = txn.open_table(APPLIED_TABLE)?;
            applied.insert(id, shared::util::now_millis())?;
        }
        txn.commit()?;
        tracing::debug!(mutation_id = %id, "Mutation completed");
        Ok(())
    }

    pub fn is_applied(&self, id: &str) -> StorageResult<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(APPLIED_TABLE)?;
        Ok(table.get(id)?.is_some())
    }

    /// Drop applied ids recorded before `before_ms`; returns how many were removed
    pub fn cleanup_applied(&self, before_ms: i64) -> StorageResult<usize> {
        let txn = self.db.begin_write()?;
        let count = {
            let mut table = txn.open_table(APPLIED_TABLE)?;
            let stale: Vec<String> = table
                .iter()?
                .filter_map(|r| r.ok())
                .filter(|(_, v)| v.value() < before_ms)
                .map(|(k, _)| k.value().to_string())
                .collect();
            for id in &stale {
                table.remove(id.as_str())?;
            }
            stale.len()
        };
        txn.commit()?;
        Ok(count)
    }

    /// Remove an entry from the pending or failed queue
    pub fn remove(&self, id: &str) -> StorageResult<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut pending = txn.open_table(PENDING_TABLE)?;
            let mut failed = txn.open_table(FAILED_TABLE)?;
            let a = pending.remove(id)?.is_some();
            let b = failed.remove(id)?.is_some();
            a || b
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Remove pending and failed entries whose JSON no longer decodes
    pub fn remove_undecodable(&self) -> StorageResult<usize> {
        let txn = self.db.begin_write()?;
        let mut count = 0;
        for definition in [PENDING_TABLE, FAILED_TABLE] {
            let mut table = txn.open_table(definition)?;
            let broken: Vec<String> = table
                .iter()?
                .filter_map(|r| r.ok())
                .filter(|(_, v)| serde_json::from_slice::<PendingMutation>(v.value()).is_err())
                .map(|(k, _)| k.value().to_string())
                .collect();
            for id in &broken {
                tracing::warn!(mutation_id = %id, "Removing undecodable mutation");
                table.remove(id.as_str())?;
            }
            count += broken.len();
        }
        txn.commit()?;
        Ok(count)
    }

    // ========== Failed Queue ==========

    /// Move a pending entry to the failed queue with status `error`
    pub fn move_to_failed(
        &self,
        id: &str,
        error: &str,
        code: Option<ErrorCode>,
    ) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut pending_table = txn.open_table(PENDING_TABLE)?;
            let mut failed_table = txn.open_table(FAILED_TABLE)?;

            let pending_opt = if let Some(value) = pending_table.get(id)? {
                let pending: PendingMutation = serde_json::from_slice(value.value())?;
                Some(pending)
            } else {
                None
            };

            let Some(mut mutation) = pending_opt else {
                return Err(StorageError::MutationNotFound(id.to_string()));
            };
            mutation.status = MutationStatus::Error;
            mutation.last_error = Some(error.to_string());
            mutation.last_error_code = code;
            mutation.updated_at = shared::util::now_millis();
            let value = serde_json::to_vec(&mutation)?;
            failed_table.insert(id, value.as_slice())?;
            pending_table.remove(id)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn failed(&self) -> StorageResult<Vec<PendingMutation>> {
        let mut entries = self.read_all(FAILED_TABLE)?;
        entries.sort_by_key(|m| m.seq);
        Ok(entries)
    }

    /// Move every failed entry back to pending with a fresh retry budget
    pub fn retry_failed(&self) -> StorageResult<usize> {
        let txn = self.db.begin_write()?;
        let count = {
            let mut pending_table = txn.open_table(PENDING_TABLE)?;
            let mut failed_table = txn.open_table(FAILED_TABLE)?;

            let entries: Vec<(String, Vec<u8>)> = failed_table
                .iter()?
                .filter_map(|r| r.ok())
                .map(|(k, v)| (k.value().to_string(), v.value().to_vec()))
                .collect();

            if entries.is_empty() {
                return Ok(0);
            }

            let now = shared::util::now_millis();
            let mut recovered = 0;
            for (id, raw) in &entries {
                let Ok(mut mutation) = serde_json::from_slice::<PendingMutation>(raw) else {
                    continue;
                };
                mutation.status = MutationStatus::Pending;
                mutation.retry_count = 0;
                mutation.attempts = 0;
                mutation.next_attempt_at = 0;
                mutation.updated_at = now;
                let value = serde_json::to_vec(&mutation)?;
                pending_table.insert(id.as_str(), value.as_slice())?;
                failed_table.remove(id.as_str())?;
                recovered += 1;
            }
            recovered
        };
        txn.commit()?;
        Ok(count)
    }

    /// Drop every failed entry
    pub fn clear_failed(&self) -> StorageResult<usize> {
        let txn = self.db.begin_write()?;
        let count = {
            let mut table = txn.open_table(FAILED_TABLE)?;
            let ids: Vec<String> = table
                .iter()?
                .filter_map(|r| r.ok())
                .map(|(k, _)| k.value().to_string())
                .collect();
            for id in &ids {
                table.remove(id.as_str())?;
            }
            ids.len()
        };
        txn.commit()?;
        Ok(count)
    }

    // ========== Client State ==========

    pub fn save_state(&self, name: &str, value: &serde_json::Value) -> StorageResult<()> {
        let state = StoredState {
            saved_at: shared::util::now_millis(),
            value: value.clone(),
        };
        let bytes = serde_json::to_vec(&state)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(STATE_TABLE)?;
            table.insert(name, bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn load_state(&self, name: &str) -> StorageResult<Option<StoredState>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STATE_TABLE)?;
        match table.get(name)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn clear_state(&self, name: &str) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(STATE_TABLE)?;
            table.remove(name)?;
        }
        txn.commit()?;
        Ok(())
    }

    // ========== Versioning ==========

    pub fn cache_key(&self) -> StorageResult<Option<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(META_TABLE)?;
        Ok(table.get(CACHE_KEY)?.map(|g| g.value().to_string()))
    }

    /// Record `cache_key`; wipes pending, failed and client state when a
    /// different key was stored before. Returns whether a wipe happened.
    pub fn ensure_cache_key(&self, cache_key: &str) -> StorageResult<bool> {
        let stored = self.cache_key()?;
        if stored.as_deref() == Some(cache_key) {
            return Ok(false);
        }

        let wipe = stored.is_some();
        let txn = self.db.begin_write()?;
        {
            if wipe {
                txn.delete_table(PENDING_TABLE)?;
                txn.delete_table(FAILED_TABLE)?;
                txn.delete_table(STATE_TABLE)?;
                let _ = txn.open_table(PENDING_TABLE)?;
                let _ = txn.open_table(FAILED_TABLE)?;
                let _ = txn.open_table(STATE_TABLE)?;
            }
            let mut meta = txn.open_table(META_TABLE)?;
            meta.insert(CACHE_KEY, cache_key)?;
        }
        txn.commit()?;

        if wipe {
            tracing::warn!(
                previous = ?stored,
                current = %cache_key,
                "Cache version changed, persisted queue and state discarded"
            );
        }
        Ok(wipe)
    }

    // ========== Statistics ==========

    pub fn stats(&self) -> StorageResult<QueueStats> {
        let read_txn = self.db.begin_read()?;
        let pending = read_txn.open_table(PENDING_TABLE)?;
        let failed = read_txn.open_table(FAILED_TABLE)?;
        let applied = read_txn.open_table(APPLIED_TABLE)?;
        Ok(QueueStats {
            pending: pending.len()?,
            failed: failed.len()?,
            applied: applied.len()?,
        })
    }

    fn read_all(
        &self,
        definition: TableDefinition<'static, &'static str, &'static [u8]>,
    ) -> StorageResult<Vec<PendingMutation>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(definition)?;

        let mut entries = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            match serde_json::from_slice::<PendingMutation>(value.value()) {
                Ok(mutation) => entries.push(mutation),
                Err(e) => {
                    tracing::warn!(mutation_id = %key.value(), error = %e, "Skipping undecodable mutation");
                }
            }
        }
        Ok(entries)
    }

    /// Write raw bytes under a pending id (for testing corrupt entries)
    #[cfg(test)]
    pub(crate) fn insert_raw_pending(&self, id: &str, raw: &[u8]) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(PENDING_TABLE)?;
            table.insert(id, raw)?;
        }
        txn.commit()?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn insert_applied_at(&self, id: &str, at_ms: i64) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(APPLIED_TABLE)?;
            table.insert(id, at_ms)?;
        }
        txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{ActorContext, ItemIdentity};
    use shared::mutation::UpdateQuantityVars;

    fn payload(delta: i64) -> MutationPayload {
        MutationPayload::UpdateQuantity(UpdateQuantityVars {
            actor: ActorContext::staff("Ana", "u-1"),
            identity: ItemIdentity::new("A-1", "LUDLOW", "Row 1"),
            delta,
            list_id: None,
            order_number: None,
        })
    }

    #[test]
    fn test_append_keeps_enqueue_order() {
        let storage = MutationStorage::open_in_memory().unwrap();
        let a = storage.append(payload(1)).unwrap();
        let b = storage.append(payload(2)).unwrap();
        let c = storage.append(payload(3)).unwrap();

        let pending = storage.pending().unwrap();
        let ids: Vec<_> = pending.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
        assert_eq!(pending[0].status, MutationStatus::Pending);
        assert!(pending[0].seq < pending[1].seq);
    }

    #[test]
    fn test_complete_records_applied() {
        let storage = MutationStorage::open_in_memory().unwrap();
        let m = storage.append(payload(1)).unwrap();
        assert!(!storage.is_applied(&m.id).unwrap());

        storage.complete(&m.id).unwrap();

        assert!(storage.pending().unwrap().is_empty());
        assert!(storage.is_applied(&m.id).unwrap());
        assert_eq!(
            storage.stats().unwrap(),
            QueueStats {
                pending: 0,
                failed: 0,
                applied: 1
            }
        );
    }

    #[test]
    fn test_failed_queue_retry_and_clear() {
        let storage = MutationStorage::open_in_memory().unwrap();
        let m = storage.append(payload(1)).unwrap();
        let mut updated = m.clone();
        updated.retry_count = 4;
        storage.update_pending(&updated).unwrap();

        storage
            .move_to_failed(&m.id, "boom", Some(ErrorCode::PermissionDenied))
            .unwrap();
        assert!(storage.pending().unwrap().is_empty());
        let failed = storage.failed().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status, MutationStatus::Error);
        assert_eq!(failed[0].last_error_code, Some(ErrorCode::PermissionDenied));

        assert_eq!(storage.retry_failed().unwrap(), 1);
        let pending = storage.pending().unwrap();
        assert_eq!(pending[0].retry_count, 0);
        assert_eq!(pending[0].status, MutationStatus::Pending);

        storage.move_to_failed(&m.id, "again", None).unwrap();
        assert_eq!(storage.clear_failed().unwrap(), 1);
        assert!(storage.failed().unwrap().is_empty());
    }

    #[test]
    fn test_move_missing_to_failed_errors() {
        let storage = MutationStorage::open_in_memory().unwrap();
        let err = storage.move_to_failed("nope", "x", None).unwrap_err();
        assert!(matches!(err, StorageError::MutationNotFound(_)));
        let app: AppError = err.into();
        assert_eq!(app.code, ErrorCode::MutationNotFound);
    }

    #[test]
    fn test_undecodable_entries_are_skipped_then_removed() {
        let storage = MutationStorage::open_in_memory().unwrap();
        storage.append(payload(1)).unwrap();
        storage.insert_raw_pending("broken", b"{not json").unwrap();

        assert_eq!(storage.pending().unwrap().len(), 1);
        assert_eq!(storage.stats().unwrap().pending, 2);
        assert_eq!(storage.remove_undecodable().unwrap(), 1);
        assert_eq!(storage.stats().unwrap().pending, 1);
    }

    #[test]
    fn test_cache_key_change_wipes_queue_and_state() {
        let storage = MutationStorage::open_in_memory().unwrap();
        assert!(!storage.ensure_cache_key("cache-v1").unwrap());
        storage.append(payload(1)).unwrap();
        storage
            .save_state("inventory", &serde_json::json!({"rows": []}))
            .unwrap();

        assert!(!storage.ensure_cache_key("cache-v1").unwrap());
        assert_eq!(storage.pending().unwrap().len(), 1);

        assert!(storage.ensure_cache_key("cache-v2").unwrap());
        assert!(storage.pending().unwrap().is_empty());
        assert!(storage.load_state("inventory").unwrap().is_none());
        assert_eq!(storage.cache_key().unwrap().as_deref(), Some("cache-v2"));
    }

    #[test]
    fn test_cleanup_applied() {
        let storage = MutationStorage::open_in_memory().unwrap();
        let m = storage.append(payload(1)).unwrap();
        storage.complete(&m.id).unwrap();
        assert_eq!(storage.cleanup_applied(0).unwrap(), 0);
        assert_eq!(storage.cleanup_applied(i64::MAX).unwrap(), 1);
        assert!(!storage.is_applied(&m.id).unwrap());
    }
}
