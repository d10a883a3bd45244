//! # Keel Store
//!
//! Record store abstraction used by the coordination crates. The platform
//! database is an external collaborator; the sync service and workflow
//! engine only need opaque record access by entity type and id, which this
//! trait provides. Services back it with their real database; tests and
//! single-process compositions use [`MemoryStore`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Record store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with the given type and id
    #[error("Record not found: {entity_type}/{id}")]
    NotFound { entity_type: String, id: String },

    /// The backing store failed
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Opaque record access by entity type and id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a record, `None` when absent.
    async fn fetch(&self, entity_type: &str, id: &str) -> StoreResult<Option<serde_json::Value>>;

    /// Insert or replace a record.
    async fn put(&self, entity_type: &str, id: &str, record: serde_json::Value) -> StoreResult<()>;

    /// All records of one entity type, unordered.
    async fn list(&self, entity_type: &str) -> StoreResult<Vec<serde_json::Value>>;
}

/// In-memory record store for tests and single-process compositions.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, HashMap<String, serde_json::Value>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor returning the trait-object form the
    /// coordination crates take.
    pub fn shared() -> Arc<dyn RecordStore> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn fetch(&self, entity_type: &str, id: &str) -> StoreResult<Option<serde_json::Value>> {
        let records = self.records.read().await;
        Ok(records
            .get(entity_type)
            .and_then(|by_id| by_id.get(id))
            .cloned())
    }

    async fn put(&self, entity_type: &str, id: &str, record: serde_json::Value) -> StoreResult<()> {
        let mut records = self.records.write().await;
        records
            .entry(entity_type.to_string())
            .or_default()
            .insert(id.to_string(), record);
        Ok(())
    }

    async fn list(&self, entity_type: &str) -> StoreResult<Vec<serde_json::Value>> {
        let records = self.records.read().await;
        Ok(records
            .get(entity_type)
            .map(|by_id| by_id.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_fetch_roundtrip() {
        let store = MemoryStore::new();
        store
            .put("venture", "v-1", serde_json::json!({"name": "Acme"}))
            .await
            .unwrap();

        let record = store.fetch("venture", "v-1").await.unwrap().unwrap();
        assert_eq!(record["name"], "Acme");

        assert!(store.fetch("venture", "v-2").await.unwrap().is_none());
        assert!(store.fetch("user", "v-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces() {
        let store = MemoryStore::new();
        store
            .put("venture", "v-1", serde_json::json!({"stage": "seed"}))
            .await
            .unwrap();
        store
            .put("venture", "v-1", serde_json::json!({"stage": "series-a"}))
            .await
            .unwrap();

        let record = store.fetch("venture", "v-1").await.unwrap().unwrap();
        assert_eq!(record["stage"], "series-a");
        assert_eq!(store.list("venture").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_by_type() {
        let store = MemoryStore::new();
        store
            .put("user", "u-1", serde_json::json!({"email": "a@x.com"}))
            .await
            .unwrap();
        store
            .put("user", "u-2", serde_json::json!({"email": "b@x.com"}))
            .await
            .unwrap();

        assert_eq!(store.list("user").await.unwrap().len(), 2);
        assert!(store.list("venture").await.unwrap().is_empty());
    }
}
