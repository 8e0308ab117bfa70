//! The in-memory store and its shared state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::core::query::{FilterOp, Query};
use crate::core::store::{
    Document, DocumentStore, StoreCapability, StoreTransaction, StoredDocument, WriteBatch,
    resolve_server_timestamps,
};
use crate::error::{BackendError, RepositoryResult};

use super::transaction::{MemoryTransaction, MemoryWriteBatch};

pub(super) const BACKEND_NAME: &str = "memory";

/// Feature switches for [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Report [`StoreCapability::NativeCount`]. Defaults to `true`.
    pub native_count: bool,
    /// Report [`StoreCapability::Cursors`]. Defaults to `true`.
    pub cursors: bool,
    /// Operators the store refuses to evaluate.
    pub unsupported_operators: Vec<FilterOp>,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            native_count: true,
            cursors: true,
            unsupported_operators: Vec::new(),
        }
    }
}

impl MemoryStoreConfig {
    /// Disables native counting.
    pub fn without_native_count(mut self) -> Self {
        self.native_count = false;
        self
    }

    /// Disables cursor support.
    pub fn without_cursors(mut self) -> Self {
        self.cursors = false;
        self
    }

    /// Marks `op` as unsupported.
    pub fn without_operator(mut self, op: FilterOp) -> Self {
        if !self.unsupported_operators.contains(&op) {
            self.unsupported_operators.push(op);
        }
        self
    }
}

/// A buffered write, shared by transactions and batches.
#[derive(Debug, Clone)]
pub(super) enum PendingWrite {
    Set {
        collection: String,
        id: String,
        data: Document,
    },
    Update {
        collection: String,
        id: String,
        data: Document,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl PendingWrite {
    fn key(&self) -> (&str, &str) {
        match self {
            PendingWrite::Set { collection, id, .. }
            | PendingWrite::Update { collection, id, .. }
            | PendingWrite::Delete { collection, id } => (collection, id),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    fields: Document,
    revision: u64,
}

#[derive(Debug, Default)]
pub(super) struct State {
    collections: HashMap<String, BTreeMap<String, Entry>>,
    last_revision: u64,
}

impl State {
    fn entry(&self, collection: &str, id: &str) -> Option<&Entry> {
        self.collections.get(collection)?.get(id)
    }

    pub(super) fn get(&self, collection: &str, id: &str) -> Option<StoredDocument> {
        self.entry(collection, id)
            .map(|entry| StoredDocument::new(id, entry.fields.clone()))
    }

    /// Current revision of a document; `None` when it does not exist.
    pub(super) fn revision(&self, collection: &str, id: &str) -> Option<u64> {
        self.entry(collection, id).map(|entry| entry.revision)
    }

    pub(super) fn query(&self, collection: &str, query: &Query) -> Vec<StoredDocument> {
        let Some(docs) = self.collections.get(collection) else {
            return Vec::new();
        };
        query.apply(
            docs.iter()
                .map(|(id, entry)| StoredDocument::new(id.clone(), entry.fields.clone())),
        )
    }

    /// Checks that every update in `writes` has a target, taking the
    /// earlier writes of the same group into account.
    pub(super) fn check(&self, writes: &[PendingWrite]) -> RepositoryResult<()> {
        let mut exists: HashMap<(&str, &str), bool> = HashMap::new();
        for write in writes {
            let key = write.key();
            match write {
                PendingWrite::Set { .. } => {
                    exists.insert(key, true);
                }
                PendingWrite::Delete { .. } => {
                    exists.insert(key, false);
                }
                PendingWrite::Update { collection, id, .. } => {
                    let present = exists
                        .get(&key)
                        .copied()
                        .unwrap_or_else(|| self.entry(collection, id).is_some());
                    if !present {
                        return Err(BackendError::NotFound {
                            collection: collection.clone(),
                            id: id.clone(),
                        }
                        .into());
                    }
                }
            }
        }
        Ok(())
    }

    /// Applies already checked writes.
    pub(super) fn apply(&mut self, writes: Vec<PendingWrite>, now: DateTime<Utc>) {
        for write in writes {
            self.last_revision += 1;
            let revision = self.last_revision;
            match write {
                PendingWrite::Set {
                    collection,
                    id,
                    mut data,
                } => {
                    resolve_server_timestamps(&mut data, now);
                    self.collections.entry(collection).or_default().insert(
                        id,
                        Entry {
                            fields: data,
                            revision,
                        },
                    );
                }
                PendingWrite::Update {
                    collection,
                    id,
                    mut data,
                } => {
                    resolve_server_timestamps(&mut data, now);
                    if let Some(entry) = self
                        .collections
                        .get_mut(&collection)
                        .and_then(|docs| docs.get_mut(&id))
                    {
                        entry.fields.extend(data);
                        entry.revision = revision;
                    }
                }
                PendingWrite::Delete { collection, id } => {
                    if let Some(docs) = self.collections.get_mut(&collection) {
                        docs.remove(&id);
                    }
                }
            }
        }
    }
}

struct MemoryInner {
    state: RwLock<State>,
    config: MemoryStoreConfig,
}

/// In-process [`DocumentStore`].
///
/// Cloning is cheap; clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("MemoryStore")
            .field("collections", &state.collections.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store with every feature enabled.
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }

    /// Creates an empty store with the given feature switches.
    pub fn with_config(config: MemoryStoreConfig) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                state: RwLock::new(State::default()),
                config,
            }),
        }
    }

    /// Returns the number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.inner
            .state
            .read()
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Returns `true` if the collection holds no documents.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Removes every document of every collection.
    pub fn clear(&self) {
        self.inner.state.write().collections.clear();
    }

    pub(super) fn state(&self) -> &RwLock<State> {
        &self.inner.state
    }

    /// Checks and applies `writes` as one atomic group.
    pub(super) fn apply_atomically(&self, writes: Vec<PendingWrite>) -> RepositoryResult<()> {
        let mut state = self.inner.state.write();
        state.check(&writes)?;
        state.apply(writes, Utc::now());
        Ok(())
    }

    fn check_operators(&self, query: &Query) -> RepositoryResult<()> {
        match query
            .filters
            .iter()
            .find(|filter| !self.supports_operator(filter.op))
        {
            Some(filter) => Err(BackendError::Internal {
                backend_name: BACKEND_NAME.to_string(),
                message: format!("operator {} is not supported", filter.op),
                source: None,
            }
            .into()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn supports(&self, capability: StoreCapability) -> bool {
        match capability {
            StoreCapability::NativeCount => self.inner.config.native_count,
            StoreCapability::Cursors => self.inner.config.cursors,
            StoreCapability::Transactions | StoreCapability::ServerTimestamps => true,
        }
    }

    fn supports_operator(&self, op: FilterOp) -> bool {
        !self.inner.config.unsupported_operators.contains(&op)
    }

    fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    async fn get(&self, collection: &str, id: &str) -> RepositoryResult<Option<StoredDocument>> {
        Ok(self.inner.state.read().get(collection, id))
    }

    async fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> RepositoryResult<Vec<StoredDocument>> {
        self.check_operators(query)?;
        if !self.inner.config.cursors && (query.start_after.is_some() || query.end_before.is_some()) {
            return Err(BackendError::Internal {
                backend_name: BACKEND_NAME.to_string(),
                message: "cursors are not supported".to_string(),
                source: None,
            }
            .into());
        }
        Ok(self.inner.state.read().query(collection, query))
    }

    async fn count(&self, collection: &str, query: &Query) -> RepositoryResult<u64> {
        Ok(self.query(collection, query).await?.len() as u64)
    }

    async fn set(&self, collection: &str, id: &str, data: Document) -> RepositoryResult<()> {
        self.apply_atomically(vec![PendingWrite::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        }])
    }

    async fn update(&self, collection: &str, id: &str, data: Document) -> RepositoryResult<()> {
        self.apply_atomically(vec![PendingWrite::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        }])
    }

    async fn delete(&self, collection: &str, id: &str) -> RepositoryResult<()> {
        self.apply_atomically(vec![PendingWrite::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        }])
    }

    async fn begin_transaction(
        &self,
        read_only: bool,
        timeout: Duration,
    ) -> RepositoryResult<Box<dyn StoreTransaction>> {
        tracing::debug!(read_only, timeout_ms = timeout.as_millis() as u64, "memory transaction started");
        Ok(Box::new(MemoryTransaction::new(self.clone(), read_only)))
    }

    fn write_batch(&self) -> Box<dyn WriteBatch> {
        Box::new(MemoryWriteBatch::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::query::{Filter, OrderBy};
    use crate::core::store::{is_server_timestamp, server_timestamp_token};
    use crate::types::timestamp;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_set_get_update_delete() {
        let store = MemoryStore::new();
        store.set("items", "a", doc(json!({"n": 1}))).await.unwrap();
        store.update("items", "a", doc(json!({"m": 2}))).await.unwrap();

        let found = store.get("items", "a").await.unwrap().unwrap();
        assert_eq!(found.fields["n"], json!(1));
        assert_eq!(found.fields["m"], json!(2));

        store.delete("items", "a").await.unwrap();
        store.delete("items", "a").await.unwrap();
        assert!(store.get("items", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_document_fails() {
        let store = MemoryStore::new();
        let err = store
            .update("items", "ghost", doc(json!({"n": 1})))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_server_timestamps_resolved_on_write() {
        let store = MemoryStore::new();
        let mut fields = Document::new();
        fields.insert("createdAt".to_string(), server_timestamp_token());
        store.set("items", "a", fields).await.unwrap();

        let found = store.get("items", "a").await.unwrap().unwrap();
        assert!(!is_server_timestamp(&found.fields["createdAt"]));
        assert!(timestamp::is_native(&found.fields["createdAt"]));
    }

    #[tokio::test]
    async fn test_query_filters_and_orders() {
        let store = MemoryStore::new();
        for (id, price) in [("a", 30), ("b", 10), ("c", 20)] {
            store
                .set("items", id, doc(json!({"price": price})))
                .await
                .unwrap();
        }
        let query = Query::new()
            .filter(Filter::new("price", FilterOp::Gte, 15))
            .order_by(OrderBy::asc("price"));
        let ids: Vec<_> = store
            .query("items", &query)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["c", "a"]);
        assert_eq!(store.count("items", &query).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_operator_is_rejected() {
        let store = MemoryStore::with_config(MemoryStoreConfig::default().without_operator(FilterOp::In));
        let query = Query::new().filter(Filter::new("n", FilterOp::In, json!([1, 2])));
        assert!(store.query("items", &query).await.is_err());
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let store = MemoryStore::new();
        let mut batch = store.write_batch();
        batch.set("items", "a", doc(json!({"n": 1})));
        batch.update("items", "missing", doc(json!({"n": 2})));
        assert_eq!(batch.len(), 2);
        assert!(batch.commit().await.is_err());
        assert!(store.is_empty("items"));

        let mut batch = store.write_batch();
        batch.set("items", "a", doc(json!({"n": 1})));
        batch.update("items", "a", doc(json!({"n": 2})));
        batch.commit().await.unwrap();
        let found = store.get("items", "a").await.unwrap().unwrap();
        assert_eq!(found.fields["n"], json!(2));
    }
}
