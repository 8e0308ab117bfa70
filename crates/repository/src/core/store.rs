//! Document store abstraction.
//!
//! The repository engine talks to its backend only through the traits in
//! this module. A store addresses schemaless documents by collection name
//! and string ID, and offers three write paths: direct writes, optimistic
//! transactions ([`StoreTransaction`]) and atomic write batches
//! ([`WriteBatch`]).

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::RepositoryResult;
use crate::types::timestamp;

use super::query::{FilterOp, Query};

/// The field map of a stored document.
pub type Document = Map<String, Value>;

/// Key of the server-timestamp placeholder object.
pub const SENTINEL_KEY: &str = "__sentinel__";

/// Sentinel value asking the store to substitute its own commit time.
pub const SERVER_TIMESTAMP: &str = "serverTimestamp";

/// Returns the server-timestamp placeholder value.
pub fn server_timestamp_token() -> Value {
    json!({ SENTINEL_KEY: SERVER_TIMESTAMP })
}

/// Returns `true` if `value` is an unresolved server-timestamp placeholder.
pub fn is_server_timestamp(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.len() == 1
                && map.get(SENTINEL_KEY).and_then(Value::as_str) == Some(SERVER_TIMESTAMP)
        }
        _ => false,
    }
}

/// Replaces every server-timestamp placeholder in `fields` (including nested
/// maps) with `now` in native timestamp form.
pub fn resolve_server_timestamps(fields: &mut Document, now: DateTime<Utc>) {
    for value in fields.values_mut() {
        if is_server_timestamp(value) {
            *value = timestamp::encode(now);
        } else if let Value::Object(nested) = value {
            resolve_server_timestamps(nested, now);
        }
    }
}

/// A document as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    /// The document ID.
    pub id: String,
    /// The document fields. The ID is not part of the field map.
    pub fields: Document,
}

impl StoredDocument {
    /// Creates a document.
    pub fn new(id: impl Into<String>, fields: Document) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Looks up a field by dotted path (`"address.city"`).
    pub fn get_field(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }
}

/// Optional store features the engine can take advantage of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreCapability {
    /// Server-side count aggregation.
    NativeCount,
    /// Optimistic read-write transactions.
    Transactions,
    /// Server-side timestamp placeholders.
    ServerTimestamps,
    /// `start_after` / `end_before` cursors.
    Cursors,
}

impl std::fmt::Display for StoreCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StoreCapability::NativeCount => "native-count",
            StoreCapability::Transactions => "transactions",
            StoreCapability::ServerTimestamps => "server-timestamps",
            StoreCapability::Cursors => "cursors",
        };
        write!(f, "{}", name)
    }
}

/// A schemaless document store.
///
/// Implementations must be safe to share between tasks. Errors are reported
/// as [`BackendError`](crate::error::BackendError) wrapped in
/// [`RepositoryError`](crate::error::RepositoryError).
#[async_trait]
pub trait DocumentStore: Send + Sync + Debug {
    /// Returns a human-readable name for this store.
    fn name(&self) -> &'static str;

    /// Checks if this store supports the given capability.
    fn supports(&self, capability: StoreCapability) -> bool;

    /// Checks if the store evaluates `op` natively. Filters with unsupported
    /// operators are evaluated by the engine after the query returns.
    fn supports_operator(&self, _op: FilterOp) -> bool {
        true
    }

    /// Generates a new document ID.
    fn generate_id(&self) -> String;

    /// Returns the placeholder the store resolves to its own clock at write time.
    fn server_timestamp(&self) -> Value {
        server_timestamp_token()
    }

    /// Reads one document.
    async fn get(&self, collection: &str, id: &str) -> RepositoryResult<Option<StoredDocument>>;

    /// Runs a query against a collection.
    async fn query(&self, collection: &str, query: &Query)
    -> RepositoryResult<Vec<StoredDocument>>;

    /// Counts the documents matching `query`.
    ///
    /// The default implementation fetches the snapshot and returns its size.
    /// Stores with [`StoreCapability::NativeCount`] should override it.
    async fn count(&self, collection: &str, query: &Query) -> RepositoryResult<u64> {
        Ok(self.query(collection, query).await?.len() as u64)
    }

    /// Creates or replaces a document.
    async fn set(&self, collection: &str, id: &str, data: Document) -> RepositoryResult<()>;

    /// Merges top-level fields into an existing document.
    ///
    /// Fails with `BackendError::NotFound` if the document does not exist.
    async fn update(&self, collection: &str, id: &str, data: Document) -> RepositoryResult<()>;

    /// Removes a document. Removing a missing document is not an error.
    async fn delete(&self, collection: &str, id: &str) -> RepositoryResult<()>;

    /// Starts a transaction.
    ///
    /// `timeout` is passed through to the store; the engine does not
    /// enforce it.
    async fn begin_transaction(
        &self,
        read_only: bool,
        timeout: Duration,
    ) -> RepositoryResult<Box<dyn StoreTransaction>>;

    /// Creates an empty write batch.
    fn write_batch(&self) -> Box<dyn WriteBatch>;
}

/// An open store transaction.
///
/// Reads go to the store; writes are buffered and applied atomically by
/// [`commit`](StoreTransaction::commit), which fails with
/// `BackendError::Aborted` if any document read in the transaction changed
/// in the meantime.
#[async_trait]
pub trait StoreTransaction: Send + Sync {
    /// Reads one document.
    async fn get(&mut self, collection: &str, id: &str)
    -> RepositoryResult<Option<StoredDocument>>;

    /// Runs a query inside the transaction.
    async fn query(
        &mut self,
        collection: &str,
        query: &Query,
    ) -> RepositoryResult<Vec<StoredDocument>>;

    /// Buffers a create-or-replace.
    fn set(&mut self, collection: &str, id: &str, data: Document) -> RepositoryResult<()>;

    /// Buffers a partial update. The target must exist at commit time.
    fn update(&mut self, collection: &str, id: &str, data: Document) -> RepositoryResult<()>;

    /// Buffers a delete.
    fn delete(&mut self, collection: &str, id: &str) -> RepositoryResult<()>;

    /// Applies all buffered writes.
    async fn commit(self: Box<Self>) -> RepositoryResult<()>;

    /// Discards all buffered writes.
    async fn rollback(self: Box<Self>) -> RepositoryResult<()>;
}

/// A group of writes committed atomically.
#[async_trait]
pub trait WriteBatch: Send + Sync {
    /// Buffers a create-or-replace.
    fn set(&mut self, collection: &str, id: &str, data: Document);

    /// Buffers a partial update. The target must exist at commit time.
    fn update(&mut self, collection: &str, id: &str, data: Document);

    /// Buffers a delete.
    fn delete(&mut self, collection: &str, id: &str);

    /// Returns the number of buffered writes.
    fn len(&self) -> usize;

    /// Returns `true` if no writes are buffered.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies every buffered write, or none of them.
    async fn commit(self: Box<Self>) -> RepositoryResult<()>;
}
