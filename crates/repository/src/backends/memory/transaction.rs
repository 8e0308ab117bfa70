//! Optimistic transactions and write batches for the in-memory store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;

use crate::core::query::Query;
use crate::core::store::{Document, DocumentStore, StoreTransaction, StoredDocument, WriteBatch};
use crate::error::{BackendError, RepositoryResult, TransactionError};

use super::store::{BACKEND_NAME, MemoryStore, PendingWrite};

/// A transaction against a [`MemoryStore`].
///
/// Reads see committed data and record the revision they saw. Writes are
/// buffered. The commit fails with `BackendError::Aborted` if any document
/// read by the transaction was written (or created, or removed) since.
pub struct MemoryTransaction {
    store: MemoryStore,
    read_only: bool,
    reads: HashMap<(String, String), Option<u64>>,
    writes: Vec<PendingWrite>,
}

impl std::fmt::Debug for MemoryTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransaction")
            .field("read_only", &self.read_only)
            .field("reads", &self.reads.len())
            .field("writes", &self.writes.len())
            .finish()
    }
}

impl MemoryTransaction {
    pub(super) fn new(store: MemoryStore, read_only: bool) -> Self {
        Self {
            store,
            read_only,
            reads: HashMap::new(),
            writes: Vec::new(),
        }
    }

    fn record_read(&mut self, collection: &str, id: &str, revision: Option<u64>) {
        self.reads
            .entry((collection.to_string(), id.to_string()))
            .or_insert(revision);
    }

    fn buffer(&mut self, write: PendingWrite) -> RepositoryResult<()> {
        if self.read_only {
            return Err(TransactionError::ReadOnly.into());
        }
        self.writes.push(write);
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get(
        &mut self,
        collection: &str,
        id: &str,
    ) -> RepositoryResult<Option<StoredDocument>> {
        let (doc, revision) = {
            let state = self.store.state().read();
            (state.get(collection, id), state.revision(collection, id))
        };
        self.record_read(collection, id, revision);
        Ok(doc)
    }

    async fn query(
        &mut self,
        collection: &str,
        query: &Query,
    ) -> RepositoryResult<Vec<StoredDocument>> {
        let docs = self.store.query(collection, query).await?;
        let revisions: Vec<Option<u64>> = {
            let state = self.store.state().read();
            docs.iter()
                .map(|doc| state.revision(collection, &doc.id))
                .collect()
        };
        for (doc, revision) in docs.iter().zip(revisions) {
            self.record_read(collection, &doc.id, revision);
        }
        Ok(docs)
    }

    fn set(&mut self, collection: &str, id: &str, data: Document) -> RepositoryResult<()> {
        self.buffer(PendingWrite::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        })
    }

    fn update(&mut self, collection: &str, id: &str, data: Document) -> RepositoryResult<()> {
        self.buffer(PendingWrite::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        })
    }

    fn delete(&mut self, collection: &str, id: &str) -> RepositoryResult<()> {
        self.buffer(PendingWrite::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        })
    }

    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        let MemoryTransaction { store, reads, writes, .. } = *self;
        let mut state = store.state().write();

        for ((collection, id), seen) in &reads {
            if state.revision(collection, id) != *seen {
                tracing::debug!(collection = %collection, id = %id, "memory transaction aborted on stale read");
                return Err(BackendError::Aborted {
                    backend_name: BACKEND_NAME.to_string(),
                    reason: format!("{}/{} changed since it was read", collection, id),
                }
                .into());
            }
        }

        state.check(&writes)?;
        let count = writes.len();
        state.apply(writes, Utc::now());
        tracing::debug!(reads = reads.len(), writes = count, "memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> RepositoryResult<()> {
        Ok(())
    }
}

/// An atomic write batch against a [`MemoryStore`].
pub struct MemoryWriteBatch {
    store: MemoryStore,
    writes: Vec<PendingWrite>,
}

impl std::fmt::Debug for MemoryWriteBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryWriteBatch")
            .field("writes", &self.writes.len())
            .finish()
    }
}

impl MemoryWriteBatch {
    pub(super) fn new(store: MemoryStore) -> Self {
        Self {
            store,
            writes: Vec::new(),
        }
    }
}

#[async_trait]
impl WriteBatch for MemoryWriteBatch {
    fn set(&mut self, collection: &str, id: &str, data: Document) {
        self.writes.push(PendingWrite::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        });
    }

    fn update(&mut self, collection: &str, id: &str, data: Document) {
        self.writes.push(PendingWrite::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        });
    }

    fn delete(&mut self, collection: &str, id: &str) {
        self.writes.push(PendingWrite::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        });
    }

    fn len(&self) -> usize {
        self.writes.len()
    }

    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        let MemoryWriteBatch { store, writes } = *self;
        store.apply_atomically(writes)
    }
}
