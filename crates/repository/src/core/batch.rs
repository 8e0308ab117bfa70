//! Chunked batch writes.
//!
//! [`BatchExecutor`] splits a list of [`WriteOp`]s into chunks of at most
//! `chunk_size` operations and commits each chunk as one atomic
//! [`WriteBatch`](super::store::WriteBatch). Chunks run sequentially. A
//! failing chunk does not undo earlier chunks; the outcome of every chunk
//! is collected into one [`BatchResult`].
//!
//! A failed chunk is reported once, at the position of its first operation
//! in the original list (`chunk_index * chunk_size`).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{RepositoryError, ValidationError};

use super::store::{Document, DocumentStore};

/// Default number of operations per committed chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// One buffered write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Create or replace a document.
    Set {
        /// Target document ID.
        id: String,
        /// Full document contents.
        data: Document,
    },
    /// Merge fields into an existing document.
    Update {
        /// Target document ID.
        id: String,
        /// Fields to merge.
        data: Document,
    },
    /// Remove a document.
    Delete {
        /// Target document ID.
        id: String,
    },
}

impl WriteOp {
    /// Returns the target document ID.
    pub fn id(&self) -> &str {
        match self {
            WriteOp::Set { id, .. } | WriteOp::Update { id, .. } | WriteOp::Delete { id } => id,
        }
    }
}

/// Aggregate status of a batch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Every chunk committed.
    Success,
    /// Some chunks committed and some failed.
    Partial,
    /// No chunk committed.
    Error,
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchStatus::Success => write!(f, "success"),
            BatchStatus::Partial => write!(f, "partial"),
            BatchStatus::Error => write!(f, "error"),
        }
    }
}

/// A failure attributed to a position in the original operation list.
#[derive(Debug, Clone)]
pub struct BatchItemError {
    /// Position of the failed chunk's first operation in the original list.
    pub index: usize,
    /// Target document of that first operation.
    pub id: Option<String>,
    /// The error.
    pub error: Arc<RepositoryError>,
}

/// Outcome of a batch or multi-batch call.
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// Aggregate status.
    pub status: BatchStatus,
    /// Number of committed chunks.
    pub success_count: usize,
    /// Number of failed chunks.
    pub error_count: usize,
    /// Number of committed chunk writes.
    pub written_count: usize,
    /// Number of documents in committed chunks.
    pub documents_written: usize,
    /// One entry per failed chunk, in chunk order.
    pub errors: Vec<BatchItemError>,
}

impl BatchResult {
    fn empty() -> Self {
        Self {
            status: BatchStatus::Success,
            success_count: 0,
            error_count: 0,
            written_count: 0,
            documents_written: 0,
            errors: Vec::new(),
        }
    }

    fn finish(mut self) -> Self {
        self.status = if self.error_count == 0 {
            BatchStatus::Success
        } else if self.success_count == 0 {
            BatchStatus::Error
        } else {
            BatchStatus::Partial
        };
        self
    }

    /// Returns `true` if every chunk committed.
    pub fn is_success(&self) -> bool {
        self.status == BatchStatus::Success
    }

    /// Returns the first recorded error.
    pub fn first_error(&self) -> Option<&BatchItemError> {
        self.errors.first()
    }

    /// Returns `true` if the operation at `index` belongs to a failed chunk.
    ///
    /// `chunk_size` must be the value the batch ran with.
    pub fn is_failed(&self, index: usize, chunk_size: usize) -> bool {
        let chunk_size = chunk_size.max(1);
        self.errors
            .iter()
            .any(|e| e.index / chunk_size == index / chunk_size)
    }
}

/// Size bounds for batch writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Operations per committed chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Smallest accepted batch.
    #[serde(default = "default_min_items")]
    pub min_items: usize,
    /// Largest accepted batch.
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_min_items() -> usize {
    1
}

fn default_max_items() -> usize {
    500
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            min_items: default_min_items(),
            max_items: default_max_items(),
        }
    }
}

impl BatchConfig {
    /// Checks a batch size against the configured bounds.
    pub fn check_size(&self, size: usize) -> Result<(), ValidationError> {
        if size < self.min_items || size > self.max_items {
            return Err(ValidationError::BatchSize {
                size,
                min: self.min_items,
                max: self.max_items,
            });
        }
        Ok(())
    }
}

/// Commits write operations in atomic chunks.
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    store: Arc<dyn DocumentStore>,
    chunk_size: usize,
}

impl BatchExecutor {
    /// Creates an executor with the given default chunk size.
    pub fn new(store: Arc<dyn DocumentStore>, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Returns the default chunk size.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Commits `ops` as a single atomic batch.
    pub async fn execute_batch(&self, collection: &str, ops: Vec<WriteOp>) -> BatchResult {
        let size = ops.len().max(1);
        self.execute_multi_batch(collection, ops, Some(size)).await
    }

    /// Commits `ops` in sequential chunks of `chunk_size` (or the default).
    #[tracing::instrument(skip(self, ops), fields(store = self.store.name(), ops = ops.len()))]
    pub async fn execute_multi_batch(
        &self,
        collection: &str,
        ops: Vec<WriteOp>,
        chunk_size: Option<usize>,
    ) -> BatchResult {
        let chunk_size = chunk_size.unwrap_or(self.chunk_size).max(1);
        let mut result = BatchResult::empty();

        for (chunk_index, chunk) in ops.chunks(chunk_size).enumerate() {
            let offset = chunk_index * chunk_size;
            let mut batch = self.store.write_batch();
            for op in chunk {
                match op.clone() {
                    WriteOp::Set { id, data } => batch.set(collection, &id, data),
                    WriteOp::Update { id, data } => batch.update(collection, &id, data),
                    WriteOp::Delete { id } => batch.delete(collection, &id),
                }
            }

            match batch.commit().await {
                Ok(()) => {
                    tracing::debug!(chunk = chunk_index, writes = chunk.len(), "batch chunk committed");
                    result.success_count += 1;
                    result.written_count += 1;
                    result.documents_written += chunk.len();
                }
                Err(err) => {
                    tracing::warn!(chunk = chunk_index, offset, error = %err, "batch chunk failed");
                    result.error_count += 1;
                    result.errors.push(BatchItemError {
                        index: offset,
                        id: chunk.first().map(|op| op.id().to_string()),
                        error: Arc::new(err),
                    });
                }
            }
        }

        let result = result.finish();
        if result.status == BatchStatus::Partial {
            tracing::warn!(
                committed = result.success_count,
                failed = result.error_count,
                "batch partially applied",
            );
        }
        result
    }
}
