//! Error types for the repository engine.
//!
//! All operations return [`RepositoryResult`]. Errors are grouped by category
//! (validation, resource, conflict, state, transaction, backend, batch) and
//! wrapped by the top-level [`RepositoryError`].

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::sync::Arc;

use thiserror::Error;

use crate::core::batch::BatchResult;

/// The primary error type for all repository operations.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Bad input (4xx-equivalent).
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Entity lookup errors.
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Duplicate keys and optimistic version mismatches.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// Entity state guards (soft-deleted entities).
    #[error(transparent)]
    State(#[from] StateError),

    /// Misuse of a transaction handle.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Failures reported by the document store.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A batch write that did not fully succeed.
    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// Errors raised by input validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The document ID is empty, too long, or contains path-breaking characters.
    #[error("invalid document id '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    /// A required field is absent or null.
    #[error("missing required field: {field}")]
    MissingRequiredField { field: String },

    /// A field name that the store reserves for itself.
    #[error("reserved field name: {field}")]
    ReservedField { field: String },

    /// A value the store cannot persist (e.g. an unresolved placeholder).
    #[error("unstorable value at '{path}': {reason}")]
    UnstorableValue { path: String, reason: String },

    /// Batch outside the configured size bounds.
    #[error("batch size {size} outside allowed range {min}..={max}")]
    BatchSize { size: usize, min: usize, max: usize },

    /// Page number or page size out of range.
    #[error("invalid pagination: {message}")]
    InvalidPagination { message: String },

    /// Entity data that does not map onto the entity type.
    #[error("invalid entity for {collection}: {message}")]
    InvalidEntity { collection: String, message: String },

    /// An unknown filter operator or a filter value of the wrong shape.
    #[error("invalid filter: {message}")]
    InvalidFilter { message: String },

    /// A malformed pagination cursor.
    #[error("invalid pagination cursor: {cursor}")]
    InvalidCursor { cursor: String },

    /// Invalid repository configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
}

/// Errors related to entity existence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// The requested entity was not found.
    #[error("entity not found: {collection}/{id}")]
    NotFound { collection: String, id: String },
}

/// Errors related to uniqueness and optimistic concurrency.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    /// An entity with the requested custom ID already exists.
    #[error("entity already exists: {collection}/{id}")]
    AlreadyExists { collection: String, id: String },

    /// A unique field value is already used by another entity.
    #[error("duplicate value for unique field {field} in {collection}: {value}")]
    DuplicateKey {
        collection: String,
        field: String,
        value: String,
    },

    /// The stored version differs from the version the caller expected.
    #[error("version conflict on {collection}/{id}: expected {expected}, found {actual}")]
    VersionConflict {
        collection: String,
        id: String,
        expected: u64,
        actual: u64,
    },
}

/// Errors raised by entity state guards.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The entity is soft-deleted and the operation does not bypass the guard.
    #[error("entity is deleted: {collection}/{id}")]
    Deleted { collection: String, id: String },
}

/// Errors related to transaction handles.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// A write was attempted inside a read-only transaction.
    #[error("write attempted in read-only transaction")]
    ReadOnly,

    /// The transaction was already committed or rolled back.
    #[error("transaction no longer active")]
    Inactive,
}

/// Errors originating from the document store.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The store is currently unavailable.
    #[error("backend unavailable: {backend_name}: {message}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    /// The store aborted a transaction because of conflicting writes.
    #[error("transaction aborted by {backend_name}: {reason}")]
    Aborted {
        backend_name: String,
        reason: String,
    },

    /// The target document of a partial update does not exist.
    #[error("no document to update: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// The store did not answer in time.
    #[error("backend operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// Internal store error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Errors describing batch writes that did not fully succeed.
#[derive(Error, Debug)]
pub enum BatchError {
    /// At least one chunk failed. `result` holds the full per-chunk outcome,
    /// including the chunks that were committed.
    #[error("batch write failed at item {index}: {source}")]
    ChunkFailed {
        index: usize,
        #[source]
        source: Arc<RepositoryError>,
        result: Box<BatchResult>,
    },
}

/// Result type alias for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

impl RepositoryError {
    /// Shorthand for [`ResourceError::NotFound`].
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        RepositoryError::Resource(ResourceError::NotFound {
            collection: collection.into(),
            id: id.into(),
        })
    }

    /// Shorthand for [`StateError::Deleted`].
    pub fn deleted(collection: impl Into<String>, id: impl Into<String>) -> Self {
        RepositoryError::State(StateError::Deleted {
            collection: collection.into(),
            id: id.into(),
        })
    }

    /// Shorthand for [`BackendError::Internal`] without a source.
    pub fn internal(backend_name: impl Into<String>, message: impl Into<String>) -> Self {
        RepositoryError::Backend(BackendError::Internal {
            backend_name: backend_name.into(),
            message: message.into(),
            source: None,
        })
    }

    /// Returns `true` for not-found errors.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RepositoryError::Resource(ResourceError::NotFound { .. })
                | RepositoryError::Backend(BackendError::NotFound { .. })
        )
    }

    /// Returns `true` if the transaction executor may retry after this error.
    ///
    /// Backend failures (other than serialization) and version conflicts are
    /// retried. Validation, state, not-found, duplicate-key and handle misuse
    /// errors are deterministic and surface on the first attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            RepositoryError::Backend(BackendError::Serialization { .. }) => false,
            RepositoryError::Backend(BackendError::NotFound { .. }) => false,
            RepositoryError::Backend(_) => true,
            RepositoryError::Conflict(ConflictError::VersionConflict { .. }) => true,
            _ => false,
        }
    }

    /// A short label for the error category, used in stats and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            RepositoryError::Validation(_) => "validation",
            RepositoryError::Resource(_) => "not_found",
            RepositoryError::Conflict(_) => "conflict",
            RepositoryError::State(_) => "state",
            RepositoryError::Transaction(_) => "transaction",
            RepositoryError::Backend(_) => "backend",
            RepositoryError::Batch(_) => "batch",
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Backend(BackendError::Serialization {
            message: err.to_string(),
        })
    }
}
