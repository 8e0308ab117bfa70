//! Per-call options for repository operations.
//!
//! Every option struct implements `Default` with the documented defaults
//! and offers chainable setters.

use serde_json::Value;

use crate::core::batch::BatchResult;
use crate::core::query::{Filter, OrderBy};
use crate::core::store::Document;
use crate::core::transaction::TransactionContext;
use crate::types::{PageCursor, StoredEntity};

/// Options for [`Repository::find_by_id`](super::Repository::find_by_id).
#[derive(Debug, Clone, Default)]
pub struct FindByIdOptions {
    /// Skip the cache and read from the store.
    pub bypass_cache: bool,
    /// Return soft-deleted entities too.
    pub include_deleted: bool,
    /// Report absence as `ResourceError::NotFound` instead of `Ok(None)`.
    pub throw_if_not_found: bool,
    /// Read through this transaction. Transactional reads never use the cache.
    pub transaction: Option<TransactionContext>,
}

impl FindByIdOptions {
    /// Creates options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Skips the cache.
    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    /// Includes soft-deleted entities.
    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Fails with `NotFound` when the entity is absent.
    pub fn throw_if_not_found(mut self) -> Self {
        self.throw_if_not_found = true;
        self
    }

    /// Reads through a transaction.
    pub fn in_transaction(mut self, tx: &TransactionContext) -> Self {
        self.transaction = Some(tx.clone());
        self
    }
}

/// Options for [`Repository::find`](super::Repository::find) and
/// [`Repository::count`](super::Repository::count).
#[derive(Debug, Clone)]
pub struct FindOptions {
    /// Equality filters, field to value.
    pub filter: Document,
    /// Additional `(field, op, value)` filters.
    pub advanced_filters: Vec<Filter>,
    /// Ordering clauses.
    pub order_by: Vec<OrderBy>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Number of leading results to skip. Emulated client-side.
    pub offset: usize,
    /// Return only results after this cursor.
    pub start_after: Option<PageCursor>,
    /// Return only results before this cursor.
    pub end_before: Option<PageCursor>,
    /// Return soft-deleted entities too.
    pub include_deleted: bool,
    /// Cache small result sets. Defaults to `true`.
    pub use_cache: bool,
    /// Query through this transaction.
    pub transaction: Option<TransactionContext>,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            filter: Document::new(),
            advanced_filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: 0,
            start_after: None,
            end_before: None,
            include_deleted: false,
            use_cache: true,
            transaction: None,
        }
    }
}

impl FindOptions {
    /// Creates options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an equality filter.
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(field.into(), value.into());
        self
    }

    /// Adds an arbitrary filter.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.advanced_filters.push(filter);
        self
    }

    /// Adds an ordering clause.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Sets the limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the offset.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the start-after cursor.
    pub fn start_after(mut self, cursor: PageCursor) -> Self {
        self.start_after = Some(cursor);
        self
    }

    /// Sets the end-before cursor.
    pub fn end_before(mut self, cursor: PageCursor) -> Self {
        self.end_before = Some(cursor);
        self
    }

    /// Includes soft-deleted entities.
    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Keeps the results out of the cache.
    pub fn no_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    /// Queries through a transaction.
    pub fn in_transaction(mut self, tx: &TransactionContext) -> Self {
        self.transaction = Some(tx.clone());
        self
    }
}

/// A page of [`Repository::find_page`](super::Repository::find_page) results.
#[derive(Debug, Clone)]
pub struct FindPage<T> {
    /// The results.
    pub items: Vec<StoredEntity<T>>,
    /// Cursor after the last item, present when the page was full.
    pub next_cursor: Option<PageCursor>,
}

/// Options for [`Repository::create`](super::Repository::create).
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Use this ID instead of a store-generated one. Fails with
    /// `ConflictError::AlreadyExists` if the ID is taken.
    pub custom_id: Option<String>,
    /// Check required fields. Defaults to `true`.
    pub validate_fields: bool,
    /// Let the store stamp `createdAt` / `updatedAt`.
    pub use_server_timestamp: bool,
    /// Starting version; defaults to 1.
    pub initial_version: Option<u64>,
    /// Put the new entity in the cache. Defaults to `true`.
    pub add_to_cache: bool,
    /// Write through this transaction.
    pub transaction: Option<TransactionContext>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            custom_id: None,
            validate_fields: true,
            use_server_timestamp: false,
            initial_version: None,
            add_to_cache: true,
            transaction: None,
        }
    }
}

impl CreateOptions {
    /// Creates options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a caller-supplied ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.custom_id = Some(id.into());
        self
    }

    /// Skips the required-field check.
    pub fn skip_validation(mut self) -> Self {
        self.validate_fields = false;
        self
    }

    /// Uses server-side timestamps.
    pub fn server_timestamp(mut self) -> Self {
        self.use_server_timestamp = true;
        self
    }

    /// Sets the starting version.
    pub fn initial_version(mut self, version: u64) -> Self {
        self.initial_version = Some(version);
        self
    }

    /// Keeps the entity out of the cache.
    pub fn no_cache(mut self) -> Self {
        self.add_to_cache = false;
        self
    }

    /// Writes through a transaction.
    pub fn in_transaction(mut self, tx: &TransactionContext) -> Self {
        self.transaction = Some(tx.clone());
        self
    }
}

/// Options for [`Repository::update`](super::Repository::update).
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Allow updating a soft-deleted entity.
    pub bypass_soft_delete_check: bool,
    /// Bump `version` by one. Defaults to `true`.
    pub increment_version: bool,
    /// Strip internal-only fields from the patch. Defaults to `true`.
    pub sanitize_data: bool,
    /// Drop the cache entry (`true`, default) or refresh it (`false`).
    pub invalidate_cache: bool,
    /// Fail with `ConflictError::VersionConflict` unless the stored
    /// version equals this value.
    pub expected_version: Option<u64>,
    /// Write through this transaction.
    pub transaction: Option<TransactionContext>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            bypass_soft_delete_check: false,
            increment_version: true,
            sanitize_data: true,
            invalidate_cache: true,
            expected_version: None,
            transaction: None,
        }
    }
}

impl UpdateOptions {
    /// Creates options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows updating soft-deleted entities.
    pub fn bypass_soft_delete_check(mut self) -> Self {
        self.bypass_soft_delete_check = true;
        self
    }

    /// Leaves the version unchanged.
    pub fn keep_version(mut self) -> Self {
        self.increment_version = false;
        self
    }

    /// Writes the patch as given, internal fields included.
    pub fn raw(mut self) -> Self {
        self.sanitize_data = false;
        self
    }

    /// Refreshes the cache entry instead of dropping it.
    pub fn refresh_cache(mut self) -> Self {
        self.invalidate_cache = false;
        self
    }

    /// Requires the stored version to match.
    pub fn expect_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    /// Writes through a transaction.
    pub fn in_transaction(mut self, tx: &TransactionContext) -> Self {
        self.transaction = Some(tx.clone());
        self
    }
}

/// Options for [`Repository::delete`](super::Repository::delete).
#[derive(Debug, Clone)]
pub struct DeleteOptions {
    /// `Some(false)` forces a hard delete for this call.
    pub soft_delete: Option<bool>,
    /// Always hard delete.
    pub force: bool,
    /// Drop the cache entry. Defaults to `true`.
    pub clear_cache: bool,
    /// Write through this transaction.
    pub transaction: Option<TransactionContext>,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            soft_delete: None,
            force: false,
            clear_cache: true,
            transaction: None,
        }
    }
}

impl DeleteOptions {
    /// Creates options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes the document even when soft deletes are enabled.
    pub fn hard(mut self) -> Self {
        self.soft_delete = Some(false);
        self
    }

    /// Removes the document unconditionally.
    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    /// Leaves the cache entry in place.
    pub fn keep_cache(mut self) -> Self {
        self.clear_cache = false;
        self
    }

    /// Writes through a transaction.
    pub fn in_transaction(mut self, tx: &TransactionContext) -> Self {
        self.transaction = Some(tx.clone());
        self
    }
}

/// Options for [`Repository::create_batch`](super::Repository::create_batch).
#[derive(Debug, Clone)]
pub struct BatchCreateOptions {
    /// Check required fields. Defaults to `true`.
    pub validate_fields: bool,
    /// Let the store stamp `createdAt` / `updatedAt`.
    pub use_server_timestamp: bool,
    /// Starting version; defaults to 1.
    pub initial_version: Option<u64>,
    /// Cache the committed entities. Defaults to `true`.
    pub add_to_cache: bool,
    /// Operations per chunk; defaults to the configured chunk size.
    pub chunk_size: Option<usize>,
}

impl Default for BatchCreateOptions {
    fn default() -> Self {
        Self {
            validate_fields: true,
            use_server_timestamp: false,
            initial_version: None,
            add_to_cache: true,
            chunk_size: None,
        }
    }
}

impl BatchCreateOptions {
    /// Creates options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the chunk size.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    /// Uses server-side timestamps.
    pub fn server_timestamp(mut self) -> Self {
        self.use_server_timestamp = true;
        self
    }

    /// Keeps the entities out of the cache.
    pub fn no_cache(mut self) -> Self {
        self.add_to_cache = false;
        self
    }
}

/// Result of [`Repository::create_batch_detailed`](super::Repository::create_batch_detailed).
#[derive(Debug, Clone)]
pub struct BatchCreateOutcome<T> {
    /// Per-chunk outcome.
    pub result: BatchResult,
    /// Entities from committed chunks, in input order.
    pub entities: Vec<StoredEntity<T>>,
}
