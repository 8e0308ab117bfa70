//! Store abstraction and the executors built on it.
//!
//! - [`DocumentStore`] - the backend contract (reads, queries, direct writes,
//!   transactions, write batches, server timestamps)
//! - [`Query`] - filters, ordering, limit and cursors, with an in-process evaluator
//! - [`TransactionExecutor`] - runs closures in transactions with retry and jittered backoff
//! - [`BatchExecutor`] - commits write operations in sequential atomic chunks
//!
//! # Capabilities
//!
//! Stores differ in what they do natively. The engine asks before relying
//! on a feature:
//!
//! ```ignore
//! use docstore_repository::core::{DocumentStore, StoreCapability};
//!
//! fn counting_strategy(store: &dyn DocumentStore) -> &'static str {
//!     if store.supports(StoreCapability::NativeCount) {
//!         "aggregation"
//!     } else {
//!         "snapshot size"
//!     }
//! }
//! ```

pub mod batch;
pub mod query;
pub mod store;
pub mod transaction;

pub use batch::{
    BatchConfig, BatchExecutor, BatchItemError, BatchResult, BatchStatus, DEFAULT_CHUNK_SIZE,
    WriteOp,
};
pub use query::{Filter, FilterOp, OrderBy, Query, SortDirection, compare_values, values_equal};
pub use store::{
    Document, DocumentStore, StoreCapability, StoreTransaction, StoredDocument, WriteBatch,
    is_server_timestamp, resolve_server_timestamps, server_timestamp_token,
};
pub use transaction::{
    TransactionContext, TransactionExecutor, TransactionOptions, TransactionOutcome,
    backoff_delay,
};
