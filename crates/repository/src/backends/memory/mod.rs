//! In-process document store.
//!
//! [`MemoryStore`] keeps every collection in a sorted map guarded by one
//! lock and implements the whole [`DocumentStore`](crate::core::DocumentStore)
//! contract:
//!
//! - queries with every [`FilterOp`](crate::core::FilterOp), multi-field
//!   ordering and cursors, evaluated by [`Query::apply`](crate::core::Query::apply)
//! - optimistic transactions: each document carries a revision; a commit
//!   aborts with `BackendError::Aborted` if a document read by the
//!   transaction has been written since
//! - atomic write batches: every operation is checked before any is applied
//! - server timestamps resolved when the write is applied
//!
//! [`MemoryStoreConfig`] can switch off native counting and cursors and
//! reject chosen filter operators, so the engine's fallbacks can be
//! exercised without a real backend.
//!
//! # Example
//!
//! ```
//! use docstore_repository::backends::memory::{MemoryStore, MemoryStoreConfig};
//! use docstore_repository::core::{DocumentStore, FilterOp, StoreCapability};
//!
//! let store = MemoryStore::with_config(
//!     MemoryStoreConfig::default()
//!         .without_native_count()
//!         .without_operator(FilterOp::ArrayContainsAny),
//! );
//! assert!(!store.supports(StoreCapability::NativeCount));
//! assert!(!store.supports_operator(FilterOp::ArrayContainsAny));
//! assert!(store.supports_operator(FilterOp::Eq));
//! ```

mod store;
mod transaction;

pub use store::{MemoryStore, MemoryStoreConfig};
pub use transaction::{MemoryTransaction, MemoryWriteBatch};
