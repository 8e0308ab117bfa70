//! Generic repository engine over schemaless document stores.
//!
//! This crate provides typed CRUD access to collections of documents, with
//! the policies a data-access layer usually needs built in rather than
//! repeated in every domain repository.
//!
//! # Features
//!
//! - **Typed entities**: any serde type becomes a [`StoredEntity`] with ID, timestamps and metadata
//! - **Soft deletes**: entities are marked deleted and hidden from reads unless asked for
//! - **Optimistic versioning**: a `version` counter bumped on every update, with expected-version checks
//! - **Read-through cache**: TTL + LRU entity cache with a background sweeper
//! - **Transactions**: closures run in store transactions, retried with exponential backoff and jitter
//! - **Batches**: chunked atomic writes with explicit partial-failure results
//! - **Tenant scoping**: a decorator that confines every call to one organization
//!
//! # Architecture
//!
//! - [`core`] - the [`DocumentStore`] contract, query model, transaction and batch executors
//! - [`repository`] - the [`Repository`] engine and its per-call options
//! - [`tenant`] - [`TenantScopedRepository`]
//! - [`cache`], [`stats`], [`convert`], [`validation`] - the engine's building blocks
//! - [`config`] - [`RepositoryConfig`]
//! - [`types`] - stored entities, page cursors, timestamp shapes
//! - [`error`] - error types for all operations
//! - [`backends`] - store implementations (the in-memory store behind the `memory` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use docstore_repository::repository::{CreateOptions, FindOptions};
//! use docstore_repository::{MemoryStore, Repository, RepositoryConfig};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Product {
//!     sku: String,
//!     name: String,
//!     price: u32,
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RepositoryConfig::builder("products")
//!     .required_fields(["sku", "name"])
//!     .unique_fields(["sku"])
//!     .build()?;
//! let repo: Repository<Product> = Repository::new(Arc::new(MemoryStore::new()), config)?;
//!
//! let created = repo
//!     .create(
//!         Product { sku: "SKU-1".into(), name: "Lamp".into(), price: 40 },
//!         CreateOptions::default(),
//!     )
//!     .await?;
//! assert_eq!(created.version(), Some(1));
//!
//! let cheap = repo.find(FindOptions::new().where_eq("price", 40)).await?;
//! assert_eq!(cheap.len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod cache;
pub mod config;
pub mod convert;
pub mod core;
pub mod error;
pub mod repository;
pub mod stats;
pub mod tenant;
pub mod types;
pub mod validation;

// Re-export commonly used types at crate root
pub use config::RepositoryConfig;
pub use error::{
    BackendError, BatchError, ConflictError, RepositoryError, RepositoryResult, ResourceError,
    StateError, TransactionError, ValidationError,
};
pub use repository::Repository;
pub use stats::RepositoryStats;
pub use tenant::{TenantId, TenantScopedRepository};
pub use types::{EntityData, PageCursor, PaginatedResult, StoredEntity};
pub use validation::Validator;

// Re-export core traits
pub use core::{
    BatchResult, BatchStatus, DocumentStore, Filter, FilterOp, OrderBy, Query, StoreCapability,
    StoreTransaction, TransactionContext, TransactionOptions, WriteBatch,
};

#[cfg(feature = "memory")]
pub use backends::memory::{MemoryStore, MemoryStoreConfig};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
