//! The repository engine.
//!
//! [`Repository<T>`] is the CRUD façade for one collection. It composes the
//! cache, converter, validator, stats tracker and the transaction and batch
//! executors, and applies the soft-delete and versioning policy of its
//! [`RepositoryConfig`].
//!
//! # Absence
//!
//! `find_by_id` returns `Ok(None)` for a missing (or, by default,
//! soft-deleted) entity unless `throw_if_not_found` is set. `update`,
//! `delete` (soft) and `restore` always fail with `ResourceError::NotFound`
//! when the entity does not exist. A hard delete of a missing document
//! succeeds.
//!
//! # Transactions
//!
//! Every operation accepts an optional [`TransactionContext`]. Reads inside a
//! transaction bypass the cache. Writes inside a transaction never populate
//! the cache; they schedule invalidation of the touched keys for after the
//! commit. `update` inside a transaction returns a locally merged projection
//! of the entity, since the write is not visible until the commit.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use docstore_repository::{MemoryStore, Repository, RepositoryConfig};
//!
//! let config = RepositoryConfig::builder("products").required_fields(["sku"]).build()?;
//! let repo: Repository<Product> = Repository::new(Arc::new(MemoryStore::new()), config)?;
//!
//! let created = repo.create(product, Default::default()).await?;
//! let found = repo.find_by_id(created.id(), Default::default()).await?;
//! ```

mod options;
mod read;
mod write;

pub use options::{
    BatchCreateOptions, BatchCreateOutcome, CreateOptions, DeleteOptions, FindByIdOptions,
    FindOptions, FindPage, UpdateOptions,
};
pub use read::MAX_CACHED_RESULTS;

use std::future::Future;
use std::sync::Arc;

use crate::cache::{CacheStats, CacheSweeper, EntityCache};
use crate::config::RepositoryConfig;
use crate::convert::EntityConverter;
use crate::core::batch::BatchExecutor;
use crate::core::store::{Document, DocumentStore, StoredDocument};
use crate::core::transaction::{
    TransactionContext, TransactionExecutor, TransactionOptions, TransactionOutcome,
};
use crate::error::{RepositoryError, RepositoryResult, TransactionError};
use crate::stats::{RepositoryStats, StatsTracker};
use crate::types::EntityData;
use crate::validation::Validator;

/// Generic repository over one collection of `T` entities.
pub struct Repository<T: EntityData> {
    store: Arc<dyn DocumentStore>,
    config: Arc<RepositoryConfig>,
    cache: Arc<EntityCache<T>>,
    stats: Arc<StatsTracker>,
    converter: EntityConverter,
    validator: Validator,
    transactions: TransactionExecutor,
    batches: BatchExecutor,
    sweeper: Option<CacheSweeper>,
}

impl<T: EntityData> std::fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("collection", &self.config.collection)
            .field("store", &self.store.name())
            .field("cache", &self.cache)
            .field("sweeper", &self.sweeper.is_some())
            .finish()
    }
}

impl<T: EntityData> Repository<T> {
    /// Creates a repository.
    ///
    /// When called inside a tokio runtime with caching enabled, this also
    /// starts the background cache sweep; it stops on
    /// [`shutdown`](Self::shutdown) or when the repository is dropped.
    pub fn new(store: Arc<dyn DocumentStore>, config: RepositoryConfig) -> RepositoryResult<Self> {
        config.validate()?;

        let cache = Arc::new(EntityCache::new(&config));
        let sweeper = CacheSweeper::spawn(&cache, config.cache_sweep_interval);
        let transactions = TransactionExecutor::new(Arc::clone(&store), config.transaction.clone());
        let batches = BatchExecutor::new(Arc::clone(&store), config.batch.chunk_size);

        tracing::debug!(
            collection = %config.collection,
            store = store.name(),
            cache = cache.is_enabled(),
            soft_deletes = config.use_soft_deletes,
            versioning = config.use_versioning,
            "repository created",
        );

        Ok(Self {
            converter: EntityConverter::new(&config),
            validator: Validator::new(&config),
            config: Arc::new(config),
            store,
            cache,
            stats: Arc::new(StatsTracker::new()),
            transactions,
            batches,
            sweeper,
        })
    }

    /// Returns the collection name.
    pub fn collection(&self) -> &str {
        &self.config.collection
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Returns the converter used by this repository.
    pub fn converter(&self) -> &EntityConverter {
        &self.converter
    }

    // ── Transactions ────────────────────────────────────────────────────

    /// Runs `f` in a store transaction with retry.
    ///
    /// `options` defaults to the configured transaction options. Pass the
    /// context to the `transaction` field of any operation's options to
    /// make it part of the transaction.
    pub async fn run_transaction<F, Fut, R>(
        &self,
        options: Option<TransactionOptions>,
        f: F,
    ) -> RepositoryResult<R>
    where
        F: FnMut(TransactionContext) -> Fut + Send,
        Fut: Future<Output = RepositoryResult<R>> + Send,
        R: Send,
    {
        self.run_transaction_detailed(options, f)
            .await
            .map(|outcome| outcome.value)
    }

    /// Like [`run_transaction`](Self::run_transaction), also reporting the
    /// number of attempts.
    pub async fn run_transaction_detailed<F, Fut, R>(
        &self,
        options: Option<TransactionOptions>,
        f: F,
    ) -> RepositoryResult<TransactionOutcome<R>>
    where
        F: FnMut(TransactionContext) -> Fut + Send,
        Fut: Future<Output = RepositoryResult<R>> + Send,
        R: Send,
    {
        let result = self.transactions.run_detailed(options, f).await;
        self.observe("run_transaction", result)
    }

    // ── Cache and stats ─────────────────────────────────────────────────

    /// Returns the operation counters.
    pub fn stats(&self) -> RepositoryStats {
        self.stats.snapshot()
    }

    /// Resets the operation counters.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Returns the cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Empties the cache and returns the number of dropped entries.
    pub fn clear_cache(&self) -> usize {
        self.cache.clear()
    }

    /// Drops one cache entry.
    pub fn invalidate(&self, id: &str) -> bool {
        self.cache.delete(id)
    }

    /// Removes expired cache entries now.
    pub fn sweep_expired(&self) -> usize {
        self.cache.sweep_expired()
    }

    /// Stops the background cache sweep.
    pub fn shutdown(&self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.shutdown();
        }
    }

    /// Returns `true` while the background cache sweep is running.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .as_ref()
            .is_some_and(|sweeper| !sweeper.is_stopped())
    }

    // ── Shared plumbing ─────────────────────────────────────────────────

    /// Records a failed operation before handing the result back.
    fn observe<R>(&self, operation: &'static str, result: RepositoryResult<R>) -> RepositoryResult<R> {
        if let Err(err) = &result {
            self.stats
                .record_error(operation, &self.config.collection, err);
        }
        result
    }

    fn check_transaction(tx: Option<&TransactionContext>) -> RepositoryResult<()> {
        match tx {
            Some(tx) if !tx.is_active() => Err(TransactionError::Inactive.into()),
            _ => Ok(()),
        }
    }

    async fn read_document(
        &self,
        id: &str,
        tx: Option<&TransactionContext>,
    ) -> RepositoryResult<Option<StoredDocument>> {
        let doc = match tx {
            Some(tx) => tx.get(&self.config.collection, id).await?,
            None => self.store.get(&self.config.collection, id).await?,
        };
        self.stats.record_reads(1);
        Ok(doc)
    }

    async fn write_set(
        &self,
        id: &str,
        fields: Document,
        tx: Option<&TransactionContext>,
    ) -> RepositoryResult<()> {
        match tx {
            Some(tx) => tx.set(&self.config.collection, id, fields).await?,
            None => self.store.set(&self.config.collection, id, fields).await?,
        }
        self.stats.record_writes(1);
        Ok(())
    }

    async fn write_update(
        &self,
        id: &str,
        fields: Document,
        tx: Option<&TransactionContext>,
    ) -> RepositoryResult<()> {
        match tx {
            Some(tx) => tx.update(&self.config.collection, id, fields).await?,
            None => self.store.update(&self.config.collection, id, fields).await?,
        }
        self.stats.record_writes(1);
        Ok(())
    }

    async fn write_delete(&self, id: &str, tx: Option<&TransactionContext>) -> RepositoryResult<()> {
        match tx {
            Some(tx) => tx.delete(&self.config.collection, id).await?,
            None => self.store.delete(&self.config.collection, id).await?,
        }
        self.stats.record_writes(1);
        Ok(())
    }

    /// Drops `id` from the cache once `tx` commits.
    fn invalidate_on_commit(&self, tx: &TransactionContext, id: &str) {
        let cache = Arc::clone(&self.cache);
        let id = id.to_string();
        tx.on_commit(move || {
            cache.delete(&id);
        });
    }
}

impl<T: EntityData> Drop for Repository<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Maps a missing entity to `Ok(None)` or `NotFound`.
fn absent<R>(collection: &str, id: &str, throw: bool) -> RepositoryResult<Option<R>> {
    if throw {
        Err(RepositoryError::not_found(collection, id))
    } else {
        Ok(None)
    }
}
