//! Shared fixtures for the repository integration tests.
//!
//! Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use docstore_repository::core::{
    Document, DocumentStore, FilterOp, Query, StoreCapability, StoreTransaction, StoredDocument,
    WriteBatch,
};
use docstore_repository::error::{BackendError, RepositoryError, RepositoryResult};
use docstore_repository::{MemoryStore, Repository, RepositoryConfig};

// ============================================================================
// Fixtures
// ============================================================================

/// The entity used throughout the tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub sku: String,
    pub name: String,
    pub price: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(
        rename = "organizationId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub organization_id: Option<String>,
}

/// A product with the given SKU and price.
pub fn product(sku: &str, price: u32) -> Product {
    Product {
        sku: sku.to_string(),
        name: format!("Product {}", sku),
        price,
        tags: Vec::new(),
        organization_id: None,
    }
}

/// Builds a patch document from a JSON object literal.
pub fn patch(value: serde_json::Value) -> Document {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("patch must be an object, got {other}"),
    }
}

/// Installs a `warn`-level subscriber unless `RUST_LOG` says otherwise.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Default test configuration for the `products` collection: soft deletes,
/// versioning and caching on.
pub fn products_config() -> RepositoryConfig {
    RepositoryConfig::builder("products")
        .required_fields(["sku", "name"])
        .build()
        .expect("valid config")
}

/// A repository over a fresh in-memory store.
pub fn create_repository() -> (Repository<Product>, MemoryStore) {
    create_repository_with(products_config())
}

/// A repository over a fresh in-memory store with the given config.
pub fn create_repository_with(config: RepositoryConfig) -> (Repository<Product>, MemoryStore) {
    init_tracing();
    let store = MemoryStore::new();
    let repo = Repository::new(Arc::new(store.clone()), config).expect("repository");
    (repo, store)
}

// ============================================================================
// Fault injection
// ============================================================================

#[derive(Debug, Default)]
struct Faults {
    commits: AtomicU32,
    batches: AtomicU32,
    batches_before_failure: AtomicU32,
    reads: AtomicU32,
    begun: AtomicU32,
    yield_on_read: AtomicBool,
}

impl Faults {
    /// Hands control back to the scheduler after a read when enabled, so
    /// concurrent callers interleave between their reads and writes.
    async fn after_read(&self) {
        if self.yield_on_read.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }
}

fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn unavailable(what: &str) -> RepositoryError {
    BackendError::Unavailable {
        backend_name: "flaky".to_string(),
        message: format!("injected {} failure", what),
    }
    .into()
}

/// Wraps a [`MemoryStore`] and fails selected operations with a retryable
/// `BackendError::Unavailable`.
#[derive(Debug, Clone)]
pub struct FlakyStore {
    inner: MemoryStore,
    faults: Arc<Faults>,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            faults: Arc::new(Faults::default()),
        }
    }

    /// Fails the next `n` transaction commits.
    pub fn fail_commits(&self, n: u32) {
        self.faults.commits.store(n, Ordering::SeqCst);
    }

    /// Fails the next `n` write batch commits.
    pub fn fail_batches(&self, n: u32) {
        self.faults.batches.store(n, Ordering::SeqCst);
    }

    /// Lets `n` write batches commit, then fails the one after.
    pub fn fail_batch_after(&self, n: u32) {
        self.faults.batches_before_failure.store(n, Ordering::SeqCst);
        self.faults.batches.store(1, Ordering::SeqCst);
    }

    /// Fails the next `n` single-document reads.
    pub fn fail_reads(&self, n: u32) {
        self.faults.reads.store(n, Ordering::SeqCst);
    }

    /// Yields to the scheduler after every single-document read.
    pub fn yield_on_read(&self) {
        self.faults.yield_on_read.store(true, Ordering::SeqCst);
    }

    /// Number of transactions started so far.
    pub fn transactions_begun(&self) -> u32 {
        self.faults.begun.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn supports(&self, capability: StoreCapability) -> bool {
        self.inner.supports(capability)
    }

    fn supports_operator(&self, op: FilterOp) -> bool {
        self.inner.supports_operator(op)
    }

    fn generate_id(&self) -> String {
        self.inner.generate_id()
    }

    async fn get(&self, collection: &str, id: &str) -> RepositoryResult<Option<StoredDocument>> {
        if take(&self.faults.reads) {
            return Err(unavailable("read"));
        }
        let doc = self.inner.get(collection, id).await?;
        self.faults.after_read().await;
        Ok(doc)
    }

    async fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> RepositoryResult<Vec<StoredDocument>> {
        self.inner.query(collection, query).await
    }

    async fn count(&self, collection: &str, query: &Query) -> RepositoryResult<u64> {
        self.inner.count(collection, query).await
    }

    async fn set(&self, collection: &str, id: &str, data: Document) -> RepositoryResult<()> {
        self.inner.set(collection, id, data).await
    }

    async fn update(&self, collection: &str, id: &str, data: Document) -> RepositoryResult<()> {
        self.inner.update(collection, id, data).await
    }

    async fn delete(&self, collection: &str, id: &str) -> RepositoryResult<()> {
        self.inner.delete(collection, id).await
    }

    async fn begin_transaction(
        &self,
        read_only: bool,
        timeout: Duration,
    ) -> RepositoryResult<Box<dyn StoreTransaction>> {
        self.faults.begun.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.begin_transaction(read_only, timeout).await?;
        Ok(Box::new(FlakyTransaction {
            inner,
            faults: Arc::clone(&self.faults),
        }))
    }

    fn write_batch(&self) -> Box<dyn WriteBatch> {
        Box::new(FlakyBatch {
            inner: self.inner.write_batch(),
            faults: Arc::clone(&self.faults),
        })
    }
}

struct FlakyTransaction {
    inner: Box<dyn StoreTransaction>,
    faults: Arc<Faults>,
}

#[async_trait]
impl StoreTransaction for FlakyTransaction {
    async fn get(
        &mut self,
        collection: &str,
        id: &str,
    ) -> RepositoryResult<Option<StoredDocument>> {
        let doc = self.inner.get(collection, id).await?;
        self.faults.after_read().await;
        Ok(doc)
    }

    async fn query(
        &mut self,
        collection: &str,
        query: &Query,
    ) -> RepositoryResult<Vec<StoredDocument>> {
        self.inner.query(collection, query).await
    }

    fn set(&mut self, collection: &str, id: &str, data: Document) -> RepositoryResult<()> {
        self.inner.set(collection, id, data)
    }

    fn update(&mut self, collection: &str, id: &str, data: Document) -> RepositoryResult<()> {
        self.inner.update(collection, id, data)
    }

    fn delete(&mut self, collection: &str, id: &str) -> RepositoryResult<()> {
        self.inner.delete(collection, id)
    }

    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        if take(&self.faults.commits) {
            self.inner.rollback().await?;
            return Err(unavailable("commit"));
        }
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> RepositoryResult<()> {
        self.inner.rollback().await
    }
}

struct FlakyBatch {
    inner: Box<dyn WriteBatch>,
    faults: Arc<Faults>,
}

#[async_trait]
impl WriteBatch for FlakyBatch {
    fn set(&mut self, collection: &str, id: &str, data: Document) {
        self.inner.set(collection, id, data);
    }

    fn update(&mut self, collection: &str, id: &str, data: Document) {
        self.inner.update(collection, id, data);
    }

    fn delete(&mut self, collection: &str, id: &str) {
        self.inner.delete(collection, id);
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        if !take(&self.faults.batches_before_failure) && take(&self.faults.batches) {
            return Err(unavailable("batch"));
        }
        self.inner.commit().await
    }
}

/// A repository over a [`FlakyStore`].
pub fn create_flaky_repository(config: RepositoryConfig) -> (Repository<Product>, FlakyStore, MemoryStore) {
    init_tracing();
    let memory = MemoryStore::new();
    let flaky = FlakyStore::new(memory.clone());
    let repo = Repository::new(Arc::new(flaky.clone()), config).expect("repository");
    (repo, flaky, memory)
}
