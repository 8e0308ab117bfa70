//! Transactions with retry.
//!
//! [`TransactionExecutor::run`] runs a caller-supplied closure against one
//! store transaction per attempt. The transaction commits when the closure
//! returns `Ok` and rolls back otherwise. Retryable failures (see
//! [`RepositoryError::is_retryable`](crate::error::RepositoryError::is_retryable)) are retried with exponential backoff
//! and jitter until `max_attempts` is reached; only the last error reaches
//! the caller.
//!
//! # Example
//!
//! ```ignore
//! let moved = executor
//!     .run(None, |tx| async move {
//!         let doc = tx.get("stock", "s-1").await?;
//!         // ...
//!         tx.update("stock", "s-1", patch).await?;
//!         Ok(doc.is_some())
//!     })
//!     .await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::humantime_serde;
use crate::error::{RepositoryResult, TransactionError};

use super::query::Query;
use super::store::{Document, DocumentStore, StoreTransaction, StoredDocument};

/// Options for running a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOptions {
    /// Total number of attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Whether writes are rejected.
    #[serde(default)]
    pub read_only: bool,

    /// Base delay for the exponential backoff.
    #[serde(with = "humantime_serde", default = "default_retry_delay")]
    pub retry_delay: Duration,

    /// Advisory time bound passed to the store.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            read_only: false,
            retry_delay: default_retry_delay(),
            timeout: default_timeout(),
        }
    }
}

impl TransactionOptions {
    /// Creates new options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the attempt bound.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Marks this as a read-only transaction.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Sets the backoff base delay.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Computes the delay before the next attempt.
///
/// `retry_delay * 2^attempt * (0.5 + jitter * 0.5)`, where `attempt` is the
/// 1-based number of the attempt that just failed and `jitter` is in `[0, 1)`.
pub fn backoff_delay(retry_delay: Duration, attempt: u32, jitter: f64) -> Duration {
    let exponent = attempt.min(16) as i32;
    let factor = 2f64.powi(exponent) * (0.5 + jitter.clamp(0.0, 1.0) * 0.5);
    retry_delay.mul_f64(factor)
}

type CommitHook = Box<dyn FnOnce() + Send>;

struct ContextInner {
    handle: tokio::sync::Mutex<Option<Box<dyn StoreTransaction>>>,
    active: AtomicBool,
    options: TransactionOptions,
    attempt: u32,
    hooks: Mutex<Vec<CommitHook>>,
}

/// The handle passed to a transaction closure.
///
/// Cloning is cheap; all clones refer to the same store transaction. The
/// context is only valid for the attempt it was created for. Once the
/// attempt commits or rolls back, every call fails with
/// [`TransactionError::Inactive`].
#[derive(Clone)]
pub struct TransactionContext {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("attempt", &self.inner.attempt)
            .field("read_only", &self.inner.options.read_only)
            .field("active", &self.is_active())
            .finish()
    }
}

impl TransactionContext {
    fn new(handle: Box<dyn StoreTransaction>, options: TransactionOptions, attempt: u32) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                handle: tokio::sync::Mutex::new(Some(handle)),
                active: AtomicBool::new(true),
                options,
                attempt,
                hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the options of the running transaction.
    pub fn options(&self) -> &TransactionOptions {
        &self.inner.options
    }

    /// Returns the 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.inner.attempt
    }

    /// Returns `true` if writes are rejected.
    pub fn is_read_only(&self) -> bool {
        self.inner.options.read_only
    }

    /// Returns `true` until the attempt commits or rolls back.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Registers a callback to run after the transaction commits.
    ///
    /// Callbacks are dropped without running if the attempt fails.
    pub fn on_commit(&self, hook: impl FnOnce() + Send + 'static) {
        self.inner.hooks.lock().push(Box::new(hook));
    }

    /// Reads one document inside the transaction.
    pub async fn get(&self, collection: &str, id: &str) -> RepositoryResult<Option<StoredDocument>> {
        let mut guard = self.inner.handle.lock().await;
        let tx = guard.as_mut().ok_or(TransactionError::Inactive)?;
        tx.get(collection, id).await
    }

    /// Runs a query inside the transaction.
    pub async fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> RepositoryResult<Vec<StoredDocument>> {
        let mut guard = self.inner.handle.lock().await;
        let tx = guard.as_mut().ok_or(TransactionError::Inactive)?;
        tx.query(collection, query).await
    }

    /// Buffers a create-or-replace.
    pub async fn set(&self, collection: &str, id: &str, data: Document) -> RepositoryResult<()> {
        self.check_writable()?;
        let mut guard = self.inner.handle.lock().await;
        let tx = guard.as_mut().ok_or(TransactionError::Inactive)?;
        tx.set(collection, id, data)
    }

    /// Buffers a partial update.
    pub async fn update(&self, collection: &str, id: &str, data: Document) -> RepositoryResult<()> {
        self.check_writable()?;
        let mut guard = self.inner.handle.lock().await;
        let tx = guard.as_mut().ok_or(TransactionError::Inactive)?;
        tx.update(collection, id, data)
    }

    /// Buffers a delete.
    pub async fn delete(&self, collection: &str, id: &str) -> RepositoryResult<()> {
        self.check_writable()?;
        let mut guard = self.inner.handle.lock().await;
        let tx = guard.as_mut().ok_or(TransactionError::Inactive)?;
        tx.delete(collection, id)
    }

    fn check_writable(&self) -> RepositoryResult<()> {
        if !self.is_active() {
            return Err(TransactionError::Inactive.into());
        }
        if self.is_read_only() {
            return Err(TransactionError::ReadOnly.into());
        }
        Ok(())
    }

    async fn finish(&self) -> Option<Box<dyn StoreTransaction>> {
        self.inner.active.store(false, Ordering::Release);
        self.inner.handle.lock().await.take()
    }

    fn take_hooks(&self) -> Vec<CommitHook> {
        std::mem::take(&mut *self.inner.hooks.lock())
    }
}

/// The value of a committed transaction and the attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOutcome<R> {
    /// The closure's return value.
    pub value: R,
    /// Number of attempts, including the successful one.
    pub attempts: u32,
}

/// Runs closures inside store transactions, retrying on failure.
#[derive(Debug, Clone)]
pub struct TransactionExecutor {
    store: Arc<dyn DocumentStore>,
    defaults: TransactionOptions,
}

impl TransactionExecutor {
    /// Creates an executor; `defaults` applies when a call passes no options.
    pub fn new(store: Arc<dyn DocumentStore>, defaults: TransactionOptions) -> Self {
        Self { store, defaults }
    }

    /// Returns the default options.
    pub fn defaults(&self) -> &TransactionOptions {
        &self.defaults
    }

    /// Runs `f` in a transaction and returns its value.
    pub async fn run<F, Fut, R>(&self, options: Option<TransactionOptions>, f: F) -> RepositoryResult<R>
    where
        F: FnMut(TransactionContext) -> Fut + Send,
        Fut: Future<Output = RepositoryResult<R>> + Send,
        R: Send,
    {
        self.run_detailed(options, f)
            .await
            .map(|outcome| outcome.value)
    }

    /// Runs `f` in a transaction and also reports the number of attempts.
    #[tracing::instrument(skip(self, options, f), fields(store = self.store.name()))]
    pub async fn run_detailed<F, Fut, R>(
        &self,
        options: Option<TransactionOptions>,
        mut f: F,
    ) -> RepositoryResult<TransactionOutcome<R>>
    where
        F: FnMut(TransactionContext) -> Fut + Send,
        Fut: Future<Output = RepositoryResult<R>> + Send,
        R: Send,
    {
        let options = options.unwrap_or_else(|| self.defaults.clone());
        let max_attempts = options.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt(&options, attempt, &mut f).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, "transaction committed after retry");
                    }
                    return Ok(TransactionOutcome {
                        value,
                        attempts: attempt,
                    });
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = backoff_delay(options.retry_delay, attempt, rand::rng().random());
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transaction attempt failed, retrying after backoff",
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        retryable = err.is_retryable(),
                        error = %err,
                        "transaction failed",
                    );
                    return Err(err);
                }
            }
        }
    }

    async fn attempt<F, Fut, R>(
        &self,
        options: &TransactionOptions,
        attempt: u32,
        f: &mut F,
    ) -> RepositoryResult<R>
    where
        F: FnMut(TransactionContext) -> Fut + Send,
        Fut: Future<Output = RepositoryResult<R>> + Send,
        R: Send,
    {
        let handle = self
            .store
            .begin_transaction(options.read_only, options.timeout)
            .await?;
        let ctx = TransactionContext::new(handle, options.clone(), attempt);

        let result = f(ctx.clone()).await;
        let handle = ctx.finish().await;

        match result {
            Ok(value) => {
                let handle = handle.ok_or(TransactionError::Inactive)?;
                handle.commit().await?;
                for hook in ctx.take_hooks() {
                    hook();
                }
                Ok(value)
            }
            Err(err) => {
                if let Some(handle) = handle
                    && let Err(rollback_err) = handle.rollback().await
                {
                    tracing::debug!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = TransactionOptions::default();
        assert_eq!(options.max_attempts, 5);
        assert!(!options.read_only);
        assert_eq!(options.retry_delay, Duration::from_millis(200));
        assert_eq!(options.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_builder() {
        let options = TransactionOptions::new()
            .max_attempts(3)
            .read_only()
            .retry_delay(Duration::from_millis(10));
        assert_eq!(options.max_attempts, 3);
        assert!(options.read_only);
        assert_eq!(options.retry_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_backoff_bounds() {
        let base = Duration::from_millis(200);
        // attempt 1: 200ms * 2 * [0.5, 1.0]
        assert_eq!(backoff_delay(base, 1, 0.0), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 1, 1.0), Duration::from_millis(400));
        // attempt 3: 200ms * 8 * [0.5, 1.0]
        assert_eq!(backoff_delay(base, 3, 0.0), Duration::from_millis(800));
        assert_eq!(backoff_delay(base, 3, 1.0), Duration::from_millis(1600));
    }

    #[test]
    fn test_backoff_grows_whatever_the_jitter() {
        let base = Duration::from_millis(50);
        for attempt in 1..6 {
            let worst_next = backoff_delay(base, attempt + 1, 0.0);
            let best_current = backoff_delay(base, attempt, 0.999);
            assert!(worst_next > best_current);
        }
    }

    #[test]
    fn test_options_serde_humantime() {
        let options: TransactionOptions =
            serde_json::from_str(r#"{"max_attempts": 2, "retry_delay": "50ms"}"#).unwrap();
        assert_eq!(options.max_attempts, 2);
        assert_eq!(options.retry_delay, Duration::from_millis(50));
        assert_eq!(options.timeout, Duration::from_secs(30));
    }
}
