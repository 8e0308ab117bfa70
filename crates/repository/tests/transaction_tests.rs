//! Integration tests for transactions and their retry behavior.

mod common;

use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::time::Instant;

use common::{create_flaky_repository, create_repository, patch, product, products_config};
use docstore_repository::core::DocumentStore;
use docstore_repository::error::{BackendError, RepositoryError, TransactionError, ValidationError};
use docstore_repository::repository::{
    CreateOptions, DeleteOptions, FindByIdOptions, FindOptions, UpdateOptions,
};
use docstore_repository::{TransactionContext, TransactionOptions};

fn fast_retries(max_attempts: u32) -> TransactionOptions {
    TransactionOptions::new()
        .max_attempts(max_attempts)
        .retry_delay(Duration::from_millis(10))
}

// ============================================================================
// Commit and rollback
// ============================================================================

/// Test that writes made through the context apply on commit.
#[tokio::test]
async fn test_transaction_commits_writes() {
    let (repo, store) = create_repository();
    let existing = repo
        .create(product("SKU-1", 40), CreateOptions::default())
        .await
        .unwrap();
    let id = existing.id().to_string();
    let repo_ref = &repo;
    let id_ref = id.as_str();

    let (updated, created) = repo
        .run_transaction(None, |tx| async move {
            let current = repo_ref
                .find_by_id(id_ref, FindByIdOptions::new().throw_if_not_found().in_transaction(&tx))
                .await?
                .unwrap();
            let updated = repo_ref
                .update(
                    id_ref,
                    patch(json!({"price": current.data().price + 5})),
                    UpdateOptions::new().in_transaction(&tx),
                )
                .await?;
            let created = repo_ref
                .create(
                    product("SKU-2", 10),
                    CreateOptions::new().with_id("sku-2").in_transaction(&tx),
                )
                .await?;
            Ok((updated, created))
        })
        .await
        .unwrap();

    assert_eq!(updated.version(), Some(2));
    assert_eq!(updated.data().price, 45);
    assert_eq!(created.id(), "sku-2");
    assert_eq!(store.len("products"), 2);

    // the commit hook dropped the stale cache entry
    let found = repo
        .find_by_id(&id, FindByIdOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.data().price, 45);
    assert_eq!(found.version(), Some(2));
}

/// Test that a closure error rolls everything back and is not retried.
#[tokio::test]
async fn test_transaction_rolls_back_on_error() {
    let (repo, flaky, memory) = create_flaky_repository(products_config());
    let repo_ref = &repo;

    let err = repo
        .run_transaction(Some(fast_retries(3)), |tx| async move {
            repo_ref
                .create(product("SKU-1", 10), CreateOptions::new().in_transaction(&tx))
                .await?;
            Err::<(), _>(
                ValidationError::InvalidEntity {
                    collection: "products".to_string(),
                    message: "rejected by caller".to_string(),
                }
                .into(),
            )
        })
        .await
        .unwrap_err();

    assert!(matches!(err, RepositoryError::Validation(_)));
    assert!(memory.is_empty("products"));
    assert_eq!(flaky.transactions_begun(), 1);
    assert_eq!(repo.stats().last_error.unwrap().operation, "run_transaction");
}

/// Test that deletes inside a transaction apply on commit.
#[tokio::test]
async fn test_transaction_delete() {
    let (repo, store) = create_repository();
    let created = repo
        .create(product("SKU-1", 40), CreateOptions::default())
        .await
        .unwrap();
    let repo_ref = &repo;
    let id = created.id();

    repo.run_transaction(None, |tx| async move {
        repo_ref
            .delete(id, DeleteOptions::new().hard().in_transaction(&tx))
            .await
    })
    .await
    .unwrap();

    assert!(store.is_empty("products"));
    assert!(repo
        .find_by_id(id, FindByIdOptions::default())
        .await
        .unwrap()
        .is_none());
}

// ============================================================================
// Retry
// ============================================================================

/// Test that retryable commit failures are retried until success.
#[tokio::test(start_paused = true)]
async fn test_transaction_retries_until_success() {
    let (repo, flaky, memory) = create_flaky_repository(products_config());
    flaky.fail_commits(2);
    let repo_ref = &repo;

    let outcome = repo
        .run_transaction_detailed(Some(fast_retries(5)), |tx| async move {
            repo_ref
                .create(
                    product("SKU-1", 10),
                    CreateOptions::new().with_id("sku-1").in_transaction(&tx),
                )
                .await
        })
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.value.id(), "sku-1");
    assert_eq!(flaky.transactions_begun(), 3);
    assert_eq!(memory.len("products"), 1);
    assert_eq!(repo.stats().errors, 0);
}

/// Test that the delay between attempts grows exponentially within the
/// jitter bounds.
#[tokio::test(start_paused = true)]
async fn test_transaction_backoff_between_attempts() {
    let (repo, flaky, _memory) = create_flaky_repository(products_config());
    flaky.fail_commits(2);
    let base = Duration::from_millis(100);
    let started: Mutex<Vec<Instant>> = Mutex::new(Vec::new());
    let started_ref = &started;
    let repo_ref = &repo;

    let outcome = repo
        .run_transaction_detailed(
            Some(TransactionOptions::new().max_attempts(5).retry_delay(base)),
            |tx| async move {
                started_ref.lock().push(Instant::now());
                repo_ref
                    .create(product("SKU-1", 10), CreateOptions::new().in_transaction(&tx))
                    .await
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.attempts, 3);

    let started = started.into_inner();
    let gaps: Vec<Duration> = started.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(gaps.len(), 2);
    // after attempt n the delay is base * 2^n * [0.5, 1.0); timers fire on
    // millisecond boundaries
    for (attempt, gap) in (1..).zip(&gaps) {
        let full = base * 2u32.pow(attempt);
        assert!(*gap >= full / 2, "gap {gap:?} after attempt {attempt}");
        assert!(*gap <= full + Duration::from_millis(1), "gap {gap:?} after attempt {attempt}");
    }
    assert!(gaps[1] >= gaps[0]);
}

/// Test that retries stop at max_attempts and surface the last error.
#[tokio::test(start_paused = true)]
async fn test_transaction_gives_up_after_max_attempts() {
    let (repo, flaky, memory) = create_flaky_repository(products_config());
    flaky.fail_commits(10);
    let repo_ref = &repo;

    let err = repo
        .run_transaction(Some(fast_retries(3)), |tx| async move {
            repo_ref
                .create(product("SKU-1", 10), CreateOptions::new().in_transaction(&tx))
                .await
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RepositoryError::Backend(BackendError::Unavailable { .. })
    ));
    assert_eq!(flaky.transactions_begun(), 3);
    assert!(memory.is_empty("products"));
    assert_eq!(repo.stats().errors, 1);
}

/// Test that a concurrent write between read and commit forces a retry
/// that sees the new value.
#[tokio::test(start_paused = true)]
async fn test_transaction_retries_on_stale_read() {
    let (repo, store) = create_repository();
    let created = repo
        .create(product("SKU-1", 40), CreateOptions::new().with_id("sku-1"))
        .await
        .unwrap();
    let repo_ref = &repo;
    let store_ref = &store;

    let outcome = repo
        .run_transaction_detailed(Some(fast_retries(3)), |tx| async move {
            let current = repo_ref
                .find_by_id("sku-1", FindByIdOptions::new().in_transaction(&tx))
                .await?
                .unwrap();
            if tx.attempt() == 1 {
                let mut bump = serde_json::Map::new();
                bump.insert("price".to_string(), json!(100));
                store_ref.update("products", "sku-1", bump).await?;
            }
            repo_ref
                .update(
                    "sku-1",
                    patch(json!({"price": current.data().price + 1})),
                    UpdateOptions::new().in_transaction(&tx),
                )
                .await
        })
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.value.data().price, 101);
    assert_eq!(outcome.value.version(), Some(created.version().unwrap() + 1));
}

// ============================================================================
// Context lifecycle
// ============================================================================

/// Test that read-only transactions reject writes without retrying.
#[tokio::test]
async fn test_read_only_transaction_rejects_writes() {
    let (repo, flaky, _memory) = create_flaky_repository(products_config());
    let repo_ref = &repo;

    let err = repo
        .run_transaction(Some(fast_retries(3).read_only()), |tx| async move {
            let count = repo_ref.count(FindOptions::new().in_transaction(&tx)).await?;
            assert_eq!(count, 0);
            repo_ref
                .create(product("SKU-1", 10), CreateOptions::new().in_transaction(&tx))
                .await
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RepositoryError::Transaction(TransactionError::ReadOnly)
    ));
    assert_eq!(flaky.transactions_begun(), 1);
}

/// Test that a context used after its transaction finished is rejected.
#[tokio::test]
async fn test_context_inactive_after_commit() {
    let (repo, _store) = create_repository();
    let leaked: Mutex<Option<TransactionContext>> = Mutex::new(None);
    let leaked_ref = &leaked;

    repo.run_transaction(None, |tx| async move {
        *leaked_ref.lock() = Some(tx);
        Ok(())
    })
    .await
    .unwrap();

    let stale = leaked.lock().take().unwrap();
    assert!(!stale.is_active());
    let err = repo
        .create(product("SKU-1", 10), CreateOptions::new().in_transaction(&stale))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::Transaction(TransactionError::Inactive)
    ));
}
