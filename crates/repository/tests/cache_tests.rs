//! Integration tests for the repository's entity cache.

mod common;

use std::time::Duration;

use common::{create_repository, create_repository_with, product, products_config};
use docstore_repository::repository::{
    BatchCreateOptions, CreateOptions, FindByIdOptions, FindOptions, MAX_CACHED_RESULTS,
};

/// Test that entries expire after the TTL and are re-read from the store.
#[tokio::test(start_paused = true)]
async fn test_cache_ttl_expiry() {
    let mut config = products_config();
    config.cache_ttl = Duration::from_millis(100);
    let (repo, _store) = create_repository_with(config);

    let created = repo
        .create(product("SKU-1", 40), CreateOptions::default())
        .await
        .unwrap();
    repo.find_by_id(created.id(), FindByIdOptions::default())
        .await
        .unwrap();
    assert_eq!(repo.stats().cache_hits, 1);

    tokio::time::advance(Duration::from_millis(150)).await;

    repo.find_by_id(created.id(), FindByIdOptions::default())
        .await
        .unwrap();
    let stats = repo.stats();
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.reads, 1);
}

/// Test that the background sweep clears expired entries without reads.
#[tokio::test(start_paused = true)]
async fn test_background_sweep() {
    let mut config = products_config();
    config.cache_ttl = Duration::from_millis(100);
    config.cache_sweep_interval = Duration::from_millis(500);
    let (repo, _store) = create_repository_with(config);
    assert!(repo.is_sweeping());

    repo.create(product("SKU-1", 40), CreateOptions::default())
        .await
        .unwrap();
    assert_eq!(repo.cache_stats().size, 1);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(repo.cache_stats().size, 0);
    assert_eq!(repo.cache_stats().cleanups, 1);

    repo.shutdown();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!repo.is_sweeping());
}

/// Test that a disabled cache sends every read to the store.
#[tokio::test]
async fn test_cache_disabled() {
    let mut config = products_config();
    config.enable_cache = false;
    let (repo, _store) = create_repository_with(config);
    assert!(!repo.is_sweeping());

    let created = repo
        .create(product("SKU-1", 40), CreateOptions::default())
        .await
        .unwrap();
    for _ in 0..3 {
        repo.find_by_id(created.id(), FindByIdOptions::default())
            .await
            .unwrap();
    }

    let stats = repo.stats();
    assert_eq!(stats.reads, 3);
    assert_eq!(stats.cache_hits, 0);
    assert_eq!(stats.cache_misses, 0);
    assert_eq!(repo.cache_stats().size, 0);
}

/// Test that query results are cached unless the result set is large.
#[tokio::test]
async fn test_query_results_cached_up_to_limit() {
    let mut config = products_config();
    config.batch.max_items = 200;
    let (repo, _store) = create_repository_with(config);

    let items = (0..MAX_CACHED_RESULTS + 1)
        .map(|i| product(&format!("SKU-{}", i), i as u32))
        .collect();
    repo.create_batch(items, BatchCreateOptions::new().no_cache())
        .await
        .unwrap();
    assert_eq!(repo.cache_stats().size, 0);

    let all = repo.find(FindOptions::new()).await.unwrap();
    assert_eq!(all.len(), MAX_CACHED_RESULTS + 1);
    assert_eq!(repo.cache_stats().size, 0);

    let some = repo.find(FindOptions::new().limit(10)).await.unwrap();
    assert_eq!(some.len(), 10);
    assert_eq!(repo.cache_stats().size, 10);

    repo.find(FindOptions::new().limit(20).offset(10).no_cache())
        .await
        .unwrap();
    assert_eq!(repo.cache_stats().size, 10);
}

/// Test the explicit cache controls.
#[tokio::test]
async fn test_clear_and_invalidate() {
    let (repo, _store) = create_repository();
    let a = repo
        .create(product("SKU-1", 40), CreateOptions::default())
        .await
        .unwrap();
    repo.create(product("SKU-2", 50), CreateOptions::default())
        .await
        .unwrap();

    assert!(repo.invalidate(a.id()));
    assert!(!repo.invalidate(a.id()));
    assert_eq!(repo.clear_cache(), 1);
    assert_eq!(repo.cache_stats().size, 0);
}

/// Test that bypass_cache neither reads nor fills the cache counters.
#[tokio::test]
async fn test_bypass_cache() {
    let (repo, _store) = create_repository();
    let created = repo
        .create(product("SKU-1", 40), CreateOptions::default())
        .await
        .unwrap();

    repo.find_by_id(created.id(), FindByIdOptions::new().bypass_cache())
        .await
        .unwrap();
    let stats = repo.stats();
    assert_eq!(stats.cache_hits, 0);
    assert_eq!(stats.cache_misses, 0);
    assert_eq!(stats.reads, 1);
}
