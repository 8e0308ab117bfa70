//! Integration tests for soft deletes, hard deletes and restore.

mod common;

use common::{create_repository, create_repository_with, patch, product, products_config};
use docstore_repository::core::DocumentStore;
use docstore_repository::error::{RepositoryError, StateError};
use docstore_repository::repository::{
    CreateOptions, DeleteOptions, FindByIdOptions, FindOptions, UpdateOptions,
};
use serde_json::json;

// ============================================================================
// Soft delete
// ============================================================================

/// Test that a soft-deleted entity disappears from reads but stays stored.
#[tokio::test]
async fn test_soft_delete_hides_entity() {
    let (repo, store) = create_repository();
    let created = repo
        .create(product("SKU-1", 40), CreateOptions::default())
        .await
        .unwrap();

    repo.delete(created.id(), DeleteOptions::default())
        .await
        .unwrap();

    assert!(repo
        .find_by_id(created.id(), FindByIdOptions::default())
        .await
        .unwrap()
        .is_none());
    assert!(!repo.exists(created.id()).await.unwrap());
    assert!(repo.find(FindOptions::new()).await.unwrap().is_empty());
    assert_eq!(repo.count(FindOptions::new()).await.unwrap(), 0);

    let raw = store.get("products", created.id()).await.unwrap().unwrap();
    assert_eq!(raw.fields["isDeleted"], json!(true));
    assert!(raw.fields.contains_key("deletedAt"));

    let deleted = repo
        .find_by_id(created.id(), FindByIdOptions::new().include_deleted())
        .await
        .unwrap()
        .unwrap();
    assert!(deleted.is_deleted());
    assert!(deleted.deleted_at().is_some());
    // soft delete does not touch the version
    assert_eq!(deleted.version(), Some(1));

    let all = repo
        .find(FindOptions::new().include_deleted())
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

/// Test that deleting a missing entity fails when soft deletes are on.
#[tokio::test]
async fn test_soft_delete_missing_entity() {
    let (repo, _store) = create_repository();
    let err = repo
        .delete("ghost", DeleteOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

/// Test that deleting twice leaves the first deletion time in place.
#[tokio::test]
async fn test_soft_delete_twice_is_noop() {
    let (repo, _store) = create_repository();
    let created = repo
        .create(product("SKU-1", 40), CreateOptions::default())
        .await
        .unwrap();

    repo.delete(created.id(), DeleteOptions::default())
        .await
        .unwrap();
    let first = repo
        .find_by_id(created.id(), FindByIdOptions::new().include_deleted())
        .await
        .unwrap()
        .unwrap();

    repo.delete(created.id(), DeleteOptions::default())
        .await
        .unwrap();
    let second = repo
        .find_by_id(
            created.id(),
            FindByIdOptions::new().include_deleted().bypass_cache(),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.deleted_at(), second.deleted_at());
}

/// Test that updates to soft-deleted entities are refused unless bypassed.
#[tokio::test]
async fn test_update_of_deleted_entity() {
    let (repo, _store) = create_repository();
    let created = repo
        .create(product("SKU-1", 40), CreateOptions::default())
        .await
        .unwrap();
    repo.delete(created.id(), DeleteOptions::default())
        .await
        .unwrap();

    let err = repo
        .update(created.id(), patch(json!({"price": 1})), UpdateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::State(StateError::Deleted { .. })));

    let updated = repo
        .update(
            created.id(),
            patch(json!({"price": 1})),
            UpdateOptions::new().bypass_soft_delete_check(),
        )
        .await
        .unwrap();
    assert!(updated.is_deleted());
    assert_eq!(updated.data().price, 1);
}

/// Test that restore clears the deletion markers.
#[tokio::test]
async fn test_restore() {
    let (repo, _store) = create_repository();
    let created = repo
        .create(product("SKU-1", 40), CreateOptions::default())
        .await
        .unwrap();
    repo.delete(created.id(), DeleteOptions::default())
        .await
        .unwrap();

    let restored = repo.restore(created.id(), None).await.unwrap();
    assert!(!restored.is_deleted());
    assert!(restored.deleted_at().is_none());
    assert_eq!(restored.version(), Some(2));

    let found = repo
        .find_by_id(created.id(), FindByIdOptions::default())
        .await
        .unwrap();
    assert!(found.is_some());
}

// ============================================================================
// Hard delete
// ============================================================================

/// Test that hard and forced deletes remove the document.
#[tokio::test]
async fn test_hard_delete_removes_document() {
    let (repo, store) = create_repository();
    let a = repo
        .create(product("SKU-1", 40), CreateOptions::default())
        .await
        .unwrap();
    let b = repo
        .create(product("SKU-2", 50), CreateOptions::default())
        .await
        .unwrap();

    repo.delete(a.id(), DeleteOptions::new().hard()).await.unwrap();
    repo.delete(b.id(), DeleteOptions::new().force()).await.unwrap();
    assert!(store.is_empty("products"));

    // hard deletes of absent documents succeed
    repo.delete(a.id(), DeleteOptions::new().hard()).await.unwrap();
}

/// Test that deletes are hard when soft deletes are disabled.
#[tokio::test]
async fn test_delete_without_soft_deletes() {
    let mut config = products_config();
    config.use_soft_deletes = false;
    let (repo, store) = create_repository_with(config);

    let created = repo
        .create(product("SKU-1", 40), CreateOptions::default())
        .await
        .unwrap();
    assert_eq!(created.deleted_flag(), None);

    repo.delete(created.id(), DeleteOptions::default())
        .await
        .unwrap();
    assert!(store.is_empty("products"));
    assert!(repo
        .find_by_id(created.id(), FindByIdOptions::default())
        .await
        .unwrap()
        .is_none());
}

/// Test that keep_cache leaves a stale entry behind until invalidated.
#[tokio::test]
async fn test_delete_keep_cache() {
    let (repo, _store) = create_repository();
    let created = repo
        .create(product("SKU-1", 40), CreateOptions::default())
        .await
        .unwrap();

    repo.delete(created.id(), DeleteOptions::new().hard().keep_cache())
        .await
        .unwrap();
    assert!(repo
        .find_by_id(created.id(), FindByIdOptions::default())
        .await
        .unwrap()
        .is_some());

    assert!(repo.invalidate(created.id()));
    assert!(repo
        .find_by_id(created.id(), FindByIdOptions::default())
        .await
        .unwrap()
        .is_none());
}
