//! Write operations: create, update, delete, restore and batch creation.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::convert::{
    FIELD_CREATED_AT, FIELD_DELETED_AT, FIELD_IS_DELETED, FIELD_UPDATED_AT, FIELD_VERSION,
};
use crate::core::batch::{BatchStatus, WriteOp};
use crate::core::query::{Filter, Query};
use crate::core::store::{Document, StoreCapability, StoredDocument};
use crate::core::transaction::TransactionContext;
use crate::error::{BatchError, ConflictError, RepositoryError, RepositoryResult};
use crate::types::{EntityData, StoredEntity, timestamp};

use super::Repository;
use super::options::{
    BatchCreateOptions, BatchCreateOutcome, CreateOptions, DeleteOptions, UpdateOptions,
};

impl<T: EntityData> Repository<T> {
    /// Creates an entity.
    ///
    /// The ID is `custom_id` when given (fails with `AlreadyExists` if
    /// taken), otherwise generated by the store. Inside a transaction the
    /// returned entity is the locally built one and the cache is left alone.
    pub async fn create(&self, data: T, options: CreateOptions) -> RepositoryResult<StoredEntity<T>> {
        let result = self.create_inner(data, &options).await;
        self.observe("create", result)
    }

    async fn create_inner(&self, data: T, options: &CreateOptions) -> RepositoryResult<StoredEntity<T>> {
        let tx = options.transaction.as_ref();
        Self::check_transaction(tx)?;

        let id = match &options.custom_id {
            Some(id) => {
                self.validator.validate_id(id)?;
                id.clone()
            }
            None => self.store.generate_id(),
        };

        let fields = self.converter.payload_to_fields(&data)?;
        if options.validate_fields {
            self.validator.validate_required(&fields)?;
        }
        self.validator.validate_fields(&fields)?;

        if options.custom_id.is_some() && self.read_document(&id, tx).await?.is_some() {
            return Err(ConflictError::AlreadyExists {
                collection: self.config.collection.clone(),
                id,
            }
            .into());
        }
        self.check_unique(&fields, None, tx).await?;

        let entity = self.new_entity(id, data, options.initial_version);
        let stored = self.stored_fields(&entity, options.use_server_timestamp)?;
        self.write_set(entity.id(), stored, tx).await?;

        if let Some(tx) = tx {
            self.invalidate_on_commit(tx, entity.id());
            return Ok(entity);
        }
        let entity = if options.use_server_timestamp {
            // the store stamped the times; read them back
            let doc = self
                .read_document(entity.id(), None)
                .await?
                .ok_or_else(|| RepositoryError::not_found(self.collection(), entity.id()))?;
            self.converter.from_storage(doc)?
        } else {
            entity
        };
        if options.add_to_cache {
            self.cache.set(entity.clone());
        }
        Ok(entity)
    }

    /// Applies a partial update and returns the resulting entity.
    ///
    /// The patch is merged at the top level. `updatedAt` is stamped and,
    /// with versioning, `version` is bumped. Inside a transaction the
    /// returned entity is a local projection of the stored document plus the
    /// patch. Outside one, version checks and bumps run in an internal
    /// transaction so concurrent updates cannot share a version.
    pub async fn update(
        &self,
        id: &str,
        patch: Document,
        options: UpdateOptions,
    ) -> RepositoryResult<StoredEntity<T>> {
        let result = self.update_inner(id, patch, &options).await;
        self.observe("update", result)
    }

    /// Writes every field of `data` over the stored entity.
    pub async fn update_data(
        &self,
        id: &str,
        data: &T,
        options: UpdateOptions,
    ) -> RepositoryResult<StoredEntity<T>> {
        let result = match self.converter.payload_to_fields(data) {
            Ok(fields) => self.update_inner(id, fields, &options).await,
            Err(err) => Err(err),
        };
        self.observe("update", result)
    }

    async fn update_inner(
        &self,
        id: &str,
        patch: Document,
        options: &UpdateOptions,
    ) -> RepositoryResult<StoredEntity<T>> {
        self.validator.validate_id(id)?;
        let tx = options.transaction.as_ref();
        Self::check_transaction(tx)?;

        if let Some(tx) = tx {
            let projection = self.apply_update(id, patch, options, Some(tx)).await?;
            self.invalidate_on_commit(tx, id);
            return Ok(projection);
        }

        if self.needs_atomic_update(options) {
            // a concurrent write between the read and the commit aborts the
            // attempt, which then re-reads and re-checks the version
            let attempt = self
                .transactions
                .run(None, |ctx| {
                    let patch = patch.clone();
                    async move {
                        // only commit failures are retried
                        Ok::<_, RepositoryError>(self.apply_update(id, patch, options, Some(&ctx)).await)
                    }
                })
                .await?;
            attempt?;
        } else {
            self.apply_update(id, patch, options, None).await?;
        }

        let doc = self
            .read_document(id, None)
            .await?
            .ok_or_else(|| RepositoryError::not_found(self.collection(), id))?;
        let updated: StoredEntity<T> = self.converter.from_storage(doc)?;
        if options.invalidate_cache {
            self.cache.delete(id);
        } else {
            self.cache.set(updated.clone());
        }
        Ok(updated)
    }

    /// Returns `true` when the update checks or bumps the version and the
    /// store can run it in a transaction.
    fn needs_atomic_update(&self, options: &UpdateOptions) -> bool {
        let versioned = options.expected_version.is_some()
            || (self.config.use_versioning && options.increment_version);
        versioned && self.store.supports(StoreCapability::Transactions)
    }

    /// Reads the entity, checks the update against it and writes the
    /// changes. Returns the stored document merged with the changes.
    async fn apply_update(
        &self,
        id: &str,
        patch: Document,
        options: &UpdateOptions,
        tx: Option<&TransactionContext>,
    ) -> RepositoryResult<StoredEntity<T>> {
        let Some(existing_doc) = self.read_document(id, tx).await? else {
            return Err(RepositoryError::not_found(self.collection(), id));
        };
        let existing: StoredEntity<T> = self.converter.from_storage(existing_doc.clone())?;

        if !options.bypass_soft_delete_check {
            self.validator.ensure_not_deleted(&existing)?;
        }
        if let Some(expected) = options.expected_version {
            let actual = existing.version().unwrap_or(0);
            if actual != expected {
                return Err(ConflictError::VersionConflict {
                    collection: self.config.collection.clone(),
                    id: id.to_string(),
                    expected,
                    actual,
                }
                .into());
            }
        }

        let mut changes = self.converter.patch_to_fields(patch, options.sanitize_data);
        if self.config.use_versioning {
            changes.remove(FIELD_VERSION);
        }
        self.validator.validate_fields(&changes)?;

        let changed_unique: Document = changes
            .iter()
            .filter(|(field, value)| {
                self.config.unique_fields.contains(*field) && existing_doc.fields.get(*field) != Some(*value)
            })
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect();
        self.check_unique(&changed_unique, Some(id), tx).await?;

        changes.insert(FIELD_UPDATED_AT.to_string(), timestamp::encode(Utc::now()));
        if self.config.use_versioning && options.increment_version {
            let next = existing.version().unwrap_or(0) + 1;
            changes.insert(FIELD_VERSION.to_string(), Value::from(next));
        }

        let mut merged = existing_doc.fields;
        merged.extend(changes.clone());
        let projection: StoredEntity<T> = self.converter.from_storage(StoredDocument::new(id, merged))?;

        self.write_update(id, changes, tx).await?;
        Ok(projection)
    }

    /// Deletes an entity.
    ///
    /// With soft deletes enabled (and neither `hard` nor `force` requested)
    /// the entity is marked deleted; a missing entity fails with `NotFound`
    /// and an already deleted one is left unchanged. A hard delete removes
    /// the document and succeeds whether or not it existed.
    pub async fn delete(&self, id: &str, options: DeleteOptions) -> RepositoryResult<()> {
        let result = self.delete_inner(id, &options).await;
        self.observe("delete", result)
    }

    async fn delete_inner(&self, id: &str, options: &DeleteOptions) -> RepositoryResult<()> {
        self.validator.validate_id(id)?;
        let tx = options.transaction.as_ref();
        Self::check_transaction(tx)?;

        let soft = self.config.use_soft_deletes && options.soft_delete != Some(false) && !options.force;
        if soft {
            let Some(doc) = self.read_document(id, tx).await? else {
                return Err(RepositoryError::not_found(self.collection(), id));
            };
            let already_deleted = doc
                .fields
                .get(FIELD_IS_DELETED)
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if !already_deleted {
                let now = timestamp::encode(Utc::now());
                let mut changes = Document::new();
                changes.insert(FIELD_IS_DELETED.to_string(), Value::Bool(true));
                changes.insert(FIELD_DELETED_AT.to_string(), now.clone());
                changes.insert(FIELD_UPDATED_AT.to_string(), now);
                self.write_update(id, changes, tx).await?;
            }
        } else {
            self.write_delete(id, tx).await?;
        }

        match tx {
            Some(tx) => self.invalidate_on_commit(tx, id),
            None if options.clear_cache => {
                self.cache.delete(id);
            }
            None => {}
        }
        Ok(())
    }

    /// Clears the soft-delete markers of an entity.
    pub async fn restore(
        &self,
        id: &str,
        transaction: Option<&TransactionContext>,
    ) -> RepositoryResult<StoredEntity<T>> {
        let mut patch = Document::new();
        patch.insert(FIELD_IS_DELETED.to_string(), Value::Bool(false));
        patch.insert(FIELD_DELETED_AT.to_string(), Value::Null);

        let mut options = UpdateOptions::new().bypass_soft_delete_check().raw();
        options.transaction = transaction.cloned();
        let result = self.update_inner(id, patch, &options).await;
        self.observe("restore", result)
    }

    /// Creates many entities with store-generated IDs in atomic chunks.
    ///
    /// Fails with [`BatchError::ChunkFailed`] if any chunk failed, even
    /// though earlier chunks may have been committed; the error carries the
    /// full [`BatchResult`]. Use
    /// [`create_batch_detailed`](Self::create_batch_detailed) to get the
    /// result without an error.
    pub async fn create_batch(
        &self,
        items: Vec<T>,
        options: BatchCreateOptions,
    ) -> RepositoryResult<Vec<StoredEntity<T>>> {
        let result = match self.create_batch_inner(self.with_generated_ids(items), &options).await {
            Ok(outcome) => Self::raise_first_error(outcome),
            Err(err) => Err(err),
        };
        self.observe("create_batch", result)
    }

    /// Creates many entities and reports the per-chunk outcome instead of
    /// failing on chunk errors. Input validation errors still fail the call.
    pub async fn create_batch_detailed(
        &self,
        items: Vec<T>,
        options: BatchCreateOptions,
    ) -> RepositoryResult<BatchCreateOutcome<T>> {
        let result = self
            .create_batch_inner(self.with_generated_ids(items), &options)
            .await;
        self.observe("create_batch", result)
    }

    /// Like [`create_batch_detailed`](Self::create_batch_detailed) with
    /// caller-supplied IDs. Existing documents with these IDs are
    /// overwritten.
    pub async fn create_batch_with_ids(
        &self,
        items: Vec<(String, T)>,
        options: BatchCreateOptions,
    ) -> RepositoryResult<BatchCreateOutcome<T>> {
        let result = match items
            .iter()
            .try_for_each(|(id, _)| self.validator.validate_id(id))
        {
            Ok(()) => self.create_batch_inner(items, &options).await,
            Err(err) => Err(err.into()),
        };
        self.observe("create_batch", result)
    }

    fn with_generated_ids(&self, items: Vec<T>) -> Vec<(String, T)> {
        items
            .into_iter()
            .map(|item| (self.store.generate_id(), item))
            .collect()
    }

    async fn create_batch_inner(
        &self,
        items: Vec<(String, T)>,
        options: &BatchCreateOptions,
    ) -> RepositoryResult<BatchCreateOutcome<T>> {
        self.validator.validate_batch_size(items.len())?;

        let mut entities = Vec::with_capacity(items.len());
        let mut ops = Vec::with_capacity(items.len());
        for (id, data) in items {
            let fields = self.converter.payload_to_fields(&data)?;
            if options.validate_fields {
                self.validator.validate_required(&fields)?;
            }
            self.validator.validate_fields(&fields)?;

            let entity = self.new_entity(id, data, options.initial_version);
            let stored = self.stored_fields(&entity, options.use_server_timestamp)?;
            ops.push(WriteOp::Set {
                id: entity.id().to_string(),
                data: stored,
            });
            entities.push(entity);
        }

        let chunk_size = options
            .chunk_size
            .unwrap_or_else(|| self.batches.chunk_size())
            .max(1);
        let result = self
            .batches
            .execute_multi_batch(&self.config.collection, ops, Some(chunk_size))
            .await;
        self.stats.record_writes(result.documents_written as u64);

        let committed: Vec<StoredEntity<T>> = entities
            .into_iter()
            .enumerate()
            .filter(|(index, _)| !result.is_failed(*index, chunk_size))
            .map(|(_, entity)| entity)
            .collect();

        if result.status != BatchStatus::Error && options.add_to_cache && !options.use_server_timestamp {
            for entity in &committed {
                self.cache.set(entity.clone());
            }
        }

        Ok(BatchCreateOutcome {
            result,
            entities: committed,
        })
    }

    fn raise_first_error(outcome: BatchCreateOutcome<T>) -> RepositoryResult<Vec<StoredEntity<T>>> {
        let Some(first) = outcome.result.first_error() else {
            return Ok(outcome.entities);
        };
        Err(BatchError::ChunkFailed {
            index: first.index,
            source: Arc::clone(&first.error),
            result: Box::new(outcome.result.clone()),
        }
        .into())
    }

    // ── Write helpers ───────────────────────────────────────────────────

    /// Builds a new entity stamped with the local clock and the configured
    /// soft-delete and version metadata.
    fn new_entity(&self, id: String, data: T, initial_version: Option<u64>) -> StoredEntity<T> {
        let mut entity = StoredEntity::new(id, data, Utc::now());
        if self.config.use_soft_deletes {
            entity = entity.with_deleted_flag(false);
        }
        if self.config.use_versioning {
            entity = entity.with_version(initial_version.unwrap_or(1));
        }
        entity
    }

    fn stored_fields(&self, entity: &StoredEntity<T>, server_timestamp: bool) -> RepositoryResult<Document> {
        let mut fields = self.converter.to_storage(entity)?;
        if server_timestamp {
            let token = self.store.server_timestamp();
            fields.insert(FIELD_CREATED_AT.to_string(), token.clone());
            fields.insert(FIELD_UPDATED_AT.to_string(), token);
        }
        Ok(fields)
    }

    /// Fails with `DuplicateKey` if a live entity other than `exclude_id`
    /// already holds one of the unique values in `fields`.
    async fn check_unique(
        &self,
        fields: &Document,
        exclude_id: Option<&str>,
        tx: Option<&TransactionContext>,
    ) -> RepositoryResult<()> {
        for field in &self.config.unique_fields {
            let Some(value) = fields.get(field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }

            let mut query = Query::new()
                .filter(Filter::eq(field.clone(), value.clone()))
                .limit(2);
            if self.config.use_soft_deletes {
                query = query.filter(Filter::eq(FIELD_IS_DELETED, false));
            }
            let docs = match tx {
                Some(tx) => tx.query(&self.config.collection, &query).await?,
                None => self.store.query(&self.config.collection, &query).await?,
            };
            self.stats.record_reads(docs.len().max(1) as u64);

            if docs.iter().any(|doc| Some(doc.id.as_str()) != exclude_id) {
                return Err(ConflictError::DuplicateKey {
                    collection: self.config.collection.clone(),
                    field: field.clone(),
                    value: match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    },
                }
                .into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryStore;
    use crate::config::RepositoryConfig;
    use crate::core::batch::{BatchItemError, BatchResult};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sku {
        code: String,
    }

    #[tokio::test]
    async fn test_raise_first_error_keeps_result() {
        let mut result = BatchResult {
            status: BatchStatus::Partial,
            success_count: 1,
            error_count: 1,
            written_count: 1,
            documents_written: 2,
            errors: Vec::new(),
        };
        result.errors.push(BatchItemError {
            index: 2,
            id: Some("s-3".to_string()),
            error: Arc::new(RepositoryError::internal("memory", "boom")),
        });
        let outcome = BatchCreateOutcome::<Sku> {
            result,
            entities: Vec::new(),
        };

        let err = Repository::<Sku>::raise_first_error(outcome).unwrap_err();
        match err {
            RepositoryError::Batch(BatchError::ChunkFailed { index, result, .. }) => {
                assert_eq!(index, 2);
                assert_eq!(result.success_count, 1);
                assert_eq!(result.status, BatchStatus::Partial);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_new_entity_metadata_follows_config() {
        let config = RepositoryConfig::builder("skus")
            .versioning(false)
            .cache(false)
            .build()
            .unwrap();
        let repo: Repository<Sku> = Repository::new(Arc::new(MemoryStore::new()), config).unwrap();

        let entity = repo.new_entity("s-1".to_string(), Sku { code: "A".into() }, Some(9));
        assert_eq!(entity.deleted_flag(), Some(false));
        assert_eq!(entity.version(), None);
    }
}
