//! Organization-scoped view of a repository.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::core::store::Document;
use crate::core::transaction::{TransactionContext, TransactionOptions};
use crate::error::{RepositoryError, RepositoryResult, ValidationError};
use crate::repository::{
    BatchCreateOptions, BatchCreateOutcome, CreateOptions, DeleteOptions, FindByIdOptions,
    FindOptions, FindPage, Repository, UpdateOptions,
};
use crate::types::{EntityData, PaginatedResult, StoredEntity};

use super::id::{ORGANIZATION_FIELD, TenantId};

/// Wraps a [`Repository`] so every call sees only one organization's
/// entities.
///
/// Queries get an `organizationId == tenant` filter. Reads by ID of another
/// organization's entity behave as if the entity did not exist. Creates
/// stamp the organization onto the payload, which therefore must have an
/// `organizationId` field.
///
/// Cloning is cheap; clones share the underlying repository.
#[derive(Debug, Clone)]
pub struct TenantScopedRepository<T: EntityData> {
    inner: Arc<Repository<T>>,
    tenant: TenantId,
}

impl<T: EntityData> TenantScopedRepository<T> {
    /// Scopes `inner` to `tenant`.
    pub fn new(inner: Arc<Repository<T>>, tenant: TenantId) -> Self {
        Self { inner, tenant }
    }

    /// Returns the organization this view is scoped to.
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Returns the unscoped repository.
    pub fn inner(&self) -> &Arc<Repository<T>> {
        &self.inner
    }

    /// Returns a view of the same repository scoped to another organization.
    pub fn for_tenant(&self, tenant: TenantId) -> Self {
        Self::new(Arc::clone(&self.inner), tenant)
    }

    /// Reads an entity of this organization by ID.
    pub async fn find_by_id(
        &self,
        id: &str,
        options: FindByIdOptions,
    ) -> RepositoryResult<Option<StoredEntity<T>>> {
        let throw = options.throw_if_not_found;
        let lookup = FindByIdOptions {
            throw_if_not_found: false,
            ..options
        };
        let found = self
            .inner
            .find_by_id(id, lookup)
            .await?
            .filter(|entity| self.owns(entity));
        match found {
            None if throw => Err(RepositoryError::not_found(self.inner.collection(), id)),
            found => Ok(found),
        }
    }

    /// Returns `true` if this organization has a live entity with this ID.
    pub async fn exists(&self, id: &str) -> RepositoryResult<bool> {
        Ok(self
            .find_by_id(id, FindByIdOptions::default())
            .await?
            .is_some())
    }

    /// Reads several entities, skipping absent and foreign ones.
    pub async fn find_by_ids<S: AsRef<str>>(
        &self,
        ids: &[S],
        options: FindByIdOptions,
    ) -> RepositoryResult<Vec<StoredEntity<T>>> {
        let mut found = self.inner.find_by_ids(ids, options).await?;
        found.retain(|entity| self.owns(entity));
        Ok(found)
    }

    /// Runs a query restricted to this organization.
    pub async fn find(&self, options: FindOptions) -> RepositoryResult<Vec<StoredEntity<T>>> {
        self.inner.find(self.scope(options)).await
    }

    /// Returns the first matching entity of this organization.
    pub async fn find_one(&self, options: FindOptions) -> RepositoryResult<Option<StoredEntity<T>>> {
        self.inner.find_one(self.scope(options)).await
    }

    /// Runs a cursor-paged query restricted to this organization.
    pub async fn find_page(&self, options: FindOptions) -> RepositoryResult<FindPage<T>> {
        self.inner.find_page(self.scope(options)).await
    }

    /// Counts this organization's matching entities.
    pub async fn count(&self, options: FindOptions) -> RepositoryResult<u64> {
        self.inner.count(self.scope(options)).await
    }

    /// Returns one page of this organization's entities.
    pub async fn paginate(
        &self,
        page: u32,
        page_size: u32,
        options: FindOptions,
    ) -> RepositoryResult<PaginatedResult<StoredEntity<T>>> {
        self.inner
            .paginate(page, page_size, self.scope(options))
            .await
    }

    /// Creates an entity owned by this organization.
    pub async fn create(&self, data: T, options: CreateOptions) -> RepositoryResult<StoredEntity<T>> {
        let data = self.stamp(data)?;
        self.inner.create(data, options).await
    }

    /// Updates an entity of this organization. The patch may not move the
    /// entity to another organization.
    pub async fn update(
        &self,
        id: &str,
        patch: Document,
        options: UpdateOptions,
    ) -> RepositoryResult<StoredEntity<T>> {
        if let Some(value) = patch.get(ORGANIZATION_FIELD)
            && value.as_str() != Some(self.tenant.as_str())
        {
            return Err(ValidationError::InvalidEntity {
                collection: self.inner.collection().to_string(),
                message: format!("{} cannot be changed", ORGANIZATION_FIELD),
            }
            .into());
        }
        self.require(
            id,
            options.transaction.as_ref(),
            options.bypass_soft_delete_check,
        )
        .await?;
        self.inner.update(id, patch, options).await
    }

    /// Deletes an entity of this organization.
    pub async fn delete(&self, id: &str, options: DeleteOptions) -> RepositoryResult<()> {
        self.require(id, options.transaction.as_ref(), true).await?;
        self.inner.delete(id, options).await
    }

    /// Restores a soft-deleted entity of this organization.
    pub async fn restore(
        &self,
        id: &str,
        transaction: Option<&TransactionContext>,
    ) -> RepositoryResult<StoredEntity<T>> {
        self.require(id, transaction, true).await?;
        self.inner.restore(id, transaction).await
    }

    /// Creates many entities owned by this organization.
    pub async fn create_batch(
        &self,
        items: Vec<T>,
        options: BatchCreateOptions,
    ) -> RepositoryResult<Vec<StoredEntity<T>>> {
        let items = self.stamp_all(items)?;
        self.inner.create_batch(items, options).await
    }

    /// Like [`create_batch`](Self::create_batch), reporting per-chunk results.
    pub async fn create_batch_detailed(
        &self,
        items: Vec<T>,
        options: BatchCreateOptions,
    ) -> RepositoryResult<BatchCreateOutcome<T>> {
        let items = self.stamp_all(items)?;
        self.inner.create_batch_detailed(items, options).await
    }

    /// Runs `f` in a transaction of the underlying repository.
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
        self.inner.run_transaction(options, f).await
    }

    fn scope(&self, options: FindOptions) -> FindOptions {
        options.where_eq(ORGANIZATION_FIELD, self.tenant.as_str())
    }

    fn owns(&self, entity: &StoredEntity<T>) -> bool {
        self.owns_data(entity.data())
    }

    fn owns_data(&self, data: &T) -> bool {
        serde_json::to_value(data)
            .ok()
            .and_then(|value| {
                value
                    .get(ORGANIZATION_FIELD)
                    .and_then(Value::as_str)
                    .map(|org| org == self.tenant.as_str())
            })
            .unwrap_or(false)
    }

    async fn require(
        &self,
        id: &str,
        transaction: Option<&TransactionContext>,
        include_deleted: bool,
    ) -> RepositoryResult<StoredEntity<T>> {
        let options = FindByIdOptions {
            include_deleted,
            throw_if_not_found: true,
            transaction: transaction.cloned(),
            ..FindByIdOptions::default()
        };
        self.find_by_id(id, options)
            .await?
            .ok_or_else(|| RepositoryError::not_found(self.inner.collection(), id))
    }

    fn stamp_all(&self, items: Vec<T>) -> RepositoryResult<Vec<T>> {
        items.into_iter().map(|item| self.stamp(item)).collect()
    }

    /// Sets the organization field on a payload.
    fn stamp(&self, data: T) -> RepositoryResult<T> {
        let mut value = serde_json::to_value(&data)?;
        let Value::Object(fields) = &mut value else {
            return Err(self.missing_field());
        };
        fields.insert(
            ORGANIZATION_FIELD.to_string(),
            Value::String(self.tenant.as_str().to_string()),
        );

        let stamped: T = serde_json::from_value(value).map_err(|err| ValidationError::InvalidEntity {
            collection: self.inner.collection().to_string(),
            message: err.to_string(),
        })?;
        // a payload type without the field drops it on deserialization
        if !self.owns_data(&stamped) {
            return Err(self.missing_field());
        }
        Ok(stamped)
    }

    fn missing_field(&self) -> RepositoryError {
        ValidationError::InvalidEntity {
            collection: self.inner.collection().to_string(),
            message: format!("entity has no {} field", ORGANIZATION_FIELD),
        }
        .into()
    }
}
