//! Stored entity types.
//!
//! [`StoredEntity`] wraps a domain value with the metadata the repository
//! engine maintains: identity, timestamps, soft-delete markers and version.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Bounds every entity payload must satisfy.
///
/// Blanket-implemented; domain types only need the usual serde derives plus
/// `Clone`.
pub trait EntityData: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> EntityData for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// A domain entity with persistence metadata.
///
/// - **Identity**: `id` is assigned at creation and never changes
/// - **Timestamps**: `created_at` / `updated_at`, stamped by the engine
/// - **Soft delete**: `is_deleted` / `deleted_at`, present when the collection uses soft deletes
/// - **Versioning**: `version`, present when the collection uses optimistic versioning
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use docstore_repository::types::StoredEntity;
/// use serde_json::json;
///
/// let entity = StoredEntity::new("wh-1", json!({"name": "Main warehouse"}), Utc::now());
/// assert_eq!(entity.id(), "wh-1");
/// assert!(!entity.is_deleted());
/// assert_eq!(entity.version(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntity<T> {
    id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    is_deleted: Option<bool>,
    deleted_at: Option<DateTime<Utc>>,
    version: Option<u64>,
    data: T,
}

impl<T> StoredEntity<T> {
    /// Creates an entity with both timestamps set to `now` and no
    /// soft-delete or version metadata.
    pub fn new(id: impl Into<String>, data: T, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            is_deleted: None,
            deleted_at: None,
            version: None,
            data,
        }
    }

    /// Reassembles an entity from decoded storage fields.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: impl Into<String>,
        data: T,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        is_deleted: Option<bool>,
        deleted_at: Option<DateTime<Utc>>,
        version: Option<u64>,
    ) -> Self {
        Self {
            id: id.into(),
            created_at,
            updated_at,
            is_deleted,
            deleted_at,
            version,
            data,
        }
    }

    /// Sets the soft-delete flag (builder style).
    pub fn with_deleted_flag(mut self, is_deleted: bool) -> Self {
        self.is_deleted = Some(is_deleted);
        self
    }

    /// Sets the version (builder style).
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Returns the entity ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns when the entity was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the entity was last modified.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns `true` if the entity is soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.is_deleted.unwrap_or(false)
    }

    /// Returns the raw soft-delete flag (`None` when the collection does not
    /// use soft deletes).
    pub fn deleted_flag(&self) -> Option<bool> {
        self.is_deleted
    }

    /// Returns when the entity was soft-deleted.
    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    /// Returns the version, when versioning is enabled.
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// Returns the domain payload.
    pub fn data(&self) -> &T {
        &self.data
    }

    /// Consumes the entity and returns the payload.
    pub fn into_data(self) -> T {
        self.data
    }

    /// Maps the payload to a different type, keeping the metadata.
    pub fn map<U, F>(self, f: F) -> StoredEntity<U>
    where
        F: FnOnce(T) -> U,
    {
        StoredEntity {
            id: self.id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            is_deleted: self.is_deleted,
            deleted_at: self.deleted_at,
            version: self.version,
            data: f(self.data),
        }
    }
}
