//! Mapping between stored documents and typed entities.
//!
//! On write, the entity payload is serialized to a field map, internal-only
//! fields are stripped, configured date fields are stored as native
//! timestamps, and the metadata fields are added. On read, every timestamp
//! shape the store may return is decoded once, native timestamps inside the
//! payload become RFC 3339 strings, and the remaining fields are
//! deserialized into `T`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::config::RepositoryConfig;
use crate::core::store::{Document, StoredDocument};
use crate::error::{RepositoryResult, ValidationError};
use crate::types::timestamp;
use crate::types::{EntityData, StoredEntity};

/// Creation time field.
pub const FIELD_CREATED_AT: &str = "createdAt";
/// Last modification time field.
pub const FIELD_UPDATED_AT: &str = "updatedAt";
/// Soft-delete flag field.
pub const FIELD_IS_DELETED: &str = "isDeleted";
/// Soft-delete time field.
pub const FIELD_DELETED_AT: &str = "deletedAt";
/// Optimistic version field.
pub const FIELD_VERSION: &str = "version";
/// The document ID, which lives outside the field map.
pub const FIELD_ID: &str = "id";

/// Fields the engine owns.
pub const METADATA_FIELDS: [&str; 5] = [
    FIELD_CREATED_AT,
    FIELD_UPDATED_AT,
    FIELD_IS_DELETED,
    FIELD_DELETED_AT,
    FIELD_VERSION,
];

/// Returns `true` for fields that must never be written from a payload:
/// the ID, the metadata fields and anything prefixed with `__`.
pub fn is_internal_field(name: &str) -> bool {
    name == FIELD_ID || name.starts_with("__") || METADATA_FIELDS.contains(&name)
}

/// Removes internal-only fields. Idempotent.
pub fn sanitize(mut fields: Document) -> Document {
    fields.retain(|name, _| !is_internal_field(name));
    fields
}

/// Converts entities to documents and back.
#[derive(Debug, Clone)]
pub struct EntityConverter {
    collection: String,
    soft_deletes: bool,
    versioning: bool,
    date_fields: Vec<String>,
}

impl EntityConverter {
    /// Creates a converter for the repository described by `config`.
    pub fn new(config: &RepositoryConfig) -> Self {
        Self {
            collection: config.collection.clone(),
            soft_deletes: config.use_soft_deletes,
            versioning: config.use_versioning,
            date_fields: config.date_fields.clone(),
        }
    }

    /// Serializes a payload to a sanitized field map.
    pub fn payload_to_fields<T: EntityData>(&self, data: &T) -> RepositoryResult<Document> {
        match serde_json::to_value(data)? {
            Value::Object(fields) => Ok(self.encode_dates(sanitize(fields))),
            other => Err(ValidationError::InvalidEntity {
                collection: self.collection.clone(),
                message: format!("payload must serialize to an object, got {}", kind(&other)),
            }
            .into()),
        }
    }

    /// Prepares a partial update: optionally sanitizes it and stores date
    /// fields as native timestamps.
    pub fn patch_to_fields(&self, patch: Document, sanitize_fields: bool) -> Document {
        let patch = if sanitize_fields { sanitize(patch) } else { patch };
        self.encode_dates(patch)
    }

    /// Converts an entity to its stored representation.
    pub fn to_storage<T: EntityData>(&self, entity: &StoredEntity<T>) -> RepositoryResult<Document> {
        let mut fields = self.payload_to_fields(entity.data())?;

        fields.insert(
            FIELD_CREATED_AT.to_string(),
            timestamp::encode(entity.created_at()),
        );
        fields.insert(
            FIELD_UPDATED_AT.to_string(),
            timestamp::encode(entity.updated_at()),
        );
        if self.soft_deletes || entity.deleted_flag().is_some() {
            fields.insert(
                FIELD_IS_DELETED.to_string(),
                Value::Bool(entity.is_deleted()),
            );
        }
        if let Some(deleted_at) = entity.deleted_at() {
            fields.insert(FIELD_DELETED_AT.to_string(), timestamp::encode(deleted_at));
        }
        if let Some(version) = entity.version() {
            fields.insert(FIELD_VERSION.to_string(), Value::from(version));
        } else if self.versioning {
            fields.insert(FIELD_VERSION.to_string(), Value::from(1u64));
        }

        Ok(fields)
    }

    /// Converts a stored document to an entity.
    pub fn from_storage<T: EntityData>(&self, doc: StoredDocument) -> RepositoryResult<StoredEntity<T>> {
        let StoredDocument { id, mut fields } = doc;

        let created_at = fields.get(FIELD_CREATED_AT).and_then(timestamp::decode);
        let updated_at = fields.get(FIELD_UPDATED_AT).and_then(timestamp::decode);
        let (created_at, updated_at) = match (created_at, updated_at) {
            (Some(c), Some(u)) => (c, u),
            (Some(c), None) => (c, c),
            (None, Some(u)) => (u, u),
            (None, None) => (DateTime::<Utc>::UNIX_EPOCH, DateTime::<Utc>::UNIX_EPOCH),
        };

        let is_deleted = match fields.get(FIELD_IS_DELETED).and_then(Value::as_bool) {
            Some(flag) => Some(flag),
            None if self.soft_deletes => Some(false),
            None => None,
        };
        let deleted_at = fields.get(FIELD_DELETED_AT).and_then(timestamp::decode);
        let version = fields.get(FIELD_VERSION).and_then(Value::as_u64);

        for name in &self.date_fields {
            if let Some(value) = fields.get_mut(name)
                && let Some(dt) = timestamp::decode(value)
            {
                *value = Value::String(rfc3339(dt));
            }
        }
        let mut payload = sanitize(std::mem::take(&mut fields));
        for value in payload.values_mut() {
            normalize_timestamps(value);
        }

        let data: T = serde_json::from_value(Value::Object(payload)).map_err(|err| {
            ValidationError::InvalidEntity {
                collection: self.collection.clone(),
                message: format!("document {}: {}", id, err),
            }
        })?;

        Ok(StoredEntity::from_parts(
            id, data, created_at, updated_at, is_deleted, deleted_at, version,
        ))
    }

    fn encode_dates(&self, mut fields: Document) -> Document {
        for name in &self.date_fields {
            if let Some(value) = fields.get_mut(name)
                && !timestamp::is_native(value)
                && let Some(dt) = timestamp::decode(value)
            {
                *value = timestamp::encode(dt);
            }
        }
        fields
    }
}

fn rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn normalize_timestamps(value: &mut Value) {
    if timestamp::is_native(value) {
        if let Some(dt) = timestamp::decode(value) {
            *value = Value::String(rfc3339(dt));
        }
        return;
    }
    match value {
        Value::Object(map) => map.values_mut().for_each(normalize_timestamps),
        Value::Array(items) => items.iter_mut().for_each(normalize_timestamps),
        _ => {}
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Credential {
        name: String,
        expires_on: DateTime<Utc>,
        scopes: Vec<String>,
    }

    fn converter() -> EntityConverter {
        let config = RepositoryConfig::builder("credentials")
            .date_fields(["expires_on"])
            .build()
            .unwrap();
        EntityConverter::new(&config)
    }

    fn credential() -> Credential {
        Credential {
            name: "marketplace-api".to_string(),
            expires_on: Utc.timestamp_opt(1_800_000_000, 250_000_000).unwrap(),
            scopes: vec!["read".to_string()],
        }
    }

    #[test]
    fn test_round_trip() {
        let converter = converter();
        let now = Utc.timestamp_opt(1_700_000_000, 123).unwrap();
        let entity = StoredEntity::new("c-1", credential(), now)
            .with_deleted_flag(false)
            .with_version(4);

        let fields = converter.to_storage(&entity).unwrap();
        assert!(timestamp::is_native(&fields["expires_on"]));
        assert!(timestamp::is_native(&fields[FIELD_CREATED_AT]));

        let back: StoredEntity<Credential> = converter
            .from_storage(StoredDocument::new("c-1", fields))
            .unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn test_internal_fields_stripped_on_write() {
        let converter = converter();
        let mut patch = Document::new();
        patch.insert("id".to_string(), json!("other"));
        patch.insert("__trace__".to_string(), json!(1));
        patch.insert("version".to_string(), json!(99));
        patch.insert("name".to_string(), json!("renamed"));

        let once = converter.patch_to_fields(patch, true);
        assert_eq!(once.keys().collect::<Vec<_>>(), vec!["name"]);
        assert_eq!(sanitize(once.clone()), once);
    }

    #[test]
    fn test_decodes_every_timestamp_shape() {
        let converter = converter();
        let fields: Document = serde_json::from_value(json!({
            "name": "legacy",
            "expires_on": "2027-01-15T10:30:00Z",
            "scopes": [],
            "createdAt": 1_705_314_600_000i64,
            "updatedAt": {"_seconds": 1_705_314_700, "_nanoseconds": 0},
        }))
        .unwrap();

        let entity: StoredEntity<Credential> = converter
            .from_storage(StoredDocument::new("c-2", fields))
            .unwrap();
        assert_eq!(entity.created_at().timestamp(), 1_705_314_600);
        assert_eq!(entity.updated_at().timestamp(), 1_705_314_700);
        assert_eq!(entity.data().expires_on.timestamp(), 1_800_009_000);
        // soft deletes on, flag absent
        assert_eq!(entity.deleted_flag(), Some(false));
        assert_eq!(entity.version(), None);
    }

    #[test]
    fn test_non_object_payload_rejected() {
        let converter = converter();
        let err = converter.payload_to_fields(&vec![1, 2, 3]).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_mismatched_document_is_invalid_entity() {
        let converter = converter();
        let fields: Document = serde_json::from_value(json!({"name": 5})).unwrap();
        let result = converter.from_storage::<Credential>(StoredDocument::new("c-3", fields));
        assert!(matches!(
            result,
            Err(crate::error::RepositoryError::Validation(
                ValidationError::InvalidEntity { .. }
            ))
        ));
    }
}
