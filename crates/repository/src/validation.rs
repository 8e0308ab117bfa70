//! Structural input checks.
//!
//! Everything here is synchronous and deterministic: a failing check is
//! reported as a [`ValidationError`] (or a [`StateError`] for the
//! soft-delete guard) and is never retried.

use serde_json::Value;

use crate::config::RepositoryConfig;
use crate::core::batch::BatchConfig;
use crate::core::query::Filter;
use crate::core::store::{Document, is_server_timestamp};
use crate::error::{StateError, ValidationError};
use crate::types::StoredEntity;

/// Maximum length of a document ID, in bytes.
pub const MAX_ID_BYTES: usize = 1500;

/// Largest accepted page size.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Input validator for one repository.
#[derive(Debug, Clone)]
pub struct Validator {
    collection: String,
    required_fields: Vec<String>,
    batch: BatchConfig,
}

impl Validator {
    /// Creates a validator for the repository described by `config`.
    pub fn new(config: &RepositoryConfig) -> Self {
        Self {
            collection: config.collection.clone(),
            required_fields: config.required_fields.clone(),
            batch: config.batch.clone(),
        }
    }

    /// Checks that `id` can address a document.
    ///
    /// IDs must be non-empty, at most [`MAX_ID_BYTES`] long, free of `/`,
    /// not `.` or `..`, and not of the reserved `__name__` form.
    pub fn validate_id(&self, id: &str) -> Result<(), ValidationError> {
        let reason = if id.trim().is_empty() {
            Some("must not be empty")
        } else if id.len() > MAX_ID_BYTES {
            Some("exceeds 1500 bytes")
        } else if id.contains('/') {
            Some("must not contain '/'")
        } else if id == "." || id == ".." {
            Some("must not be '.' or '..'")
        } else if is_reserved_name(id) {
            Some("names of the form __name__ are reserved")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(ValidationError::InvalidId {
                id: truncate_for_display(id),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Turns arbitrary text into a usable document ID: keeps ASCII
    /// alphanumerics, `-` and `_`, and truncates to [`MAX_ID_BYTES`].
    ///
    /// ```
    /// use docstore_repository::Validator;
    ///
    /// assert_eq!(Validator::sanitize_id("makro:SKU 42/b"), "makroSKU42b");
    /// ```
    pub fn sanitize_id(raw: &str) -> String {
        raw.chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .take(MAX_ID_BYTES)
            .collect()
    }

    /// Checks that every required field is present and not null.
    pub fn validate_required(&self, fields: &Document) -> Result<(), ValidationError> {
        for field in &self.required_fields {
            match fields.get(field) {
                None | Some(Value::Null) => {
                    return Err(ValidationError::MissingRequiredField {
                        field: field.clone(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Checks field names and values the store cannot persist.
    pub fn validate_fields(&self, fields: &Document) -> Result<(), ValidationError> {
        for (name, value) in fields {
            check_field(name, value, name)?;
        }
        Ok(())
    }

    /// Rejects soft-deleted entities.
    pub fn ensure_not_deleted<T>(&self, entity: &StoredEntity<T>) -> Result<(), StateError> {
        if entity.is_deleted() {
            return Err(StateError::Deleted {
                collection: self.collection.clone(),
                id: entity.id().to_string(),
            });
        }
        Ok(())
    }

    /// Checks a batch size against the configured bounds.
    pub fn validate_batch_size(&self, size: usize) -> Result<(), ValidationError> {
        self.batch.check_size(size)
    }

    /// Checks page-number pagination arguments.
    pub fn validate_pagination(&self, page: u32, page_size: u32) -> Result<(), ValidationError> {
        if page == 0 {
            return Err(ValidationError::InvalidPagination {
                message: "page numbers start at 1".to_string(),
            });
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(ValidationError::InvalidPagination {
                message: format!("page size must be between 1 and {}", MAX_PAGE_SIZE),
            });
        }
        Ok(())
    }

    /// Checks every filter's operand shape.
    pub fn validate_filters(&self, filters: &[Filter]) -> Result<(), ValidationError> {
        filters.iter().try_for_each(Filter::validate)
    }
}

fn is_reserved_name(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

fn check_field(name: &str, value: &Value, path: &str) -> Result<(), ValidationError> {
    if name.is_empty() || is_reserved_name(name) {
        return Err(ValidationError::ReservedField {
            field: path.to_string(),
        });
    }
    match value {
        Value::Object(map) if !is_server_timestamp(value) => {
            for (child, child_value) in map {
                check_field(child, child_value, &format!("{}.{}", path, child))?;
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                check_array_item(item, &format!("{}[{}]", path, index))?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn check_array_item(value: &Value, path: &str) -> Result<(), ValidationError> {
    if is_server_timestamp(value) {
        return Err(ValidationError::UnstorableValue {
            path: path.to_string(),
            reason: "server timestamps cannot be placed inside arrays".to_string(),
        });
    }
    match value {
        Value::Array(_) => Err(ValidationError::UnstorableValue {
            path: path.to_string(),
            reason: "nested arrays are not supported".to_string(),
        }),
        Value::Object(map) => {
            for (child, child_value) in map {
                check_field(child, child_value, &format!("{}.{}", path, child))?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn truncate_for_display(id: &str) -> String {
    id.chars().take(64).collect()
}
