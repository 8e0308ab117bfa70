//! Pagination types.
//!
//! Two styles are supported: page-number pagination through
//! [`Repository::paginate`](crate::Repository::paginate), which returns a
//! [`PaginatedResult`], and cursor pagination through [`PageCursor`] values
//! passed as `start_after` / `end_before` in a query.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// An opaque cursor for keyset pagination.
///
/// The cursor holds the values of the ordering fields at a position in the
/// result set, plus the document ID used as the final tie-breaker. Cursors
/// encode to URL-safe base64 JSON so they can be handed to API clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageCursor {
    /// Cursor format version.
    version: u8,

    /// Values of the ordering fields at the cursor position.
    values: Vec<Value>,

    /// Document ID at the cursor position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    document_id: Option<String>,
}

impl PageCursor {
    /// Creates a cursor from ordering values only.
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            version: 1,
            values,
            document_id: None,
        }
    }

    /// Creates a cursor positioned at a specific document.
    pub fn at_document(values: Vec<Value>, document_id: impl Into<String>) -> Self {
        Self {
            version: 1,
            values,
            document_id: Some(document_id.into()),
        }
    }

    /// Returns the ordering values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns the tie-breaking document ID.
    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    /// Encodes the cursor to an opaque string.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(&json)
    }

    /// Decodes a cursor from an opaque string.
    pub fn decode(s: &str) -> Result<Self, ValidationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|_| ValidationError::InvalidCursor {
                cursor: s.to_string(),
            })?;

        serde_json::from_slice(&bytes).map_err(|_| ValidationError::InvalidCursor {
            cursor: s.to_string(),
        })
    }
}

/// One page of results from page-number pagination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResult<T> {
    /// The items on this page.
    pub items: Vec<T>,
    /// Total number of matching items.
    pub total: u64,
    /// The 1-based page number.
    pub page: u32,
    /// The requested page size.
    pub page_size: u32,
    /// Number of pages needed for `total` items.
    pub total_pages: u32,
    /// Whether a page follows this one.
    pub has_next: bool,
    /// Whether a page precedes this one.
    pub has_previous: bool,
}

impl<T> PaginatedResult<T> {
    /// Builds a page and derives the navigation fields from `total`.
    pub fn new(items: Vec<T>, total: u64, page: u32, page_size: u32) -> Self {
        let total_pages = if page_size == 0 {
            0
        } else {
            total.div_ceil(u64::from(page_size)) as u32
        };
        Self {
            items,
            total,
            page,
            page_size,
            total_pages,
            has_next: page < total_pages,
            has_previous: page > 1,
        }
    }

    /// Returns true if this page has no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the number of items on this page.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Maps the items to a different type.
    pub fn map<U, F>(self, f: F) -> PaginatedResult<U>
    where
        F: FnMut(T) -> U,
    {
        PaginatedResult {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
            has_next: self.has_next,
            has_previous: self.has_previous,
        }
    }
}
