//! Core value types for the repository engine.
//!
//! - [`StoredEntity`] - a domain value with identity, timestamps, soft-delete and version metadata
//! - [`WireTimestamp`] - the timestamp shapes a document store may return
//! - [`PageCursor`], [`PaginatedResult`] - pagination types
//!
//! # Pagination
//!
//! ```
//! use docstore_repository::types::PageCursor;
//! use serde_json::json;
//!
//! let cursor = PageCursor::at_document(vec![json!("SKU-010")], "p-10");
//! let encoded = cursor.encode();
//! let decoded = PageCursor::decode(&encoded).unwrap();
//! assert_eq!(decoded.document_id(), Some("p-10"));
//! ```

mod entity;
mod pagination;
pub mod timestamp;

pub use entity::{EntityData, StoredEntity};
pub use pagination::{PageCursor, PaginatedResult};
pub use timestamp::WireTimestamp;
