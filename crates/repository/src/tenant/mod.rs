//! Per-organization scoping.
//!
//! Multi-tenant collections keep every organization's entities side by side
//! and tell them apart by an `organizationId` field. A
//! [`TenantScopedRepository`] wraps a shared [`Repository`](crate::Repository)
//! and applies that field to every call, so code holding the scoped view
//! cannot read or write another organization's entities.
//!
//! ```ignore
//! let shared = Arc::new(Repository::<Product>::new(store, config)?);
//! let acme = TenantScopedRepository::new(Arc::clone(&shared), TenantId::new("org-acme"));
//!
//! acme.create(product, Default::default()).await?;
//! assert_eq!(acme.count(Default::default()).await?, 1);
//! ```

mod id;
mod scoped;

pub use id::{ORGANIZATION_FIELD, TenantId};
pub use scoped::TenantScopedRepository;
