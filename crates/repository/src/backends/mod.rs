//! Document store implementations.
//!
//! Each backend implements [`DocumentStore`](crate::core::DocumentStore) and
//! is gated behind a feature flag.
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | Memory | `memory` | In-process store for tests and local development |

#[cfg(feature = "memory")]
pub mod memory;
