//! Owner-partitioned caching layer for offline support.
//!
//! This module provides:
//! - Deterministic scope keys from a resource name plus parameters
//! - A SQLite-backed store partitioned by owner identity
//! - A cache-aside coordinator that serves stale data offline or when the
//!   network fails

mod layer;
mod scope;
mod storage;
mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use layer::{CacheLayer, DEFAULT_REQUEST_TIMEOUT};
pub use scope::{serialize_scope, Scope, ScopeBuilder};
pub use storage::{CacheStore, CachedPayload, SqliteStorage};
pub use traits::{CacheResult, CacheSource, Connectivity, NetworkStatus};
