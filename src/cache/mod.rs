//! Versioned response store for offline operation.
//!
//! This module provides the storage side of the interception layer:
//! - Named stores whose version tag is the only invalidation mechanism
//! - One immutable snapshot per resource key per store
//! - Manifest seeding on activation
//! - SQLite persistence, or a no-op backend when caching is disabled

mod manager;
mod storage;
mod types;

pub use manager::{SeedReport, StoreHandle, StoreManager};
pub use storage::{CacheStorage, NoopStorage, SqliteStorage};
pub use types::{Manifest, ResourceKey, Snapshot, StoreName};
