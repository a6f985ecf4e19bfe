//! Durable named caches backing the worker.
//!
//! This module provides:
//! - Named key/value caches of HTTP responses persisted in SQLite
//! - Cache-first and network-first fetch strategies over those caches
//! - Generation naming and the activation sweep of stale generations

mod generation;
mod layer;
mod storage;
mod traits;

pub use generation::CacheGeneration;
pub use layer::CacheLayer;
pub use storage::{CacheStorage, NoopStorage, SqliteStorage};
pub use traits::{CacheHandle, CacheResult, CacheSource, CachedEntry};
