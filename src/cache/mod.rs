//! Versioned response cache with offline support.
//!
//! This module provides:
//! - A namespace manager that owns the current `name + version` namespace
//! - A codec that stores cross-origin bodies base64 encoded and static/same-origin bodies verbatim
//! - Cache-first, network-first and cache-only read strategies
//! - A SQLite-backed store holding any number of namespaces

mod codec;
mod key;
mod layer;
mod namespace;
mod storage;
mod traits;

pub use codec::ResponseCodec;
pub use key::RequestKey;
pub use layer::CacheLayer;
pub use namespace::NamespaceManager;
pub use storage::{CacheStore, SqliteCacheStore};
pub use traits::{
  BodyEncoding, CacheEntry, CacheWrite, CachedResponse, ResponseSource, Served, StoredResponse,
};
