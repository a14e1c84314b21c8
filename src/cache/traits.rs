//! Core types for the response cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::key::RequestKey;
use crate::http::{Headers, Method, Response};

/// How a stored body is represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
  /// Bytes exactly as received
  Raw,
  /// Standard base64 of the received bytes
  Base64,
}

impl BodyEncoding {
  pub fn as_str(self) -> &'static str {
    match self {
      BodyEncoding::Raw => "raw",
      BodyEncoding::Base64 => "base64",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "raw" => Some(BodyEncoding::Raw),
      "base64" => Some(BodyEncoding::Base64),
      _ => None,
    }
  }
}

/// A response as it sits in the cache store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
  pub status: u16,
  /// Copied verbatim from the network response
  pub headers: Headers,
  pub body: Vec<u8>,
  pub encoding: BodyEncoding,
}

/// One request -> response pair, ready to be written.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub key: RequestKey,
  pub method: Method,
  pub url: Url,
  pub response: StoredResponse,
}

/// A stored response read back from the cache.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: StoredResponse,
  /// When the entry was last written
  pub cached_at: DateTime<Utc>,
}

/// Outcome of a best-effort cache write.
///
/// Cache writes never fail the response path; a failure shows up here as
/// `Degraded` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheWrite {
  /// Entry written
  Stored,
  /// Nothing to write (served from cache)
  Skipped,
  /// Encoding or the store write failed; nothing was cached
  Degraded(String),
}

impl CacheWrite {
  pub fn is_degraded(&self) -> bool {
    matches!(self, CacheWrite::Degraded(_))
  }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh data from network
  Network,
  /// Cache hit while the network was not consulted
  Cache,
  /// Offline mode - network unavailable, serving cached data
  Offline,
}

/// A response handed back to the page, with metadata about how it was produced.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
  pub cache_write: CacheWrite,
}

impl Served {
  /// Create a result from fresh network data.
  pub fn from_network(response: Response, cache_write: CacheWrite) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
      cache_write,
    }
  }

  /// Create a result from a cache hit.
  pub fn from_cache(response: Response, cached_at: DateTime<Utc>) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
      cached_at: Some(cached_at),
      cache_write: CacheWrite::Skipped,
    }
  }

  /// Create a result for offline mode.
  pub fn offline(response: Response, cached_at: DateTime<Utc>) -> Self {
    Self {
      response,
      source: ResponseSource::Offline,
      cached_at: Some(cached_at),
      cache_write: CacheWrite::Skipped,
    }
  }
}
