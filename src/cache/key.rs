//! Request identity used as the cache key.

use sha2::{Digest, Sha256};
use url::Url;

use crate::http::{Method, Request};

/// Stable key for a cached request.
///
/// Only the method and the URL (without fragment) take part. Request headers
/// never do, so responses match regardless of `Vary`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(String);

impl RequestKey {
  pub fn new(method: Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    let input = format!("{}:{}", method, url);

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    Self(hex::encode(hasher.finalize()))
  }

  pub fn for_request(request: &Request) -> Self {
    Self::new(request.method, &request.url)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}
