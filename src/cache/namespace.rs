//! Owner of the current cache namespace.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::codec::{decode_body, ResponseCodec};
use super::key::RequestKey;
use super::storage::CacheStore;
use super::traits::{CacheEntry, CacheWrite, CachedResponse};
use crate::http::{Method, Network, Request, Response};

/// Reads and writes entries of the one current namespace, and removes every
/// other namespace on activation.
///
/// The namespace identity is fixed at construction.
#[derive(Clone)]
pub struct NamespaceManager {
  store: Arc<dyn CacheStore>,
  namespace: String,
  codec: ResponseCodec,
}

impl NamespaceManager {
  pub fn new(store: Arc<dyn CacheStore>, namespace: impl Into<String>, codec: ResponseCodec) -> Self {
    Self {
      store,
      namespace: namespace.into(),
      codec,
    }
  }

  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  /// Create the current namespace if needed.
  pub fn open(&self) -> Result<()> {
    self.store.open(&self.namespace)
  }

  /// Find the stored response for `request`, decoded back to what the network sent.
  pub fn match_request(&self, request: &Request) -> Result<Option<(Response, CachedResponse)>> {
    let key = RequestKey::for_request(request);
    match self.store.get(&self.namespace, &key)? {
      Some(cached) => {
        let response = self.codec.decode(cached.response.clone())?;
        Ok(Some((response, cached)))
      }
      None => Ok(None),
    }
  }

  /// Store `response` for `request`. Never fails; problems come back as `Degraded`.
  pub fn put(&self, request: &Request, response: &Response) -> CacheWrite {
    let entry = CacheEntry {
      key: RequestKey::for_request(request),
      method: request.method,
      url: request.url.clone(),
      response: self.codec.encode(request, response),
    };

    match self.store.put(&self.namespace, &entry) {
      Ok(()) => {
        debug!(url = %request.url, encoding = entry.response.encoding.as_str(), "Cached response");
        CacheWrite::Stored
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "Failed to cache response");
        CacheWrite::Degraded(e.to_string())
      }
    }
  }

  /// Fetch every URL and store the results in one write.
  ///
  /// Fails without writing anything if any fetch rejects or comes back non-2xx.
  pub async fn add_all(&self, network: &dyn Network, urls: &[Url]) -> Result<usize> {
    let fetches = urls.iter().map(|url| async move {
      let request = Request::new(Method::Get, url.clone());
      let response = network.fetch(&request).await?;
      if !response.ok() {
        return Err(eyre!(
          "Pre-cache of {} failed with status {}",
          url,
          response.status
        ));
      }
      Ok::<_, color_eyre::Report>(CacheEntry {
        key: RequestKey::for_request(&request),
        method: request.method,
        url: request.url.clone(),
        response: self.codec.encode(&request, &response),
      })
    });

    let entries = try_join_all(fetches).await?;
    self.store.put_all(&self.namespace, &entries)?;

    info!(namespace = %self.namespace, count = entries.len(), "Pre-cached assets");
    Ok(entries.len())
  }

  /// Delete every namespace other than `keep`. Returns the deleted names.
  pub fn purge_except(&self, keep: &str) -> Result<Vec<String>> {
    let mut purged = Vec::new();
    for name in self.store.keys()? {
      if name != keep && self.store.delete(&name)? {
        purged.push(name);
      }
    }

    if !purged.is_empty() {
      info!(kept = keep, purged = ?purged, "Purged stale cache namespaces");
    }
    Ok(purged)
  }

  /// Delete every namespace other than the current one.
  pub fn purge_stale(&self) -> Result<Vec<String>> {
    self.purge_except(&self.namespace)
  }

  /// Decoded body of the entry stored for `request`, without building a response.
  pub fn cached_body(&self, request: &Request) -> Result<Option<Vec<u8>>> {
    let key = RequestKey::for_request(request);
    match self.store.get(&self.namespace, &key)? {
      Some(cached) => Ok(Some(decode_body(
        cached.response.encoding,
        cached.response.body,
      )?)),
      None => Ok(None),
    }
  }

  /// Rewrite the body of an existing entry, keeping its status and headers.
  ///
  /// `update` receives the decoded body and returns the replacement, which is
  /// encoded the same way any response for `request` would be.
  pub fn update_cached_body<F>(&self, request: &Request, update: F) -> Result<bool>
  where
    F: FnOnce(Vec<u8>) -> Vec<u8>,
  {
    let Some((response, _)) = self.match_request(request)? else {
      return Ok(false);
    };

    let body = update(response.body.clone());
    let entry = CacheEntry {
      key: RequestKey::for_request(request),
      method: request.method,
      url: request.url.clone(),
      response: self.codec.encode(request, &Response { body, ..response }),
    };
    self.store.put(&self.namespace, &entry)?;
    Ok(true)
  }
}
