//! Cache layer that orchestrates caching logic with network fetching.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, warn};

use super::namespace::NamespaceManager;
use super::traits::Served;
use crate::http::{Network, Request};

/// Cache layer that manages caching logic and network fetching.
///
/// Each method is one of the read strategies the router dispatches to.
#[derive(Clone)]
pub struct CacheLayer {
  cache: NamespaceManager,
  network: Arc<dyn Network>,
}

impl CacheLayer {
  pub fn new(cache: NamespaceManager, network: Arc<dyn Network>) -> Self {
    Self { cache, network }
  }

  /// Serve from cache, going to the network only on a miss.
  ///
  /// 1. Check cache - on a hit, return immediately without touching the network
  /// 2. On a miss (or an unreadable entry), fetch from network
  /// 3. Store the network response, best effort
  pub async fn cache_first(&self, request: &Request) -> Result<Served> {
    match self.cache.match_request(request) {
      Ok(Some((response, cached))) => {
        return Ok(Served::from_cache(response, cached.cached_at));
      }
      Ok(None) => debug!(url = %request.url, "Not yet cached"),
      Err(e) => warn!(url = %request.url, error = %e, "Cached entry unreadable, refetching"),
    }

    let response = self.network.fetch(request).await?;
    let write = self.cache.put(request, &response);
    Ok(Served::from_network(response, write))
  }

  /// Always fetch, refreshing the cache with whatever comes back.
  pub async fn network_first(&self, request: &Request) -> Result<Served> {
    let response = self.network.fetch(request).await?;
    let write = self.cache.put(request, &response);
    Ok(Served::from_network(response, write))
  }

  /// Offline read: serve the cached copy or fail. Nothing is fabricated.
  pub async fn cache_only(&self, request: &Request) -> Result<Served> {
    match self.cache.match_request(request)? {
      Some((response, cached)) => Ok(Served::offline(response, cached.cached_at)),
      None => Err(eyre!("{} not yet cached", request.url)),
    }
  }
}
