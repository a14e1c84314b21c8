//! Request classification and dispatch.

use color_eyre::Result;
use std::sync::Arc;
use tracing::debug;

use crate::cache::{CacheLayer, Served};
use crate::connectivity::Connectivity;
use crate::http::{CacheMode, Request, RequestMode};
use crate::queue::OfflineWriteQueue;

/// How a request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Not intercepted; the page's own fetch runs as usual
  Passthrough,
  /// Serve from cache verbatim, fetch and populate on a miss
  CacheFirst,
  /// Fetch, refresh the cache entry, return the network response
  NetworkFirst,
  /// Offline cross-origin read: cached copy or failure
  CacheOnly,
  /// Offline write: record for later replay
  Queue,
}

/// Result of handling one fetch.
#[derive(Debug)]
pub enum FetchOutcome {
  /// The worker did not respond; the request proceeds natively
  Passthrough,
  Respond(Served),
  /// The write was stored in the offline queue under this id
  Queued(i64),
}

/// Pick a strategy. Pure and synchronous.
///
/// Rules, first match wins:
/// 1. `only-if-cached` outside same-origin mode is left alone
/// 2. reads under the static prefix, or not cross-origin, are cache-first
/// 3. other reads are network-first when online
/// 4. and cache-only when offline
/// 5. writes are queued when offline and left alone when online
pub fn classify(request: &Request, online: bool, static_prefix: &str) -> Strategy {
  if request.cache == CacheMode::OnlyIfCached && request.mode != RequestMode::SameOrigin {
    return Strategy::Passthrough;
  }

  if request.method.is_read() {
    if request.is_under(static_prefix) || !request.is_cross_origin() {
      Strategy::CacheFirst
    } else if online {
      Strategy::NetworkFirst
    } else {
      Strategy::CacheOnly
    }
  } else if online {
    Strategy::Passthrough
  } else {
    Strategy::Queue
  }
}

/// Routes each request to the cache layer, the network or the write queue.
pub struct RequestRouter {
  layer: CacheLayer,
  queue: Arc<OfflineWriteQueue>,
  connectivity: Arc<dyn Connectivity>,
  static_prefix: String,
}

impl RequestRouter {
  pub fn new(
    layer: CacheLayer,
    queue: Arc<OfflineWriteQueue>,
    connectivity: Arc<dyn Connectivity>,
    static_prefix: impl Into<String>,
  ) -> Self {
    Self {
      layer,
      queue,
      connectivity,
      static_prefix: static_prefix.into(),
    }
  }

  pub fn classify(&self, request: &Request) -> Strategy {
    classify(request, self.connectivity.is_online(), &self.static_prefix)
  }

  pub async fn handle(&self, request: &Request) -> Result<FetchOutcome> {
    let strategy = self.classify(request);
    debug!(method = %request.method, url = %request.url, ?strategy, "Routing request");

    match strategy {
      Strategy::Passthrough => Ok(FetchOutcome::Passthrough),
      Strategy::CacheFirst => Ok(FetchOutcome::Respond(self.layer.cache_first(request).await?)),
      Strategy::NetworkFirst => Ok(FetchOutcome::Respond(
        self.layer.network_first(request).await?,
      )),
      Strategy::CacheOnly => Ok(FetchOutcome::Respond(self.layer.cache_only(request).await?)),
      Strategy::Queue => {
        let auth = request.headers.get("Authorization");
        let payload = request.body_text()?;
        let id = self
          .queue
          .enqueue(request.url.as_str(), auth, &payload)
          .await?;
        Ok(FetchOutcome::Queued(id))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{NamespaceManager, ResponseCodec, ResponseSource, SqliteCacheStore};
  use crate::config::RemovalPolicy;
  use crate::connectivity::OnlineFlag;
  use crate::http::{Method, Response};
  use crate::queue::{QueueStore, SqliteQueueStore};
  use crate::testing::FakeNetwork;

  fn get(url: &str) -> Request {
    Request::parse(Method::Get, url).unwrap()
  }

  fn cors_get(url: &str) -> Request {
    get(url).with_mode(RequestMode::Cors)
  }

  struct Harness {
    router: RequestRouter,
    network: Arc<FakeNetwork>,
    queue_store: Arc<SqliteQueueStore>,
    flag: OnlineFlag,
  }

  fn harness(online: bool) -> Harness {
    let network = Arc::new(FakeNetwork::new());
    let queue_store = Arc::new(SqliteQueueStore::open_in_memory().unwrap());
    let queue = Arc::new(OfflineWriteQueue::new(
      queue_store.clone(),
      network.clone(),
      RemovalPolicy::OnSettle,
    ));
    let cache = NamespaceManager::new(
      Arc::new(SqliteCacheStore::open_in_memory().unwrap()),
      "v1",
      ResponseCodec::new("/static/"),
    );
    let flag = OnlineFlag::new(online);
    let router = RequestRouter::new(
      CacheLayer::new(cache, network.clone()),
      queue,
      Arc::new(flag.clone()),
      "/static/",
    );
    Harness {
      router,
      network,
      queue_store,
      flag,
    }
  }

  fn served(outcome: FetchOutcome) -> Served {
    match outcome {
      FetchOutcome::Respond(served) => served,
      other => panic!("expected a response, got {:?}", other),
    }
  }

  #[test]
  fn test_only_if_cached_cross_origin_is_not_intercepted() {
    let request = cors_get("https://api.example/x").with_cache(CacheMode::OnlyIfCached);
    assert_eq!(classify(&request, true, "/static/"), Strategy::Passthrough);

    let no_cors = get("https://cdn.example/x")
      .with_mode(RequestMode::NoCors)
      .with_cache(CacheMode::OnlyIfCached);
    assert_eq!(classify(&no_cors, true, "/static/"), Strategy::Passthrough);

    let same_origin = get("https://app.example/x").with_cache(CacheMode::OnlyIfCached);
    assert_eq!(classify(&same_origin, true, "/static/"), Strategy::CacheFirst);
  }

  #[test]
  fn test_read_classification() {
    let same_origin = get("https://app.example/index.html");
    let static_cors = cors_get("https://cdn.example/static/main.js");
    let api = cors_get("https://api.example/items");

    for online in [true, false] {
      assert_eq!(classify(&same_origin, online, "/static/"), Strategy::CacheFirst);
      assert_eq!(classify(&static_cors, online, "/static/"), Strategy::CacheFirst);
    }
    assert_eq!(classify(&api, true, "/static/"), Strategy::NetworkFirst);
    assert_eq!(classify(&api, false, "/static/"), Strategy::CacheOnly);
  }

  #[test]
  fn test_write_classification() {
    let post = Request::parse(Method::Post, "https://api.example/api/events")
      .unwrap()
      .with_body("{}");
    let delete = Request::parse(Method::Delete, "https://api.example/items/1").unwrap();

    assert_eq!(classify(&post, true, "/static/"), Strategy::Passthrough);
    assert_eq!(classify(&post, false, "/static/"), Strategy::Queue);
    assert_eq!(classify(&delete, false, "/static/"), Strategy::Queue);
  }

  #[tokio::test]
  async fn test_static_hit_never_contacts_network() {
    let h = harness(true);
    let url = "https://app.example/static/main.abc.js";
    h.network.respond(url, Response::new(200, "bundle"));

    h.router.handle(&get(url)).await.unwrap();
    h.flag.set_online(false);
    let second = served(h.router.handle(&get(url)).await.unwrap());

    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.response.body, b"bundle");
    assert_eq!(h.network.call_count(url), 1);
  }

  #[tokio::test]
  async fn test_cross_origin_online_then_offline() {
    let h = harness(true);
    let url = "https://api.example/items";
    h.network.respond(url, Response::new(200, r#"[{"id":1}]"#));

    let online = served(h.router.handle(&cors_get(url)).await.unwrap());
    assert_eq!(online.source, ResponseSource::Network);

    h.flag.set_online(false);
    let offline = served(h.router.handle(&cors_get(url)).await.unwrap());
    assert_eq!(offline.source, ResponseSource::Offline);
    assert_eq!(offline.response.body, br#"[{"id":1}]"#);
    assert_eq!(h.network.call_count(url), 1);
  }

  #[tokio::test]
  async fn test_offline_cross_origin_miss_fails() {
    let h = harness(false);
    assert!(h.router.handle(&cors_get("https://api.example/none")).await.is_err());
    assert!(h.network.calls().is_empty());
  }

  #[tokio::test]
  async fn test_offline_post_is_queued() {
    let h = harness(false);
    let request = Request::parse(Method::Post, "https://api.example/api/events")
      .unwrap()
      .with_mode(RequestMode::Cors)
      .with_header("Authorization", "Bearer t")
      .with_body(r#"{"x":1}"#);

    let outcome = h.router.handle(&request).await.unwrap();

    assert!(matches!(outcome, FetchOutcome::Queued(_)));
    let records = h.queue_store.get_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].url, "https://api.example/api/events");
    assert_eq!(records[0].auth_header.as_deref(), Some("Bearer t"));
    assert_eq!(records[0].payload, r#"{"x":1}"#);
    assert!(h.network.calls().is_empty());
  }

  #[tokio::test]
  async fn test_online_post_passes_through() {
    let h = harness(true);
    let request = Request::parse(Method::Post, "https://api.example/api/events")
      .unwrap()
      .with_body("{}");

    let outcome = h.router.handle(&request).await.unwrap();

    assert!(matches!(outcome, FetchOutcome::Passthrough));
    assert!(h.queue_store.get_all().unwrap().is_empty());
    assert!(h.network.calls().is_empty());
  }
}
