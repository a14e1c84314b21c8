//! Offline write queue and the serial replay protocol.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::store::{NewQueuedRequest, QueueStore, QueuedRequest};
use crate::config::RemovalPolicy;
use crate::http::{Method, Network, Request};

/// Summary of one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Another drain was already running; nothing was done
  pub skipped: bool,
  /// Records in the snapshot taken at the start of the cycle
  pub snapshot: usize,
  /// Replays that settled with an HTTP response (any status)
  pub delivered: usize,
  /// New ids of records moved to the tail after a network failure
  pub requeued: Vec<i64>,
  /// Records of the snapshot left for the next cycle after the chain stopped
  pub deferred: usize,
  /// Records dropped because they could not be turned into a request
  pub discarded: usize,
}

impl DrainReport {
  fn skipped() -> Self {
    Self {
      skipped: true,
      ..Self::default()
    }
  }
}

/// Durable queue of writes made while offline.
///
/// Records are replayed one at a time, oldest first, each only after the
/// previous network call has settled.
pub struct OfflineWriteQueue {
  store: Arc<dyn QueueStore>,
  network: Arc<dyn Network>,
  policy: RemovalPolicy,
  /// Held for the whole drain cycle
  draining: Mutex<()>,
}

impl OfflineWriteQueue {
  pub fn new(store: Arc<dyn QueueStore>, network: Arc<dyn Network>, policy: RemovalPolicy) -> Self {
    Self {
      store,
      network,
      policy,
      draining: Mutex::new(()),
    }
  }

  /// Durably record a write for later replay.
  ///
  /// The payload must be JSON; it is stored in its compact serialized form.
  pub async fn enqueue(&self, url: &str, auth_header: Option<&str>, payload: &str) -> Result<i64> {
    let json: serde_json::Value = serde_json::from_str(payload)
      .map_err(|e| eyre!("Refusing to queue non-JSON payload for {}: {}", url, e))?;

    let record = NewQueuedRequest {
      url: url.to_string(),
      auth_header: auth_header.map(String::from),
      payload: json.to_string(),
    };

    let id = self.store.add(&record)?;
    info!(id, url, "Queued offline request");
    Ok(id)
  }

  /// Records currently waiting, oldest first.
  pub fn pending(&self) -> Result<Vec<QueuedRequest>> {
    self.store.get_all()
  }

  /// Replay the current snapshot of the queue, serially and in order.
  ///
  /// The chain stops at the first network failure: that record is moved to
  /// the tail and the rest of the snapshot waits for the next cycle. HTTP
  /// error statuses count as delivered. A call made while another drain is in
  /// flight returns immediately with `skipped` set.
  pub async fn drain_and_replay(&self) -> Result<DrainReport> {
    let Ok(_guard) = self.draining.try_lock() else {
      debug!("Drain already in progress, skipping");
      return Ok(DrainReport::skipped());
    };

    let records = self.store.get_all()?;
    let mut report = DrainReport {
      snapshot: records.len(),
      ..DrainReport::default()
    };
    if records.is_empty() {
      return Ok(report);
    }

    if self.policy == RemovalPolicy::OnInitiate {
      for record in &records {
        self.store.delete(record.id)?;
      }
    }

    let mut remaining = records.into_iter();
    while let Some(record) = remaining.next() {
      let request = match replay_request(&record) {
        Ok(request) => request,
        Err(e) => {
          warn!(id = record.id, error = %e, "Discarding queued request");
          self.store.delete(record.id)?;
          report.discarded += 1;
          continue;
        }
      };

      match self.network.fetch(&request).await {
        Ok(response) => {
          info!(id = record.id, url = %record.url, status = response.status, "Replayed queued request");
          if self.policy == RemovalPolicy::OnSettle {
            self.store.delete(record.id)?;
          }
          report.delivered += 1;
        }
        Err(e) => {
          warn!(id = record.id, url = %record.url, error = %e, "Replay failed, requeueing");

          let rest: Vec<QueuedRequest> = remaining.collect();
          if self.policy == RemovalPolicy::OnInitiate {
            // Already deleted with the snapshot; put them back in order
            for record in &rest {
              self.store.add(&NewQueuedRequest::from(record))?;
            }
          }
          // The failed record goes behind everything still waiting
          report.requeued.push(self.store.requeue(&record)?);
          report.deferred = rest.len();
          break;
        }
      }
    }

    info!(
      snapshot = report.snapshot,
      delivered = report.delivered,
      requeued = report.requeued.len(),
      deferred = report.deferred,
      "Drain cycle finished"
    );
    Ok(report)
  }
}

/// The outbound request replaying a queued record.
fn replay_request(record: &QueuedRequest) -> Result<Request> {
  let mut request = Request::parse(Method::Post, &record.url)?
    .with_header("Accept", "application/json")
    .with_header("Content-Type", "application/json")
    .with_body(record.payload.clone());

  if let Some(auth) = &record.auth_header {
    request = request.with_header("Authorization", auth);
  }
  Ok(request)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::Response;
  use crate::queue::store::SqliteQueueStore;
  use crate::testing::FakeNetwork;
  use std::time::Duration;

  const EVENTS: &str = "https://api.example/api/events";

  fn queue(network: Arc<FakeNetwork>, policy: RemovalPolicy) -> (OfflineWriteQueue, Arc<SqliteQueueStore>) {
    let store = Arc::new(SqliteQueueStore::open_in_memory().unwrap());
    (OfflineWriteQueue::new(store.clone(), network, policy), store)
  }

  fn payloads(store: &SqliteQueueStore) -> Vec<String> {
    store.get_all().unwrap().into_iter().map(|r| r.payload).collect()
  }

  #[tokio::test]
  async fn test_enqueue_normalizes_json() {
    let (queue, store) = queue(Arc::new(FakeNetwork::new()), RemovalPolicy::OnSettle);

    queue
      .enqueue(EVENTS, Some("Bearer t"), "{ \"x\" : 1 }")
      .await
      .unwrap();

    let records = queue.pending().unwrap();
    assert_eq!(records, store.get_all().unwrap());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payload, r#"{"x":1}"#);
    assert_eq!(records[0].auth_header.as_deref(), Some("Bearer t"));
  }

  #[tokio::test]
  async fn test_enqueue_rejects_non_json() {
    let (queue, store) = queue(Arc::new(FakeNetwork::new()), RemovalPolicy::OnSettle);

    assert!(queue.enqueue(EVENTS, None, "x=1&y=2").await.is_err());
    assert!(store.get_all().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_replay_sends_exact_payload_and_headers() {
    let network = Arc::new(FakeNetwork::new());
    network.respond(EVENTS, Response::new(201, ""));
    let (queue, store) = queue(network.clone(), RemovalPolicy::OnSettle);
    queue.enqueue(EVENTS, Some("Bearer t"), r#"{"x":1}"#).await.unwrap();

    let report = queue.drain_and_replay().await.unwrap();

    assert_eq!(report.delivered, 1);
    assert!(store.get_all().unwrap().is_empty());

    let calls = network.calls();
    assert_eq!(calls.len(), 1);
    let sent = &calls[0];
    assert_eq!(sent.method, Method::Post);
    assert_eq!(sent.url.as_str(), EVENTS);
    assert_eq!(sent.body.as_deref(), Some(br#"{"x":1}"#.as_slice()));
    assert_eq!(sent.headers.get("Accept"), Some("application/json"));
    assert_eq!(sent.headers.get("Content-Type"), Some("application/json"));
    assert_eq!(sent.headers.get("Authorization"), Some("Bearer t"));
  }

  #[tokio::test]
  async fn test_missing_auth_header_is_omitted() {
    let network = Arc::new(FakeNetwork::new());
    let (queue, _store) = queue(network.clone(), RemovalPolicy::OnSettle);
    queue.enqueue(EVENTS, None, "{}").await.unwrap();

    queue.drain_and_replay().await.unwrap();

    assert_eq!(network.calls()[0].headers.get("Authorization"), None);
  }

  #[tokio::test]
  async fn test_replays_are_serial_and_ordered() {
    let network = Arc::new(FakeNetwork::new().with_delay(Duration::from_millis(20)));
    let (queue, _store) = queue(network.clone(), RemovalPolicy::OnSettle);
    for n in 1..=3 {
      queue
        .enqueue(&format!("https://api.example/w{}", n), None, "{}")
        .await
        .unwrap();
    }

    queue.drain_and_replay().await.unwrap();

    assert_eq!(
      network.events(),
      vec![
        "start https://api.example/w1",
        "end https://api.example/w1",
        "start https://api.example/w2",
        "end https://api.example/w2",
        "start https://api.example/w3",
        "end https://api.example/w3",
      ]
    );
  }

  #[tokio::test]
  async fn test_http_error_status_counts_as_delivered() {
    let network = Arc::new(FakeNetwork::new());
    network.respond(EVENTS, Response::new(500, "oops"));
    let (queue, store) = queue(network, RemovalPolicy::OnSettle);
    queue.enqueue(EVENTS, None, "{}").await.unwrap();

    let report = queue.drain_and_replay().await.unwrap();

    assert_eq!(report.delivered, 1);
    assert!(report.requeued.is_empty());
    assert!(store.get_all().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_network_failure_requeues_and_stops_chain() {
    let network = Arc::new(FakeNetwork::new());
    network.fail("https://api.example/w2");
    let (queue, store) = queue(network.clone(), RemovalPolicy::OnSettle);
    queue.enqueue("https://api.example/w1", None, r#"{"n":1}"#).await.unwrap();
    queue.enqueue("https://api.example/w2", None, r#"{"n":2}"#).await.unwrap();
    queue.enqueue("https://api.example/w3", None, r#"{"n":3}"#).await.unwrap();

    let report = queue.drain_and_replay().await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(report.requeued.len(), 1);
    assert_eq!(report.deferred, 1);
    // w1 delivered and gone, w3 untouched, w2 moved to the tail
    assert_eq!(payloads(&store), vec![r#"{"n":3}"#, r#"{"n":2}"#]);
    assert_eq!(network.call_count("https://api.example/w3"), 0);
  }

  #[tokio::test]
  async fn test_requeued_record_is_delivered_next_cycle() {
    let network = Arc::new(FakeNetwork::new());
    network.fail_times(EVENTS, 1);
    let (queue, store) = queue(network.clone(), RemovalPolicy::OnSettle);
    queue.enqueue(EVENTS, None, r#"{"x":1}"#).await.unwrap();

    let first = queue.drain_and_replay().await.unwrap();
    assert_eq!(first.requeued.len(), 1);
    assert_eq!(store.get_all().unwrap().len(), 1);

    let second = queue.drain_and_replay().await.unwrap();
    assert_eq!(second.delivered, 1);
    assert!(store.get_all().unwrap().is_empty());
    assert_eq!(network.call_count(EVENTS), 2);
  }

  #[tokio::test]
  async fn test_on_initiate_puts_unsent_records_back() {
    let network = Arc::new(FakeNetwork::new());
    network.fail("https://api.example/w2");
    let (queue, store) = queue(network, RemovalPolicy::OnInitiate);
    queue.enqueue("https://api.example/w1", None, r#"{"n":1}"#).await.unwrap();
    queue.enqueue("https://api.example/w2", None, r#"{"n":2}"#).await.unwrap();
    queue.enqueue("https://api.example/w3", None, r#"{"n":3}"#).await.unwrap();

    let report = queue.drain_and_replay().await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(report.deferred, 1);
    // Same order as OnSettle: the failed record loses its place
    assert_eq!(payloads(&store), vec![r#"{"n":3}"#, r#"{"n":2}"#]);
    let ids: Vec<i64> = store.get_all().unwrap().iter().map(|r| r.id).collect();
    assert_eq!(ids.last(), report.requeued.last());
  }

  #[tokio::test]
  async fn test_overlapping_drains_do_not_double_send() {
    let network = Arc::new(FakeNetwork::new().with_delay(Duration::from_millis(50)));
    let (queue, _store) = queue(network.clone(), RemovalPolicy::OnSettle);
    queue.enqueue(EVENTS, None, "{}").await.unwrap();

    let (a, b) = tokio::join!(queue.drain_and_replay(), queue.drain_and_replay());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.skipped ^ b.skipped);
    assert_eq!(network.call_count(EVENTS), 1);
  }

  #[tokio::test]
  async fn test_empty_queue_does_nothing() {
    let network = Arc::new(FakeNetwork::new());
    let (queue, _store) = queue(network.clone(), RemovalPolicy::OnSettle);

    let report = queue.drain_and_replay().await.unwrap();

    assert_eq!(report, DrainReport::default());
    assert!(network.calls().is_empty());
  }

  #[tokio::test]
  async fn test_invalid_url_is_discarded() {
    let network = Arc::new(FakeNetwork::new());
    let (queue, store) = queue(network.clone(), RemovalPolicy::OnSettle);
    store
      .add(&NewQueuedRequest {
        url: "not a url".to_string(),
        auth_header: None,
        payload: "{}".to_string(),
      })
      .unwrap();
    queue.enqueue(EVENTS, None, "{}").await.unwrap();

    let report = queue.drain_and_replay().await.unwrap();

    assert_eq!(report.discarded, 1);
    assert_eq!(report.delivered, 1);
    assert!(store.get_all().unwrap().is_empty());
  }
}
