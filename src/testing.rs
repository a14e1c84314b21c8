//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::cache::{CacheEntry, CacheStore, CachedResponse, RequestKey};
use crate::http::{Network, Request, Response};
use crate::lifecycle::Clients;

/// Scripted network. Unknown URLs answer 404.
#[derive(Default)]
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, Response>>,
  /// Remaining forced failures per URL
  failures: Mutex<HashMap<String, usize>>,
  calls: Mutex<Vec<Request>>,
  events: Mutex<Vec<String>>,
  delay: Duration,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sleep this long inside every fetch.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  /// Answer `url` with `response` from now on, clearing any forced failure.
  pub fn respond(&self, url: &str, response: Response) {
    self.failures.lock().unwrap().remove(url);
    self.routes.lock().unwrap().insert(url.to_string(), response);
  }

  /// Reject every request to `url`.
  pub fn fail(&self, url: &str) {
    self.fail_times(url, usize::MAX);
  }

  /// Reject the next `times` requests to `url`.
  pub fn fail_times(&self, url: &str, times: usize) {
    self.failures.lock().unwrap().insert(url.to_string(), times);
  }

  /// Every request seen, in call order.
  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self, url: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.url.as_str() == url)
      .count()
  }

  /// "start <url>" / "end <url>" markers around every fetch.
  pub fn events(&self) -> Vec<String> {
    self.events.lock().unwrap().clone()
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let url = request.url.to_string();
    self.calls.lock().unwrap().push(request.clone());
    self.events.lock().unwrap().push(format!("start {}", url));

    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }

    let failing = {
      let mut failures = self.failures.lock().unwrap();
      match failures.get_mut(&url) {
        Some(remaining) if *remaining > 0 => {
          *remaining = remaining.saturating_sub(1);
          true
        }
        _ => false,
      }
    };

    self.events.lock().unwrap().push(format!("end {}", url));
    if failing {
      return Err(eyre!("connection refused: {}", url));
    }

    let response = self.routes.lock().unwrap().get(&url).cloned();
    Ok(response.unwrap_or_else(|| Response::new(404, "")))
  }
}

/// Clients double that counts claims.
pub struct FakeClients {
  open: usize,
  claims: AtomicUsize,
}

impl FakeClients {
  pub fn new(open: usize) -> Self {
    Self {
      open,
      claims: AtomicUsize::new(0),
    }
  }

  pub fn claims(&self) -> usize {
    self.claims.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Clients for FakeClients {
  async fn claim(&self) -> Result<usize> {
    self.claims.fetch_add(1, Ordering::SeqCst);
    Ok(self.open)
  }
}

/// Cache store whose every operation fails.
pub struct FailingCacheStore;

impl CacheStore for FailingCacheStore {
  fn open(&self, _namespace: &str) -> Result<()> {
    Err(eyre!("disk full"))
  }

  fn get(&self, _namespace: &str, _key: &RequestKey) -> Result<Option<CachedResponse>> {
    Err(eyre!("disk full"))
  }

  fn put(&self, _namespace: &str, _entry: &CacheEntry) -> Result<()> {
    Err(eyre!("disk full"))
  }

  fn put_all(&self, _namespace: &str, _entries: &[CacheEntry]) -> Result<()> {
    Err(eyre!("disk full"))
  }

  fn keys(&self) -> Result<Vec<String>> {
    Err(eyre!("disk full"))
  }

  fn delete(&self, _namespace: &str) -> Result<bool> {
    Err(eyre!("disk full"))
  }
}
