//! Install / activate / fetch event handling.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use url::Url;

use crate::cache::{CacheLayer, CacheStore, NamespaceManager, ResponseCodec};
use crate::config::Config;
use crate::connectivity::{Connectivity, ConnectivityMonitor};
use crate::http::{Method, Network, Request};
use crate::queue::{OfflineWriteQueue, QueueStore};
use crate::router::{FetchOutcome, RequestRouter};

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  Installed,
  Activating,
  Active,
  /// Install failed; the worker is discarded
  Redundant,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      WorkerState::Parsed => "parsed",
      WorkerState::Installing => "installing",
      WorkerState::Installed => "installed",
      WorkerState::Activating => "activating",
      WorkerState::Active => "active",
      WorkerState::Redundant => "redundant",
    };
    f.write_str(s)
  }
}

/// Pages controlled by the worker.
#[async_trait]
pub trait Clients: Send + Sync {
  /// Take control of every open page. Returns how many were claimed.
  async fn claim(&self) -> Result<usize>;
}

/// Client set for a host without pages to claim.
pub struct NoClients;

#[async_trait]
impl Clients for NoClients {
  async fn claim(&self) -> Result<usize> {
    Ok(0)
  }
}

/// Deferred-completion token carried by install and activate events.
///
/// The controller resolves it once the event's async work has settled.
pub struct Completion(oneshot::Sender<Result<()>>);

impl Completion {
  /// A token and the receiver the event source waits on.
  pub fn channel() -> (Self, oneshot::Receiver<Result<()>>) {
    let (tx, rx) = oneshot::channel();
    (Self(tx), rx)
  }

  fn resolve(self, result: Result<()>) {
    // Ignore send errors - the event source may have stopped waiting
    let _ = self.0.send(result);
  }
}

/// A fetch event; the outcome is delivered through `respond_with`.
pub struct FetchEvent {
  pub request: Request,
  respond_with: oneshot::Sender<Result<FetchOutcome>>,
}

impl FetchEvent {
  pub fn channel(request: Request) -> (Self, oneshot::Receiver<Result<FetchOutcome>>) {
    let (tx, rx) = oneshot::channel();
    (
      Self {
        request,
        respond_with: tx,
      },
      rx,
    )
  }
}

/// Events delivered to the worker.
pub enum WorkerEvent {
  Install(Completion),
  Activate(Completion),
  Fetch(FetchEvent),
}

/// What activation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateReport {
  pub claimed: usize,
  pub purged: Vec<String>,
}

/// External collaborators of a worker.
pub struct WorkerDeps {
  pub cache_store: Arc<dyn CacheStore>,
  pub queue_store: Arc<dyn QueueStore>,
  pub network: Arc<dyn Network>,
  pub connectivity: Arc<dyn Connectivity>,
  pub clients: Arc<dyn Clients>,
}

/// Drives the worker through install and activation, and hands fetches to
/// the router once active.
pub struct LifecycleController {
  config: Arc<Config>,
  state: Mutex<WorkerState>,
  cache: NamespaceManager,
  queue: Arc<OfflineWriteQueue>,
  router: RequestRouter,
  network: Arc<dyn Network>,
  connectivity: Arc<dyn Connectivity>,
  clients: Arc<dyn Clients>,
  monitor: Mutex<Option<ConnectivityMonitor>>,
}

impl LifecycleController {
  pub fn new(config: Config, deps: WorkerDeps) -> Self {
    let config = Arc::new(config);
    let cache = NamespaceManager::new(
      deps.cache_store,
      config.namespace(),
      ResponseCodec::new(config.static_prefix.clone()),
    );
    let queue = Arc::new(OfflineWriteQueue::new(
      deps.queue_store,
      Arc::clone(&deps.network),
      config.removal_policy,
    ));
    let router = RequestRouter::new(
      CacheLayer::new(cache.clone(), Arc::clone(&deps.network)),
      Arc::clone(&queue),
      Arc::clone(&deps.connectivity),
      config.static_prefix.clone(),
    );

    Self {
      config,
      state: Mutex::new(WorkerState::Parsed),
      cache,
      queue,
      router,
      network: deps.network,
      connectivity: deps.connectivity,
      clients: deps.clients,
      monitor: Mutex::new(None),
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state.lock().map(|s| *s).unwrap_or(WorkerState::Redundant)
  }

  pub fn cache(&self) -> &NamespaceManager {
    &self.cache
  }

  fn set_state(&self, state: WorkerState) -> Result<()> {
    let mut current = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *current = state;
    Ok(())
  }

  fn transition(&self, from: WorkerState, to: WorkerState) -> Result<()> {
    let mut current = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    if *current != from {
      return Err(eyre!("Cannot move to {} from {} (expected {})", to, *current, from));
    }
    *current = to;
    Ok(())
  }

  /// Install: start the connectivity monitor and pre-cache the manifest assets.
  ///
  /// The worker counts as installed only once every asset is stored. Any
  /// failure leaves it redundant.
  pub async fn install(&self) -> Result<usize> {
    self.transition(WorkerState::Parsed, WorkerState::Installing)?;
    info!(namespace = %self.cache.namespace(), "Event: install");

    match self.run_install().await {
      Ok(count) => {
        self.set_state(WorkerState::Installed)?;
        Ok(count)
      }
      Err(e) => {
        error!(error = %e, "Install failed");
        self.stop_monitor();
        self.set_state(WorkerState::Redundant)?;
        Err(e)
      }
    }
  }

  async fn run_install(&self) -> Result<usize> {
    self.config.validate()?;
    self.start_monitor()?;
    self.precache().await
  }

  async fn precache(&self) -> Result<usize> {
    let manifest_url = self.config.manifest_url()?;
    let request = Request::new(Method::Get, manifest_url.clone());
    let response = self.network.fetch(&request).await?;
    if !response.ok() {
      return Err(eyre!(
        "Manifest fetch from {} returned status {}",
        manifest_url,
        response.status
      ));
    }

    let urls = precache_urls(&response.text()?, &self.config.excluded_suffix)?
      .iter()
      .map(|url| self.config.resolve(url))
      .collect::<Result<Vec<Url>>>()?;

    self.cache.open()?;
    self.cache.add_all(self.network.as_ref(), &urls).await
  }

  /// Activate: claim open pages and purge stale namespaces, concurrently.
  pub async fn activate(&self) -> Result<ActivateReport> {
    self.transition(WorkerState::Installed, WorkerState::Activating)?;
    info!("Event: activate");

    let purge = async { self.cache.purge_stale() };
    let (claimed, purged) = match tokio::try_join!(self.clients.claim(), purge) {
      Ok(results) => results,
      Err(e) => {
        // Stay installed so activation can be retried
        self.set_state(WorkerState::Installed)?;
        return Err(e);
      }
    };

    self.set_state(WorkerState::Active)?;
    self.start_monitor()?;
    info!(claimed, purged = purged.len(), "Worker active");
    Ok(ActivateReport { claimed, purged })
  }

  /// Handle a page request. Before activation nothing is intercepted.
  ///
  /// A same-origin request pointing away from the configured origin is
  /// routed as cross-origin.
  pub async fn fetch(&self, request: &Request) -> Result<FetchOutcome> {
    if self.state() != WorkerState::Active {
      return Ok(FetchOutcome::Passthrough);
    }
    let request = request.clone().resolve_mode(&self.config.origin);
    self.router.handle(&request).await
  }

  /// Run the event's work on its own task and resolve its token when done.
  pub fn dispatch(self: &Arc<Self>, event: WorkerEvent) {
    let worker = Arc::clone(self);
    tokio::spawn(async move {
      match event {
        WorkerEvent::Install(done) => done.resolve(worker.install().await.map(|_| ())),
        WorkerEvent::Activate(done) => done.resolve(worker.activate().await.map(|_| ())),
        WorkerEvent::Fetch(event) => {
          let outcome = worker.fetch(&event.request).await;
          if let Err(e) = &outcome {
            warn!(url = %event.request.url, error = %e, "Fetch handling failed");
          }
          let _ = event.respond_with.send(outcome);
        }
      }
    });
  }

  /// Start the connectivity monitor unless it is already running.
  fn start_monitor(&self) -> Result<()> {
    let mut monitor = self
      .monitor
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if monitor.as_ref().is_some_and(|m| m.is_running()) {
      return Ok(());
    }
    *monitor = Some(ConnectivityMonitor::start(
      Arc::clone(&self.connectivity),
      Arc::clone(&self.queue),
      self.config.poll_interval(),
    ));
    Ok(())
  }

  fn stop_monitor(&self) {
    if let Ok(mut monitor) = self.monitor.lock() {
      monitor.take();
    }
  }

  pub fn monitor_running(&self) -> bool {
    self
      .monitor
      .lock()
      .map(|m| m.as_ref().is_some_and(|m| m.is_running()))
      .unwrap_or(false)
  }
}

/// Asset URLs listed in a manifest, minus entries ending with `excluded_suffix`.
///
/// The manifest is a JSON object mapping logical names to deployed URLs.
pub fn precache_urls(manifest: &str, excluded_suffix: &str) -> Result<Vec<String>> {
  let entries: BTreeMap<String, String> =
    serde_json::from_str(manifest).map_err(|e| eyre!("Failed to parse asset manifest: {}", e))?;

  Ok(
    entries
      .into_values()
      .filter(|url| !url.ends_with(excluded_suffix))
      .collect(),
  )
}
