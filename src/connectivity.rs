//! Online/offline state and the periodic replay trigger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};
use url::Url;

use crate::http::{Method, Network, Request};
use crate::queue::OfflineWriteQueue;

/// Synchronous view of connectivity. Routing decisions never wait on it.
pub trait Connectivity: Send + Sync {
  fn is_online(&self) -> bool;
}

/// Connectivity flag set by whoever observes the network.
#[derive(Debug, Clone)]
pub struct OnlineFlag(Arc<AtomicBool>);

impl OnlineFlag {
  pub fn new(online: bool) -> Self {
    Self(Arc::new(AtomicBool::new(online)))
  }

  /// Update the flag, returning the previous value.
  pub fn set_online(&self, online: bool) -> bool {
    self.0.swap(online, Ordering::SeqCst)
  }
}

impl Default for OnlineFlag {
  fn default() -> Self {
    Self::new(true)
  }
}

impl Connectivity for OnlineFlag {
  fn is_online(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// Fixed-period poll that starts a queue drain on every tick where the
/// client is online.
///
/// Drains are spawned, not awaited, so a slow drain never delays the next
/// tick; the queue's own guard turns overlapping drains into no-ops. The
/// task is aborted when the monitor is dropped.
pub struct ConnectivityMonitor {
  handle: JoinHandle<()>,
}

impl ConnectivityMonitor {
  pub fn start(
    connectivity: Arc<dyn Connectivity>,
    queue: Arc<OfflineWriteQueue>,
    period: Duration,
  ) -> Self {
    let handle = tokio::spawn(async move {
      let mut ticker = interval_at(Instant::now() + period, period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

      loop {
        ticker.tick().await;
        if !connectivity.is_online() {
          continue;
        }

        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
          if let Err(e) = queue.drain_and_replay().await {
            error!(error = %e, "Queue drain failed");
          }
        });
      }
    });

    debug!(period_ms = period.as_millis() as u64, "Connectivity monitor started");
    Self { handle }
  }

  pub fn is_running(&self) -> bool {
    !self.handle.is_finished()
  }

  pub fn stop(&self) {
    self.handle.abort();
  }
}

impl Drop for ConnectivityMonitor {
  fn drop(&mut self) {
    self.handle.abort();
  }
}

/// Keep `flag` current by probing `url` with a HEAD request every `period`.
///
/// Any HTTP response counts as online; only a rejected request means offline.
pub fn spawn_probe(
  network: Arc<dyn Network>,
  url: Url,
  flag: OnlineFlag,
  period: Duration,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let request = Request::new(Method::Head, url);

    loop {
      ticker.tick().await;
      let online = network.fetch(&request).await.is_ok();
      let was_online = flag.set_online(online);
      if online != was_online {
        info!(online, "Connectivity changed");
      }
    }
  })
}
