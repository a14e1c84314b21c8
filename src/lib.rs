//! Offline-resilience layer between a web application and its network.
//!
//! Outgoing requests are routed to a versioned response cache or the
//! network, writes made while offline are queued durably and replayed in
//! order once connectivity returns, and stale cache namespaces are purged on
//! activation.

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod http;
pub mod lifecycle;
pub mod logging;
pub mod queue;
pub mod router;

#[cfg(test)]
mod testing;

pub use config::{Config, RemovalPolicy};
pub use lifecycle::{LifecycleController, WorkerDeps, WorkerEvent, WorkerState};
pub use router::{FetchOutcome, Strategy};
