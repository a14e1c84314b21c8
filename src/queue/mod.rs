//! Durable queue of writes made while offline, replayed once connectivity returns.

mod replay;
mod store;

pub use replay::{DrainReport, OfflineWriteQueue};
pub use store::{NewQueuedRequest, QueueStore, QueuedRequest, SqliteQueueStore};
