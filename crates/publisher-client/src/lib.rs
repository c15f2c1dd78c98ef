//! Live media publishing client.
//!
//! A [`Session`] owns one transport channel, one [`TransferQueue`] of media
//! packets and one [`StreamWorker`] thread. Producers call
//! [`Session::send_packet`] from any thread; the worker drains the queue,
//! muxes each packet to FLV and writes the bytes to the channel.

mod config;
mod envelope;
mod error;
mod queue;
mod session;
mod stats;
mod worker;

#[cfg(test)]
mod testing;

pub use config::{ClientConfig, OverflowPolicy};
pub use envelope::{MediaItemHooks, PacketItem, PacketQueue, PacketStamp};
pub use error::ClientError;
pub use queue::{Item, ItemHooks, TransferQueue};
pub use session::{PacketSender, Session};
pub use stats::{SessionStatistics, StatisticsSnapshot};
pub use worker::{StreamWorker, WorkerContext, WorkerState};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Name of the streaming worker thread.
pub const WORKER_THREAD_NAME: &str = "publisher-stream";

/// Default idle wait of the streaming worker.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

/// Interval between periodic worker statistics logs.
pub const STATS_LOG_INTERVAL_SECS: u64 = 5;
