//! Error types for the client session.

use publisher_flv::MuxError;
use publisher_media::MediaType;
use publisher_transport::TransportError;
use thiserror::Error;

/// Errors returned by the session, queue and worker.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Payload or item allocation failed.
    #[error("Allocation failed: {0}")]
    Allocation(String),

    /// The destination could not be reached or refused to publish.
    #[error("Connect failed: {0}")]
    ConnectFailed(#[from] TransportError),

    /// Packet type cannot be published.
    #[error("Unsupported packet type: {0}")]
    UnsupportedPacketType(MediaType),

    /// Bounded queue is full and the overflow policy rejects new items.
    #[error("Queue full ({capacity} items)")]
    QueueFull { capacity: usize },

    /// Queue was closed by session teardown.
    #[error("Queue closed")]
    QueueClosed,

    /// Item hooks were not installed before first use.
    #[error("Queue item hooks not set")]
    HooksNotSet,

    /// Worker is already started.
    #[error("Already started")]
    AlreadyStarted,

    /// Worker is not started.
    #[error("Not started")]
    NotStarted,

    /// Queued packets were not delivered in time.
    #[error("Timed out waiting for queued packets to drain")]
    DrainTimeout,

    /// Worker thread could not be spawned.
    #[error("Failed to spawn worker thread: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// Muxer rejected a stream or packet.
    #[error("Mux error: {0}")]
    Mux(#[from] MuxError),
}
