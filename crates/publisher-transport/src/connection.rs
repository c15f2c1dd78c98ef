//! Connection state and options.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_CONNECT_TIMEOUT_MS};

/// Connection state of an RTMP channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,

    /// TCP connect and RTMP handshake in progress.
    Connecting,

    /// Publish accepted; media may be written.
    Publishing,

    /// Closed by the client.
    Closed,

    /// Connection failed.
    Failed { reason: String },
}

impl ConnectionState {
    /// Check if media can be written.
    pub fn is_publishing(&self) -> bool {
        matches!(self, Self::Publishing)
    }

    /// Check if failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Get status message for logs.
    pub fn message(&self) -> String {
        match self {
            Self::Disconnected => "Disconnected".to_string(),
            Self::Connecting => "Connecting...".to_string(),
            Self::Publishing => "Publishing".to_string(),
            Self::Closed => "Closed".to_string(),
            Self::Failed { reason } => format!("Failed: {}", reason),
        }
    }
}

/// Options for establishing an RTMP connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Upper bound for TCP connect, handshake, connect and publish together.
    pub timeout: Duration,

    /// Outbound chunk size announced to the server.
    pub chunk_size: u32,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ConnectOptions {
    /// Options with the given overall timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}
