//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use publisher_transport::{ConnectOptions, DEFAULT_CONNECT_TIMEOUT_MS};

use crate::DEFAULT_POLL_INTERVAL_MS;

/// Shortest idle wait the worker will use.
const MIN_POLL_INTERVAL_MS: u64 = 1;

/// What a bounded queue does when a push finds it full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Refuse the new packet; the sender gets `QueueFull`.
    #[default]
    RejectNew,

    /// Evict the oldest queued packet to make room.
    DropOldest,
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Upper bound on how long the idle worker waits before re-checking
    /// its run flag. Values below 1 ms are raised to 1 ms.
    pub poll_interval_ms: u64,

    /// Maximum queued packets. `None` leaves the queue unbounded.
    pub queue_capacity: Option<usize>,

    /// Applied when `queue_capacity` is reached.
    pub overflow: OverflowPolicy,

    /// Discard packets queued before the worker starts.
    pub flush_on_start: bool,

    /// Upper bound for connect, handshake and publish.
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            queue_capacity: None,
            overflow: OverflowPolicy::default(),
            flush_on_start: true,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Transport options derived from this configuration.
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions::with_timeout(self.connect_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(200));
        assert_eq!(config.queue_capacity, None);
        assert_eq!(config.overflow, OverflowPolicy::RejectNew);
        assert!(config.flush_on_start);
        assert_eq!(config.connect_options().timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_zero_poll_interval_is_raised() {
        let config: ClientConfig = serde_json::from_str(r#"{"poll_interval_ms": 0}"#).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"queue_capacity": 64, "overflow": "drop_oldest"}"#).unwrap();
        assert_eq!(config.queue_capacity, Some(64));
        assert_eq!(config.overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.poll_interval_ms, 200);
        assert!(config.flush_on_start);
    }
}
