//! RTMP publishing transport.
//!
//! This crate connects to an RTMP server, enters publish mode and forwards
//! an FLV byte stream as RTMP media messages.

mod channel;
mod connection;
mod endpoint;
mod error;
mod rtmp;

pub use channel::{Connector, RtmpConnector, TransportChannel};
pub use connection::{ConnectOptions, ConnectionState};
pub use endpoint::RtmpEndpoint;
pub use error::TransportError;
pub use rtmp::{RtmpChannel, TransportStatistics};

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Default RTMP port.
pub const DEFAULT_RTMP_PORT: u16 = 1935;

/// Default upper bound for establishing a publishing connection.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Outbound chunk size requested after connecting.
pub const DEFAULT_CHUNK_SIZE: u32 = 4096;

/// Socket read buffer size.
pub const READ_BUFFER_SIZE: usize = 4096;
