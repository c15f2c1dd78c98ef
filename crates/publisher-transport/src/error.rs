//! Error types for the transport module.

use publisher_flv::MuxError;
use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timed out.
    #[error("Connection timed out after {0} ms")]
    Timeout(u64),

    /// Server rejected the connect or publish request.
    #[error("Rejected by server: {0}")]
    Rejected(String),

    /// Invalid RTMP URL.
    #[error("Invalid RTMP URL: {0}")]
    InvalidUrl(String),

    /// Send failed.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Not connected (never connected, or already closed).
    #[error("Not connected")]
    NotConnected,

    /// Written bytes are not a valid FLV stream.
    #[error("Invalid stream data: {0}")]
    InvalidStream(#[from] MuxError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// RTMP protocol error.
    #[error("RTMP protocol error: {0}")]
    Protocol(String),
}
