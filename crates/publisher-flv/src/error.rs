//! Error types for the muxer.

use publisher_media::MediaType;
use thiserror::Error;

use crate::OutputError;

/// Errors that can occur while muxing.
#[derive(Debug, Error)]
pub enum MuxError {
    /// Stream type the container cannot carry.
    #[error("Unsupported stream type: {0}")]
    UnsupportedStream(MediaType),

    /// Packet for a stream that was never added.
    #[error("No {0} stream registered")]
    StreamNotRegistered(MediaType),

    /// Stream added twice.
    #[error("A {0} stream is already registered")]
    DuplicateStream(MediaType),

    /// No SPS/PPS available to build the AVC sequence header.
    #[error("Missing SPS/PPS for AVC sequence header")]
    MissingParameterSets,

    /// Payload could not be interpreted.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Script data encoding failed.
    #[error("Metadata encoding failed: {0}")]
    Metadata(String),

    /// Malformed FLV input.
    #[error("Invalid FLV data: {0}")]
    InvalidFlv(String),

    /// The output callback failed.
    #[error("Output failed: {0}")]
    Output(#[source] OutputError),

    /// Write after finish.
    #[error("Muxer already finished")]
    Finished,
}
