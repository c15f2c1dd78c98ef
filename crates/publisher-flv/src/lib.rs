//! FLV container muxing.
//!
//! This crate turns H.264 media packets into an FLV byte stream and hands
//! each produced chunk to an output callback, typically a transport channel.

mod error;
mod muxer;
mod nal;
mod tag;

pub use error::MuxError;
pub use muxer::FlvMuxer;
pub use nal::{
    build_avc_decoder_config, extract_sps_pps, filter_parameter_sets, nals_to_avcc,
    parse_annex_b, sps_pps_from_nals, NalUnit, NalUnitType,
};
pub use tag::{
    flv_header, metadata_body, video_tag_body, write_tag, FlvTag, FlvTagReader, FlvTagType,
    FLV_HEADER_SIZE, FLV_MAX_TAG_BODY, FLV_TAG_HEADER_SIZE,
};

use publisher_media::MediaPacket;

/// Result type for muxer operations.
pub type MuxResult<T> = Result<T, MuxError>;

/// Error returned by a [`MuxOutput`] callback.
pub type OutputError = Box<dyn std::error::Error + Send + Sync>;

/// Receives container bytes together with the index of the stream they belong to.
/// Returns the number of bytes accepted.
pub type MuxOutput = Box<dyn FnMut(&[u8], usize) -> Result<usize, OutputError> + Send>;

/// A container muxer.
pub trait Muxer: Send {
    /// Declare a stream before any of its packets are written.
    /// Returns the stream index.
    fn add_stream(&mut self, descriptor: &MediaPacket) -> MuxResult<usize>;

    /// Mux one packet, invoking the output zero or more times.
    fn write_packet(&mut self, packet: &MediaPacket) -> MuxResult<()>;

    /// Flush and finalize. Later writes fail with [`MuxError::Finished`].
    fn finish(&mut self) -> MuxResult<()>;

    /// Muxer name for diagnostics.
    fn name(&self) -> &'static str;
}
