//! Media packet types for the publisher.
//!
//! Packets own their payload bytes and carry the timing and encoder
//! metadata the muxer needs to frame them.

mod encoder;
mod packet;

pub use encoder::{AudioCodec, AudioEncoderInfo, Rational, VideoCodec, VideoEncoderInfo};
pub use packet::{AudioPacket, MediaPacket, MediaType, SubtitlePacket, VideoPacket};

/// Payload buffers are allocated in multiples of this many bytes.
pub const PACKET_ALIGNMENT: usize = 16;

/// Round `len` up to the next multiple of [`PACKET_ALIGNMENT`].
pub fn aligned_size(len: usize) -> usize {
    len.div_ceil(PACKET_ALIGNMENT) * PACKET_ALIGNMENT
}
