//! Media packet storage.

use std::collections::TryReserveError;
use std::fmt;

use bytes::Bytes;
use tracing::warn;

use crate::aligned_size;
use crate::encoder::{AudioEncoderInfo, VideoEncoderInfo};

/// Kind of media carried by a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Video,
    Audio,
    Subtitle,
}

impl MediaType {
    /// Returns a simple string representation of the type.
    pub fn name(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Subtitle => "subtitle",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An encoded video sample.
#[derive(Debug, Clone, Default)]
pub struct VideoPacket {
    data: Bytes,

    /// Presentation timestamp in `encoder.timebase` units.
    pub pts: i64,

    /// Decode timestamp in `encoder.timebase` units.
    pub dts: i64,

    /// Whether this is a keyframe.
    pub key_frame: bool,

    /// Encoder that produced the sample.
    pub encoder: VideoEncoderInfo,
}

impl VideoPacket {
    /// Create a video packet that shares `data` without copying it.
    pub fn new(
        data: Bytes,
        pts: i64,
        dts: i64,
        key_frame: bool,
        encoder: VideoEncoderInfo,
    ) -> Self {
        Self {
            data,
            pts,
            dts,
            key_frame,
            encoder,
        }
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload bytes as a shared buffer.
    pub fn payload(&self) -> &Bytes {
        &self.data
    }

    /// Payload length in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Copy the timing fields and encoder descriptor, leaving the payload empty.
    pub fn metadata_copy(&self) -> Self {
        Self {
            data: Bytes::new(),
            pts: self.pts,
            dts: self.dts,
            key_frame: self.key_frame,
            encoder: self.encoder.clone(),
        }
    }
}

/// An encoded audio sample.
#[derive(Debug, Clone, Default)]
pub struct AudioPacket {
    data: Bytes,
    pub pts: i64,
    pub dts: i64,
    pub encoder: AudioEncoderInfo,
}

impl AudioPacket {
    /// Create an audio packet that shares `data` without copying it.
    pub fn new(data: Bytes, pts: i64, dts: i64, encoder: AudioEncoderInfo) -> Self {
        Self {
            data,
            pts,
            dts,
            encoder,
        }
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload length in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Copy the timing fields and encoder descriptor, leaving the payload empty.
    pub fn metadata_copy(&self) -> Self {
        Self {
            data: Bytes::new(),
            pts: self.pts,
            dts: self.dts,
            encoder: self.encoder.clone(),
        }
    }
}

/// A subtitle cue. Carried through the type system but never published.
#[derive(Debug, Clone, Default)]
pub struct SubtitlePacket {
    pub text: String,
    pub pts: i64,
    pub duration: i64,
}

/// One timestamped unit of media.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum MediaPacket {
    Video(VideoPacket),
    Audio(AudioPacket),
    Subtitle(SubtitlePacket),
}

impl MediaPacket {
    /// Create an empty packet of the given type.
    pub fn new(media_type: MediaType) -> Self {
        match media_type {
            MediaType::Video => Self::Video(VideoPacket::default()),
            MediaType::Audio => Self::Audio(AudioPacket::default()),
            MediaType::Subtitle => Self::Subtitle(SubtitlePacket::default()),
        }
    }

    /// Type of media carried.
    pub fn media_type(&self) -> MediaType {
        match self {
            Self::Video(_) => MediaType::Video,
            Self::Audio(_) => MediaType::Audio,
            Self::Subtitle(_) => MediaType::Subtitle,
        }
    }

    /// Replace the payload with a fresh copy of `src`.
    ///
    /// The buffer capacity is `src.len()` rounded up to
    /// [`PACKET_ALIGNMENT`](crate::PACKET_ALIGNMENT). Subtitle packets have no
    /// binary payload and are left untouched.
    pub fn copy_in(&mut self, src: &[u8]) -> Result<(), TryReserveError> {
        match self {
            Self::Video(video) => video.data = copy_payload(src)?,
            Self::Audio(audio) => audio.data = copy_payload(src)?,
            Self::Subtitle(_) => {
                warn!(media_type = %MediaType::Subtitle, "Copy-in not supported for packet type");
            }
        }
        Ok(())
    }

    /// Deep copy of everything except the payload bytes.
    pub fn metadata_copy(&self) -> Self {
        match self {
            Self::Video(video) => Self::Video(video.metadata_copy()),
            Self::Audio(audio) => Self::Audio(audio.metadata_copy()),
            Self::Subtitle(subtitle) => Self::Subtitle(subtitle.clone()),
        }
    }

    /// Payload length in bytes.
    pub fn size(&self) -> usize {
        match self {
            Self::Video(video) => video.size(),
            Self::Audio(audio) => audio.size(),
            Self::Subtitle(subtitle) => subtitle.text.len(),
        }
    }

    /// Presentation timestamp in the packet's own timebase.
    pub fn pts(&self) -> i64 {
        match self {
            Self::Video(video) => video.pts,
            Self::Audio(audio) => audio.pts,
            Self::Subtitle(subtitle) => subtitle.pts,
        }
    }

    /// Decode timestamp; subtitles use their presentation time.
    pub fn dts(&self) -> i64 {
        match self {
            Self::Video(video) => video.dts,
            Self::Audio(audio) => audio.dts,
            Self::Subtitle(subtitle) => subtitle.pts,
        }
    }

    /// Whether this is a video keyframe.
    pub fn is_key_frame(&self) -> bool {
        matches!(self, Self::Video(video) if video.key_frame)
    }

    /// Borrow the video variant.
    pub fn as_video(&self) -> Option<&VideoPacket> {
        match self {
            Self::Video(video) => Some(video),
            _ => None,
        }
    }
}

impl From<VideoPacket> for MediaPacket {
    fn from(packet: VideoPacket) -> Self {
        Self::Video(packet)
    }
}

impl From<AudioPacket> for MediaPacket {
    fn from(packet: AudioPacket) -> Self {
        Self::Audio(packet)
    }
}

fn copy_payload(src: &[u8]) -> Result<Bytes, TryReserveError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(aligned_size(src.len()))?;
    buf.extend_from_slice(src);
    Ok(Bytes::from(buf))
}
