//! FLV file header and tag framing.
//!
//! Layout of a tag as written to the output:
//! - Tag type: 1 byte (8 = audio, 9 = video, 18 = script data)
//! - Data size: 3 bytes (big-endian)
//! - Timestamp: 3 bytes (big-endian, lower 24 bits) + 1 byte (upper 8 bits)
//! - Stream ID: 3 bytes (always 0)
//! - Data: variable
//! - Previous tag size: 4 bytes (11 + data size)

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rml_amf0::Amf0Value;
use tracing::debug;

use publisher_media::VideoEncoderInfo;

use crate::error::MuxError;
use crate::MuxResult;

/// Size of the FLV file header, not counting the first previous-tag-size field.
pub const FLV_HEADER_SIZE: usize = 9;

/// Size of the header in front of every tag.
pub const FLV_TAG_HEADER_SIZE: usize = 11;

/// Largest body the 3-byte data size field can describe.
pub const FLV_MAX_TAG_BODY: usize = 0x00FF_FFFF;

/// Codec id of AVC in the video tag body.
const CODEC_ID_AVC: u8 = 0x07;

/// FLV tag types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlvTagType {
    Audio = 8,
    Video = 9,
    Script = 18,
}

impl TryFrom<u8> for FlvTagType {
    type Error = MuxError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value & 0x1F {
            8 => Ok(Self::Audio),
            9 => Ok(Self::Video),
            18 => Ok(Self::Script),
            other => Err(MuxError::InvalidFlv(format!("unknown tag type {}", other))),
        }
    }
}

/// One parsed FLV tag.
#[derive(Debug, Clone, PartialEq)]
pub struct FlvTag {
    pub tag_type: FlvTagType,
    pub timestamp_ms: u32,
    /// Tag body (what RTMP carries as the message payload).
    pub data: Bytes,
}

/// FLV file header followed by the zero previous-tag-size field.
pub fn flv_header(has_audio: bool, has_video: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(FLV_HEADER_SIZE + 4);
    buf.put_slice(b"FLV");
    buf.put_u8(0x01);
    let mut flags = 0u8;
    if has_audio {
        flags |= 0x04;
    }
    if has_video {
        flags |= 0x01;
    }
    buf.put_u8(flags);
    buf.put_u32(FLV_HEADER_SIZE as u32);
    buf.put_u32(0);
    buf.freeze()
}

/// Append a complete tag, including its trailing previous-tag-size field.
///
/// Bodies larger than [`FLV_MAX_TAG_BODY`] are rejected and `buf` is left
/// untouched.
pub fn write_tag(
    buf: &mut BytesMut,
    tag_type: FlvTagType,
    timestamp_ms: u32,
    body: &[u8],
) -> MuxResult<()> {
    if body.len() > FLV_MAX_TAG_BODY {
        return Err(MuxError::InvalidPayload(format!(
            "{} byte tag body exceeds FLV limit of {} bytes",
            body.len(),
            FLV_MAX_TAG_BODY
        )));
    }
    buf.reserve(FLV_TAG_HEADER_SIZE + body.len() + 4);
    buf.put_u8(tag_type as u8);
    buf.put_uint(body.len() as u64, 3);
    buf.put_uint((timestamp_ms & 0x00FF_FFFF) as u64, 3);
    buf.put_u8((timestamp_ms >> 24) as u8);
    buf.put_uint(0, 3);
    buf.put_slice(body);
    buf.put_u32((FLV_TAG_HEADER_SIZE + body.len()) as u32);
    Ok(())
}

/// Body of an H.264 video tag.
///
/// - Frame type (4 bits, 1 = keyframe, 2 = inter frame) + codec id (4 bits, 7 = AVC)
/// - AVC packet type: 0 = sequence header, 1 = NALU
/// - Composition time offset: 3 bytes, signed big-endian (pts - dts)
pub fn video_tag_body(
    data: &[u8],
    is_keyframe: bool,
    is_sequence_header: bool,
    composition_time_ms: i32,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + data.len());
    let frame_type = if is_keyframe { 0x10 } else { 0x20 };
    buf.put_u8(frame_type | CODEC_ID_AVC);
    buf.put_u8(if is_sequence_header { 0x00 } else { 0x01 });
    buf.put_uint((composition_time_ms as u32 & 0x00FF_FFFF) as u64, 3);
    buf.put_slice(data);
    buf.freeze()
}

/// `onMetaData` script tag body describing the video stream.
pub fn metadata_body(encoder: &VideoEncoderInfo) -> MuxResult<Bytes> {
    let mut properties = HashMap::new();
    properties.insert("duration".to_string(), Amf0Value::Number(0.0));
    properties.insert("width".to_string(), Amf0Value::Number(encoder.width as f64));
    properties.insert("height".to_string(), Amf0Value::Number(encoder.height as f64));
    properties.insert(
        "videocodecid".to_string(),
        Amf0Value::Number(CODEC_ID_AVC as f64),
    );
    if encoder.framerate.is_valid() {
        properties.insert(
            "framerate".to_string(),
            Amf0Value::Number(encoder.framerate.as_f64()),
        );
    }
    if encoder.bitrate_kbps > 0 {
        properties.insert(
            "videodatarate".to_string(),
            Amf0Value::Number(encoder.bitrate_kbps as f64),
        );
    }
    properties.insert(
        "encoder".to_string(),
        Amf0Value::Utf8String(concat!("publisher/", env!("CARGO_PKG_VERSION")).to_string()),
    );

    let values = vec![
        Amf0Value::Utf8String("onMetaData".to_string()),
        Amf0Value::Object(properties),
    ];
    let bytes = rml_amf0::serialize(&values)
        .map_err(|e| MuxError::Metadata(format!("{:?}", e)))?;
    Ok(Bytes::from(bytes))
}

/// Incremental FLV demuxer.
///
/// Bytes may arrive in arbitrary pieces; complete tags are returned as soon
/// as they are buffered. A leading FLV file header is skipped.
#[derive(Debug, Default)]
pub struct FlvTagReader {
    buf: BytesMut,
    header_checked: bool,
}

impl FlvTagReader {
    /// Create an empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer more input.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of bytes waiting for a complete tag.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete tag, or `None` when more input is needed.
    ///
    /// On malformed input the buffer is discarded so the next write starts
    /// clean.
    pub fn next_tag(&mut self) -> MuxResult<Option<FlvTag>> {
        if !self.header_checked {
            if self.buf.len() < 3 {
                return Ok(None);
            }
            if &self.buf[..3] == b"FLV" {
                if self.buf.len() < FLV_HEADER_SIZE {
                    return Ok(None);
                }
                let header_len = (&self.buf[5..9]).get_u32() as usize;
                if self.buf.len() < header_len + 4 {
                    return Ok(None);
                }
                self.buf.advance(header_len + 4);
                debug!("Skipped FLV file header");
            }
            self.header_checked = true;
        }

        if self.buf.len() < FLV_TAG_HEADER_SIZE {
            return Ok(None);
        }

        let tag_type = match FlvTagType::try_from(self.buf[0]) {
            Ok(tag_type) => tag_type,
            Err(e) => {
                self.buf.clear();
                return Err(e);
            }
        };
        let size = (&self.buf[1..4]).get_uint(3) as usize;
        let timestamp_low = (&self.buf[4..7]).get_uint(3) as u32;
        let timestamp_ms = timestamp_low | ((self.buf[7] as u32) << 24);

        let total = FLV_TAG_HEADER_SIZE + size + 4;
        if self.buf.len() < total {
            return Ok(None);
        }

        let mut tag = self.buf.split_to(total);
        tag.advance(FLV_TAG_HEADER_SIZE);
        tag.truncate(size);

        Ok(Some(FlvTag {
            tag_type,
            timestamp_ms,
            data: tag.freeze(),
        }))
    }
}
