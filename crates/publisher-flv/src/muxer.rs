//! FLV muxer for H.264 video.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, info, instrument, trace, warn};

use publisher_media::{MediaPacket, MediaType, Rational, VideoEncoderInfo, VideoPacket};

use crate::error::MuxError;
use crate::nal::{
    build_avc_decoder_config, extract_sps_pps, filter_parameter_sets, nals_to_avcc,
    parse_annex_b, sps_pps_from_nals, NalUnit,
};
use crate::tag::{flv_header, metadata_body, video_tag_body, write_tag, FlvTagType};
use crate::{MuxOutput, MuxResult, Muxer};

/// Registered video track.
struct VideoTrack {
    index: usize,
    encoder: VideoEncoderInfo,
}

/// Writes a live FLV stream: file header and `onMetaData` first, then the
/// AVC sequence header, then one video tag per packet.
///
/// Tag timestamps are the packet dts in milliseconds relative to the first
/// packet written.
pub struct FlvMuxer {
    output: MuxOutput,
    video: Option<VideoTrack>,
    header_written: bool,
    sequence_header_sent: bool,
    base_dts_ms: Option<i64>,
    finished: bool,
    tags_written: u64,
}

impl FlvMuxer {
    /// Create a muxer that hands produced bytes to `output`.
    pub fn new(output: MuxOutput) -> Self {
        Self {
            output,
            video: None,
            header_written: false,
            sequence_header_sent: false,
            base_dts_ms: None,
            finished: false,
            tags_written: 0,
        }
    }

    /// Number of tags handed to the output so far.
    pub fn tags_written(&self) -> u64 {
        self.tags_written
    }

    fn emit(&mut self, stream_index: usize, chunk: &[u8]) -> MuxResult<()> {
        let written = (self.output)(chunk, stream_index).map_err(MuxError::Output)?;
        if written < chunk.len() {
            warn!(written, len = chunk.len(), "Short write from output");
        }
        Ok(())
    }

    /// Decoder configuration from the packet's extradata, the registered
    /// extradata, or parameter sets in the packet itself.
    fn decoder_config(&self, video: &VideoPacket, nals: &[NalUnit]) -> Option<Bytes> {
        let registered = self.video.as_ref().map(|track| &track.encoder.extradata);
        let (sps, pps) = extract_sps_pps(&video.encoder.extradata)
            .or_else(|| registered.and_then(|extradata| extract_sps_pps(extradata)))
            .or_else(|| sps_pps_from_nals(nals))?;
        build_avc_decoder_config(&sps, &pps)
    }

    /// Tag timestamp for `dts_ms` and the base it was measured against.
    /// The base is committed by the caller once the output accepted the tag.
    fn timestamp_ms(&self, dts_ms: i64) -> (u32, i64) {
        let base = self.base_dts_ms.unwrap_or(dts_ms);
        let relative = dts_ms.saturating_sub(base).clamp(0, u32::MAX as i64);
        (relative as u32, base)
    }
}

impl Muxer for FlvMuxer {
    #[instrument(name = "flv_add_stream", skip(self, descriptor))]
    fn add_stream(&mut self, descriptor: &MediaPacket) -> MuxResult<usize> {
        let video = match descriptor {
            MediaPacket::Video(video) => video,
            other => return Err(MuxError::UnsupportedStream(other.media_type())),
        };
        if self.video.is_some() {
            return Err(MuxError::DuplicateStream(MediaType::Video));
        }

        info!(
            width = video.encoder.width,
            height = video.encoder.height,
            timebase = ?video.encoder.timebase,
            "Registered video stream"
        );
        self.video = Some(VideoTrack {
            index: 0,
            encoder: video.encoder.clone(),
        });
        Ok(0)
    }

    fn write_packet(&mut self, packet: &MediaPacket) -> MuxResult<()> {
        if self.finished {
            return Err(MuxError::Finished);
        }
        let video = match packet {
            MediaPacket::Video(video) => video,
            other => return Err(MuxError::UnsupportedStream(other.media_type())),
        };
        let (index, registered_timebase) = match &self.video {
            Some(track) => (track.index, track.encoder.timebase),
            None => return Err(MuxError::StreamNotRegistered(MediaType::Video)),
        };

        let nals = parse_annex_b(video.data());
        if nals.is_empty() {
            return Err(MuxError::InvalidPayload(format!(
                "no NAL units in {} byte packet",
                video.size()
            )));
        }

        let mut chunk = BytesMut::new();
        let mut tags = 0u64;

        if !self.header_written {
            chunk.put_slice(&flv_header(false, true));
            let encoder = match &self.video {
                Some(track) => &track.encoder,
                None => &video.encoder,
            };
            write_tag(&mut chunk, FlvTagType::Script, 0, &metadata_body(encoder)?)?;
            tags += 1;
        }

        if !self.sequence_header_sent {
            let config = self
                .decoder_config(video, &nals)
                .ok_or(MuxError::MissingParameterSets)?;
            write_tag(
                &mut chunk,
                FlvTagType::Video,
                0,
                &video_tag_body(&config, true, true, 0),
            )?;
            tags += 1;
            debug!(len = config.len(), "Queued AVC sequence header");
        }

        let timebase = if video.encoder.timebase.is_valid() {
            video.encoder.timebase
        } else {
            registered_timebase
        };
        let dts_ms = timebase.rescale(video.dts, Rational::MILLIS);
        let pts_ms = timebase.rescale(video.pts, Rational::MILLIS);
        let (timestamp, base_dts_ms) = self.timestamp_ms(dts_ms);
        let composition_time_ms = pts_ms
            .saturating_sub(dts_ms)
            .clamp(i32::MIN as i64, i32::MAX as i64) as i32;

        let frame = filter_parameter_sets(nals);
        if !frame.is_empty() {
            let body = video_tag_body(
                &nals_to_avcc(&frame),
                video.key_frame,
                false,
                composition_time_ms,
            );
            write_tag(&mut chunk, FlvTagType::Video, timestamp, &body)?;
            tags += 1;
        }

        if chunk.is_empty() {
            return Ok(());
        }

        self.emit(index, &chunk)?;
        self.base_dts_ms = Some(base_dts_ms);
        self.header_written = true;
        self.sequence_header_sent = true;
        self.tags_written += tags;

        trace!(
            timestamp,
            key_frame = video.key_frame,
            len = chunk.len(),
            "Muxed video packet"
        );
        Ok(())
    }

    fn finish(&mut self) -> MuxResult<()> {
        if !self.finished {
            self.finished = true;
            debug!(tags = self.tags_written, "FLV muxer finished");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "flv"
    }
}

impl Drop for FlvMuxer {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::tag::FlvTagReader;
    use crate::{FlvTag, OutputError};

    const SPS_PPS: &[u8] = &[
        0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E, 0xAB, 0x00, 0x00, 0x00, 0x01, 0x68, 0xCE,
        0x3C, 0x80,
    ];

    fn encoder() -> VideoEncoderInfo {
        VideoEncoderInfo {
            width: 1280,
            height: 720,
            framerate: Rational::new(30, 1),
            timebase: Rational::new(1, 90_000),
            ..Default::default()
        }
    }

    fn recording_muxer() -> (FlvMuxer, Arc<Mutex<Vec<u8>>>) {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let writer = Arc::clone(&sink);
        let muxer = FlvMuxer::new(Box::new(
            move |data: &[u8], _index: usize| -> Result<usize, OutputError> {
                writer.lock().extend_from_slice(data);
                Ok(data.len())
            },
        ));
        (muxer, sink)
    }

    fn tags(bytes: &[u8]) -> Vec<FlvTag> {
        let mut reader = FlvTagReader::new();
        reader.push(bytes);
        let mut tags = Vec::new();
        while let Some(tag) = reader.next_tag().unwrap() {
            tags.push(tag);
        }
        tags
    }

    fn key_frame(pts: i64) -> MediaPacket {
        let mut data = SPS_PPS.to_vec();
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84]);
        MediaPacket::Video(VideoPacket::new(
            Bytes::from(data),
            pts,
            pts,
            true,
            encoder(),
        ))
    }

    fn inter_frame(pts: i64, dts: i64) -> MediaPacket {
        MediaPacket::Video(VideoPacket::new(
            Bytes::from_static(&[0x00, 0x00, 0x01, 0x41, 0x9A]),
            pts,
            dts,
            false,
            encoder(),
        ))
    }

    fn descriptor() -> MediaPacket {
        MediaPacket::Video(VideoPacket::new(Bytes::new(), 0, 0, false, encoder()))
    }

    #[test]
    fn test_write_before_add_stream_fails() {
        let (mut muxer, sink) = recording_muxer();
        let err = muxer.write_packet(&key_frame(0)).unwrap_err();
        assert!(matches!(err, MuxError::StreamNotRegistered(MediaType::Video)));
        assert!(sink.lock().is_empty());
    }

    #[test]
    fn test_audio_stream_unsupported() {
        let (mut muxer, _sink) = recording_muxer();
        let err = muxer
            .add_stream(&MediaPacket::new(MediaType::Audio))
            .unwrap_err();
        assert!(matches!(err, MuxError::UnsupportedStream(MediaType::Audio)));
    }

    #[test]
    fn test_duplicate_video_stream() {
        let (mut muxer, _sink) = recording_muxer();
        assert_eq!(muxer.add_stream(&descriptor()).unwrap(), 0);
        assert!(matches!(
            muxer.add_stream(&descriptor()),
            Err(MuxError::DuplicateStream(MediaType::Video))
        ));
    }

    #[test]
    fn test_first_packet_writes_header_metadata_and_sequence_header() {
        let (mut muxer, sink) = recording_muxer();
        muxer.add_stream(&descriptor()).unwrap();
        muxer.write_packet(&key_frame(0)).unwrap();

        let bytes = sink.lock().clone();
        assert_eq!(&bytes[..3], b"FLV");

        let tags = tags(&bytes);
        assert_eq!(tags.len(), 3);
        assert_eq!(tags[0].tag_type, FlvTagType::Script);
        assert_eq!(tags[1].tag_type, FlvTagType::Video);
        assert_eq!(&tags[1].data[..2], &[0x17, 0x00]);
        assert_eq!(tags[2].tag_type, FlvTagType::Video);
        assert_eq!(&tags[2].data[..2], &[0x17, 0x01]);
        // IDR slice in AVCC form, parameter sets removed
        assert_eq!(&tags[2].data[5..], &[0x00, 0x00, 0x00, 0x03, 0x65, 0x88, 0x84]);
        assert_eq!(muxer.tags_written(), 3);
    }

    #[test]
    fn test_timestamps_are_relative_milliseconds() {
        let (mut muxer, sink) = recording_muxer();
        muxer.add_stream(&descriptor()).unwrap();
        muxer.write_packet(&key_frame(90_000)).unwrap();
        muxer.write_packet(&inter_frame(99_000, 93_600)).unwrap();

        let tags = tags(&sink.lock());
        let last = tags.last().unwrap();
        assert_eq!(last.timestamp_ms, 40);
        // composition time 5400 ticks = 60 ms
        assert_eq!(&last.data[..5], &[0x27, 0x01, 0x00, 0x00, 0x3C]);
    }

    #[test]
    fn test_inter_frame_without_parameter_sets_is_rejected() {
        let (mut muxer, sink) = recording_muxer();
        muxer.add_stream(&descriptor()).unwrap();

        let err = muxer.write_packet(&inter_frame(0, 0)).unwrap_err();
        assert!(matches!(err, MuxError::MissingParameterSets));
        assert!(sink.lock().is_empty());

        // A later keyframe still gets the full preamble.
        muxer.write_packet(&key_frame(3000)).unwrap();
        assert_eq!(&sink.lock()[..3], b"FLV");
    }

    #[test]
    fn test_registered_extradata_supplies_sequence_header() {
        let (mut muxer, sink) = recording_muxer();
        let mut info = encoder();
        info.extradata = Bytes::from_static(SPS_PPS);
        let descriptor = MediaPacket::Video(VideoPacket::new(Bytes::new(), 0, 0, false, info));
        muxer.add_stream(&descriptor).unwrap();

        muxer.write_packet(&inter_frame(0, 0)).unwrap();
        assert_eq!(tags(&sink.lock()).len(), 3);
    }

    #[test]
    fn test_output_error_is_reported() {
        let mut muxer = FlvMuxer::new(Box::new(
            |_data: &[u8], _index: usize| -> Result<usize, OutputError> {
                Err("connection reset".into())
            },
        ));
        muxer.add_stream(&descriptor()).unwrap();
        let err = muxer.write_packet(&key_frame(0)).unwrap_err();
        assert!(matches!(err, MuxError::Output(_)));
        assert_eq!(muxer.tags_written(), 0);
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let (mut muxer, sink) = recording_muxer();
        muxer.add_stream(&descriptor()).unwrap();
        muxer.write_packet(&key_frame(0)).unwrap();
        muxer.write_packet(&inter_frame(i64::MAX, -1)).unwrap();
        muxer.write_packet(&inter_frame(i64::MIN, i64::MAX)).unwrap();
        muxer.write_packet(&inter_frame(3600, 3600)).unwrap();

        let tags = tags(&sink.lock());
        assert_eq!(tags.len(), 6);
        assert_eq!(tags[5].timestamp_ms, 40);
    }

    #[test]
    fn test_failed_first_write_does_not_pin_timeline() {
        let fail = Arc::new(Mutex::new(true));
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut muxer = {
            let fail = Arc::clone(&fail);
            let sink = Arc::clone(&sink);
            FlvMuxer::new(Box::new(
                move |data: &[u8], _index: usize| -> Result<usize, OutputError> {
                    if *fail.lock() {
                        return Err("not yet".into());
                    }
                    sink.lock().extend_from_slice(data);
                    Ok(data.len())
                },
            ))
        };
        muxer.add_stream(&descriptor()).unwrap();

        assert!(muxer.write_packet(&key_frame(0)).is_err());
        *fail.lock() = false;
        muxer.write_packet(&key_frame(90_000)).unwrap();
        muxer.write_packet(&inter_frame(93_600, 93_600)).unwrap();

        let tags = tags(&sink.lock());
        assert_eq!(tags[2].timestamp_ms, 0);
        assert_eq!(tags[3].timestamp_ms, 40);
    }

    #[test]
    fn test_write_after_finish_fails() {
        let (mut muxer, _sink) = recording_muxer();
        muxer.add_stream(&descriptor()).unwrap();
        muxer.finish().unwrap();
        assert!(matches!(
            muxer.write_packet(&key_frame(0)),
            Err(MuxError::Finished)
        ));
    }

    #[test]
    fn test_empty_payload_is_invalid() {
        let (mut muxer, _sink) = recording_muxer();
        muxer.add_stream(&descriptor()).unwrap();
        assert!(matches!(
            muxer.write_packet(&descriptor()),
            Err(MuxError::InvalidPayload(_))
        ));
    }
}
