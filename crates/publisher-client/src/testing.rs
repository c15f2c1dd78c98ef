//! Transport and muxer doubles shared by the unit tests.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use publisher_flv::{MuxError, MuxOutput, MuxResult, Muxer};
use publisher_media::{MediaPacket, MediaType, Rational, VideoEncoderInfo, VideoPacket};
use publisher_transport::{Connector, TransportChannel, TransportError, TransportResult};

/// Bytes written to a [`MemoryChannel`], with their stream index.
pub type Writes = Arc<Mutex<Vec<(usize, Vec<u8>)>>>;

/// Transport channel that records writes in memory.
pub struct MemoryChannel {
    writes: Writes,
    closed: Arc<Mutex<bool>>,
}

impl TransportChannel for MemoryChannel {
    fn write(&mut self, data: &[u8], stream_index: usize) -> TransportResult<usize> {
        if *self.closed.lock() {
            return Err(TransportError::NotConnected);
        }
        self.writes.lock().push((stream_index, data.to_vec()));
        Ok(data.len())
    }

    fn close(&mut self) {
        *self.closed.lock() = true;
    }
}

/// Hands out [`MemoryChannel`]s, or fails every connect.
#[derive(Default)]
pub struct MemoryConnector {
    pub writes: Writes,
    pub closed: Arc<Mutex<bool>>,
    pub refuse: bool,
}

impl MemoryConnector {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Default::default()
        }
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, url: &str) -> TransportResult<Box<dyn TransportChannel>> {
        if self.refuse {
            return Err(TransportError::ConnectionFailed(format!("{} refused", url)));
        }
        Ok(Box::new(MemoryChannel {
            writes: Arc::clone(&self.writes),
            closed: Arc::clone(&self.closed),
        }))
    }
}

/// A packet as seen by the [`RecordingMuxer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub pts: i64,
    pub key_frame: bool,
    pub data: Vec<u8>,
}

/// Shared view of what a [`RecordingMuxer`] saw.
#[derive(Clone, Default)]
pub struct Recording {
    pub packets: Arc<Mutex<Vec<Recorded>>>,
    pub streams: Arc<Mutex<Vec<MediaType>>>,
    pub finished: Arc<Mutex<bool>>,
}

impl Recording {
    pub fn muxer(&self, output: MuxOutput) -> Box<dyn Muxer> {
        self.muxer_failing_at(output, None)
    }

    /// A muxer that rejects the packet with `fail_pts`.
    pub fn muxer_failing_at(&self, output: MuxOutput, fail_pts: Option<i64>) -> Box<dyn Muxer> {
        Box::new(RecordingMuxer {
            output,
            recording: self.clone(),
            fail_pts,
        })
    }

    pub fn pts(&self) -> Vec<i64> {
        self.packets.lock().iter().map(|packet| packet.pts).collect()
    }
}

/// Muxer that records packets and writes each payload through unchanged.
pub struct RecordingMuxer {
    output: MuxOutput,
    recording: Recording,
    fail_pts: Option<i64>,
}

impl Muxer for RecordingMuxer {
    fn add_stream(&mut self, descriptor: &MediaPacket) -> MuxResult<usize> {
        let mut streams = self.recording.streams.lock();
        streams.push(descriptor.media_type());
        Ok(streams.len() - 1)
    }

    fn write_packet(&mut self, packet: &MediaPacket) -> MuxResult<()> {
        let video = packet
            .as_video()
            .ok_or(MuxError::UnsupportedStream(packet.media_type()))?;
        if self.fail_pts == Some(video.pts) {
            return Err(MuxError::InvalidPayload("rejected by test".to_string()));
        }
        self.recording.packets.lock().push(Recorded {
            pts: video.pts,
            key_frame: video.key_frame,
            data: video.data().to_vec(),
        });
        (self.output)(video.data(), 0).map_err(MuxError::Output)?;
        Ok(())
    }

    fn finish(&mut self) -> MuxResult<()> {
        *self.recording.finished.lock() = true;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

pub fn video_encoder() -> VideoEncoderInfo {
    VideoEncoderInfo {
        width: 640,
        height: 360,
        framerate: Rational::new(25, 1),
        timebase: Rational::new(1, 1000),
        ..Default::default()
    }
}

pub fn video_packet(pts: i64, payload: &[u8]) -> MediaPacket {
    MediaPacket::Video(VideoPacket::new(
        Bytes::copy_from_slice(payload),
        pts,
        pts,
        pts == 0,
        video_encoder(),
    ))
}

pub fn video_descriptor() -> MediaPacket {
    MediaPacket::Video(VideoPacket::new(Bytes::new(), 0, 0, false, video_encoder()))
}
