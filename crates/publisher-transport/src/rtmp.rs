//! RTMP channel implementation.
//!
//! The channel accepts an FLV byte stream, splits it back into tags and
//! publishes each tag body as an RTMP audio, video or metadata message.
//! Network IO runs on a private current-thread tokio runtime, so the
//! channel must not be used from inside another runtime.

use std::io::Cursor;

use rml_amf0::Amf0Value;
use rml_rtmp::handshake::{Handshake, HandshakeProcessResult, PeerType};
use rml_rtmp::sessions::{
    ClientSession, ClientSessionConfig, ClientSessionEvent, ClientSessionResult,
    PublishRequestType, StreamMetadata,
};
use rml_rtmp::time::RtmpTimestamp;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info, instrument, trace, warn};

use publisher_flv::{FlvTag, FlvTagReader, FlvTagType};

use crate::channel::TransportChannel;
use crate::connection::{ConnectOptions, ConnectionState};
use crate::endpoint::RtmpEndpoint;
use crate::error::TransportError;
use crate::{TransportResult, READ_BUFFER_SIZE};

/// Transport statistics.
#[derive(Debug, Clone, Default)]
pub struct TransportStatistics {
    pub bytes_sent: u64,
    pub tags_sent: u64,
    pub tags_skipped: u64,
}

/// A connected RTMP publishing channel.
pub struct RtmpChannel {
    endpoint: RtmpEndpoint,
    runtime: Runtime,
    connection: Option<RtmpConnection>,
    reader: FlvTagReader,
    state: ConnectionState,
    statistics: TransportStatistics,
}

impl RtmpChannel {
    /// Connect, handshake, and start publishing to `url`.
    ///
    /// Either returns a channel in the `Publishing` state or fails with every
    /// resource already released.
    #[instrument(name = "rtmp_connect", skip(url, options))]
    pub fn connect(url: &str, options: &ConnectOptions) -> TransportResult<Self> {
        let endpoint = RtmpEndpoint::parse(url)?;
        info!(endpoint = %endpoint, "Connecting to RTMP server");

        let runtime = Builder::new_current_thread().enable_all().build()?;

        let timeout = options.timeout;
        let connection = runtime
            .block_on(async {
                tokio::time::timeout(timeout, RtmpConnection::open(&endpoint, options)).await
            })
            .map_err(|_| TransportError::Timeout(timeout.as_millis() as u64))??;

        info!(endpoint = %endpoint, "RTMP connection established and publishing started");

        Ok(Self {
            endpoint,
            runtime,
            connection: Some(connection),
            reader: FlvTagReader::new(),
            state: ConnectionState::Publishing,
            statistics: TransportStatistics::default(),
        })
    }

    /// Get the current connection state.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Get transport statistics.
    pub fn statistics(&self) -> TransportStatistics {
        self.statistics.clone()
    }

    /// Destination of this channel.
    pub fn endpoint(&self) -> &RtmpEndpoint {
        &self.endpoint
    }
}

impl TransportChannel for RtmpChannel {
    fn write(&mut self, data: &[u8], stream_index: usize) -> TransportResult<usize> {
        let connection = self.connection.as_mut().ok_or(TransportError::NotConnected)?;

        self.reader.push(data);
        while let Some(tag) = self.reader.next_tag()? {
            match self.runtime.block_on(connection.publish(&tag)) {
                Ok(Some(sent)) => {
                    self.statistics.bytes_sent += sent as u64;
                    self.statistics.tags_sent += 1;
                }
                Ok(None) => self.statistics.tags_skipped += 1,
                Err(e) => {
                    warn!(stream_index, error = %e, "RTMP send failed");
                    self.state = ConnectionState::Failed {
                        reason: e.to_string(),
                    };
                    return Err(e);
                }
            }
        }

        trace!(stream_index, len = data.len(), "Wrote to RTMP channel");
        Ok(data.len())
    }

    fn close(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };

        if let Err(e) = self.runtime.block_on(connection.stream.shutdown()) {
            debug!("Socket shutdown failed: {}", e);
        }
        self.state = ConnectionState::Closed;

        info!(
            endpoint = %self.endpoint,
            bytes_sent = self.statistics.bytes_sent,
            tags_sent = self.statistics.tags_sent,
            "RTMP channel closed"
        );
    }
}

impl Drop for RtmpChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// TCP stream plus the RTMP client session driving it.
struct RtmpConnection {
    stream: TcpStream,
    session: ClientSession,
}

impl RtmpConnection {
    async fn open(endpoint: &RtmpEndpoint, options: &ConnectOptions) -> TransportResult<Self> {
        let address = endpoint.address();
        let mut stream = TcpStream::connect(&address).await.map_err(|e| {
            TransportError::ConnectionFailed(format!("TCP connect to {} failed: {}", address, e))
        })?;
        stream.set_nodelay(true)?;

        debug!("TCP connection established, starting handshake");
        let leftover = handshake(&mut stream).await?;

        let mut config = ClientSessionConfig::new();
        config.chunk_size = options.chunk_size;
        let (session, initial_results) = ClientSession::new(config)
            .map_err(|e| TransportError::Protocol(format!("Session creation failed: {:?}", e)))?;

        let mut connection = Self { stream, session };
        for result in initial_results {
            connection.send(result).await?;
        }
        if !leftover.is_empty() {
            for event in connection.process_input(&leftover).await? {
                trace!(?event, "Event before connect request");
            }
        }

        debug!(app = %endpoint.app, "Requesting RTMP connection");
        let request = connection
            .session
            .request_connection(endpoint.app.clone())
            .map_err(|e| TransportError::Protocol(format!("Connection request failed: {:?}", e)))?;
        connection.send(request).await?;
        connection
            .wait_for(|event| match event {
                ClientSessionEvent::ConnectionRequestAccepted => Some(Ok(())),
                ClientSessionEvent::ConnectionRequestRejected { description } => {
                    Some(Err(TransportError::Rejected(description.clone())))
                }
                _ => None,
            })
            .await?;

        debug!("Requesting publish");
        let request = connection
            .session
            .request_publishing(endpoint.stream_key.clone(), PublishRequestType::Live)
            .map_err(|e| TransportError::Protocol(format!("Publish request failed: {:?}", e)))?;
        connection.send(request).await?;
        connection
            .wait_for(|event| match event {
                ClientSessionEvent::PublishRequestAccepted => Some(Ok(())),
                _ => None,
            })
            .await?;

        Ok(connection)
    }

    /// Write an outbound session result, if it carries bytes.
    async fn send(&mut self, result: ClientSessionResult) -> TransportResult<usize> {
        match result {
            ClientSessionResult::OutboundResponse(packet) => {
                self.stream.write_all(&packet.bytes).await?;
                Ok(packet.bytes.len())
            }
            _ => Ok(0),
        }
    }

    /// Feed server bytes to the session, answering as required.
    /// Returns the events the session raised.
    async fn process_input(&mut self, bytes: &[u8]) -> TransportResult<Vec<ClientSessionEvent>> {
        let results = self
            .session
            .handle_input(bytes)
            .map_err(|e| TransportError::Protocol(format!("Session input error: {:?}", e)))?;

        let mut events = Vec::new();
        for result in results {
            match result {
                ClientSessionResult::RaisedEvent(event) => events.push(event),
                other => {
                    self.send(other).await?;
                }
            }
        }
        Ok(events)
    }

    /// Read from the server until `check` yields an outcome for some event.
    async fn wait_for<T>(
        &mut self,
        mut check: impl FnMut(&ClientSessionEvent) -> Option<TransportResult<T>>,
    ) -> TransportResult<T> {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(TransportError::ConnectionFailed(
                    "Connection closed by server".to_string(),
                ));
            }

            for event in self.process_input(&buf[..n]).await? {
                match check(&event) {
                    Some(outcome) => return outcome,
                    None => trace!(?event, "Received event"),
                }
            }
        }
    }

    /// Publish one FLV tag. Returns the bytes written, or `None` when the tag
    /// carried nothing RTMP can send.
    async fn publish(&mut self, tag: &FlvTag) -> TransportResult<Option<usize>> {
        let timestamp = RtmpTimestamp::new(tag.timestamp_ms);
        let result = match tag.tag_type {
            FlvTagType::Video => {
                let can_be_dropped = !is_video_keyframe(&tag.data);
                self.session
                    .publish_video_data(tag.data.clone(), timestamp, can_be_dropped)
            }
            FlvTagType::Audio => self
                .session
                .publish_audio_data(tag.data.clone(), timestamp, false),
            FlvTagType::Script => match stream_metadata(&tag.data) {
                Some(metadata) => self.session.publish_metadata(&metadata),
                None => {
                    debug!("Skipping script tag without onMetaData properties");
                    return Ok(None);
                }
            },
        }
        .map_err(|e| TransportError::SendFailed(format!("Failed to publish data: {:?}", e)))?;

        Ok(Some(self.send(result).await?))
    }
}

async fn handshake(stream: &mut TcpStream) -> TransportResult<Vec<u8>> {
    let mut handshake = Handshake::new(PeerType::Client);

    let c0_c1 = handshake
        .generate_outbound_p0_and_p1()
        .map_err(|e| TransportError::Protocol(format!("Handshake generation failed: {:?}", e)))?;
    stream.write_all(&c0_c1).await?;

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(TransportError::ConnectionFailed(
                "Connection closed during handshake".to_string(),
            ));
        }

        match handshake
            .process_bytes(&buf[..n])
            .map_err(|e| TransportError::Protocol(format!("Handshake failed: {:?}", e)))?
        {
            HandshakeProcessResult::InProgress { response_bytes } => {
                if !response_bytes.is_empty() {
                    stream.write_all(&response_bytes).await?;
                }
            }
            HandshakeProcessResult::Completed {
                response_bytes,
                remaining_bytes,
            } => {
                if !response_bytes.is_empty() {
                    stream.write_all(&response_bytes).await?;
                }
                debug!("Handshake complete");
                return Ok(remaining_bytes);
            }
        }
    }
}

/// Frame type 1 in the upper nibble of the first body byte.
fn is_video_keyframe(body: &[u8]) -> bool {
    body.first().is_some_and(|byte| byte >> 4 == 1)
}

/// Convert an `onMetaData` script body into RTMP stream metadata.
fn stream_metadata(body: &[u8]) -> Option<StreamMetadata> {
    let values = rml_amf0::deserialize(&mut Cursor::new(body)).ok()?;
    let properties = values.into_iter().find_map(|value| match value {
        Amf0Value::Object(properties) => Some(properties),
        _ => None,
    })?;

    let number = |key: &str| match properties.get(key) {
        Some(Amf0Value::Number(value)) => Some(*value),
        _ => None,
    };

    let mut metadata = StreamMetadata::new();
    metadata.video_width = number("width").map(|v| v as u32);
    metadata.video_height = number("height").map(|v| v as u32);
    metadata.video_frame_rate = number("framerate").map(|v| v as f32);
    metadata.video_bitrate_kbps = number("videodatarate").map(|v| v as u32);
    metadata.video_codec_id = number("videocodecid").map(|id| id as u32);
    if let Some(Amf0Value::Utf8String(encoder)) = properties.get("encoder") {
        metadata.encoder = Some(encoder.clone());
    }

    Some(metadata)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use publisher_flv::metadata_body;
    use publisher_media::{Rational, VideoEncoderInfo};

    use super::*;

    #[test]
    fn test_is_video_keyframe() {
        assert!(is_video_keyframe(&[0x17, 0x01]));
        assert!(!is_video_keyframe(&[0x27, 0x01]));
        assert!(!is_video_keyframe(&[]));
    }

    #[test]
    fn test_stream_metadata_from_muxer_body() {
        let encoder = VideoEncoderInfo {
            width: 1920,
            height: 1080,
            framerate: Rational::new(60, 1),
            bitrate_kbps: 6000,
            ..Default::default()
        };
        let body = metadata_body(&encoder).unwrap();

        let metadata = stream_metadata(&body).unwrap();
        assert_eq!(metadata.video_width, Some(1920));
        assert_eq!(metadata.video_height, Some(1080));
        assert_eq!(metadata.video_frame_rate, Some(60.0));
        assert_eq!(metadata.video_bitrate_kbps, Some(6000));
        assert_eq!(metadata.video_codec_id, Some(7));
        assert!(metadata.encoder.is_some());
    }

    #[test]
    fn test_stream_metadata_rejects_garbage() {
        assert!(stream_metadata(&[0xFF, 0x00]).is_none());
    }

    #[test]
    fn test_connect_invalid_url() {
        let result =
            RtmpChannel::connect("http://example.com/live/key", &ConnectOptions::default());
        assert!(matches!(result, Err(TransportError::InvalidUrl(_))));
    }

    #[test]
    fn test_connect_unreachable() {
        let options = ConnectOptions::with_timeout(Duration::from_secs(2));
        let result = RtmpChannel::connect("rtmp://127.0.0.1:1/live/key", &options);
        assert!(matches!(
            result,
            Err(TransportError::ConnectionFailed(_)) | Err(TransportError::Timeout(_))
        ));
    }
}
