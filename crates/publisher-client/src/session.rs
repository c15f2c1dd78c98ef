//! Publishing session.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, trace, warn};

use publisher_flv::{FlvMuxer, MuxOutput, Muxer, OutputError};
use publisher_media::MediaPacket;
use publisher_transport::{Connector, RtmpConnector, TransportChannel};

use crate::config::ClientConfig;
use crate::envelope::{MediaItemHooks, PacketQueue};
use crate::error::ClientError;
use crate::stats::{SessionStatistics, StatisticsSnapshot};
use crate::worker::{StreamWorker, WorkerContext, WorkerState};
use crate::ClientResult;

const DRAIN_CHECK_INTERVAL: Duration = Duration::from_millis(5);

/// A live publishing session: one transport channel, one packet queue, one
/// streaming worker and one muxer.
///
/// Dropping the session performs the same teardown as [`Session::destroy`].
pub struct Session {
    config: ClientConfig,
    channel: Arc<Mutex<Box<dyn TransportChannel>>>,
    muxer: Arc<Mutex<Box<dyn Muxer>>>,
    queue: Arc<PacketQueue>,
    worker: StreamWorker,
    statistics: Arc<SessionStatistics>,
    torn_down: bool,
}

impl Session {
    /// Connect to `destination` with the default configuration.
    pub fn create(destination: &str) -> ClientResult<Self> {
        Self::create_with_config(destination, ClientConfig::default())
    }

    /// Connect to `destination` over RTMP.
    pub fn create_with_config(destination: &str, config: ClientConfig) -> ClientResult<Self> {
        let connector = RtmpConnector::new(config.connect_options());
        Self::create_with(destination, config, &connector)
    }

    /// Connect through `connector` and mux to FLV.
    pub fn create_with(
        destination: &str,
        config: ClientConfig,
        connector: &dyn Connector,
    ) -> ClientResult<Self> {
        Self::create_with_muxer(destination, config, connector, |output| -> Box<dyn Muxer> {
            Box::new(FlvMuxer::new(output))
        })
    }

    /// Connect through `connector` and mux with the muxer `make_muxer` builds
    /// around the channel output.
    ///
    /// Either returns a ready session with the worker not started, or fails
    /// having released everything it acquired.
    #[instrument(name = "session_create", skip_all)]
    pub fn create_with_muxer<F>(
        destination: &str,
        config: ClientConfig,
        connector: &dyn Connector,
        make_muxer: F,
    ) -> ClientResult<Self>
    where
        F: FnOnce(MuxOutput) -> Box<dyn Muxer>,
    {
        info!("Creating publishing session");

        let channel = connector.connect(destination).map_err(|e| {
            error!("Session creation failed: {}", e);
            ClientError::ConnectFailed(e)
        })?;
        let channel = Arc::new(Mutex::new(channel));
        let statistics = Arc::new(SessionStatistics::new());

        let output: MuxOutput = {
            let channel = Arc::clone(&channel);
            let statistics = Arc::clone(&statistics);
            Box::new(
                move |data: &[u8], stream_index: usize| -> Result<usize, OutputError> {
                    let written = channel.lock().write(data, stream_index)?;
                    statistics.record_bytes_written(written as u64);
                    Ok(written)
                },
            )
        };
        let muxer = make_muxer(output);

        let queue = PacketQueue::new(config.queue_capacity, config.overflow);
        queue.set_hooks(MediaItemHooks);

        info!(
            muxer = muxer.name(),
            queue_capacity = ?config.queue_capacity,
            "Publishing session ready"
        );

        Ok(Self {
            config,
            channel,
            muxer: Arc::new(Mutex::new(muxer)),
            queue: Arc::new(queue),
            worker: StreamWorker::new(),
            statistics,
            torn_down: false,
        })
    }

    /// Declare a stream. Must precede [`Session::start`].
    pub fn add_stream(&self, descriptor: &MediaPacket) -> ClientResult<usize> {
        if self.worker.is_started() {
            return Err(ClientError::AlreadyStarted);
        }
        let index = self.muxer.lock().add_stream(descriptor)?;
        info!(index, media_type = %descriptor.media_type(), "Stream added");
        Ok(index)
    }

    /// Queue a copy of `packet` for publishing.
    ///
    /// Video is queued, audio is accepted and discarded, anything else is
    /// rejected.
    pub fn send_packet(&self, packet: &MediaPacket) -> ClientResult<()> {
        enqueue(&self.queue, &self.statistics, packet)
    }

    /// A cloneable handle for sending packets from other threads.
    pub fn sender(&self) -> PacketSender {
        PacketSender {
            queue: Arc::clone(&self.queue),
            statistics: Arc::clone(&self.statistics),
        }
    }

    /// Start the streaming worker.
    #[instrument(name = "session_start", skip(self))]
    pub fn start(&mut self) -> ClientResult<()> {
        self.worker.start(WorkerContext {
            queue: Arc::clone(&self.queue),
            muxer: Arc::clone(&self.muxer),
            statistics: Arc::clone(&self.statistics),
            poll_interval: self.config.poll_interval(),
            flush_on_start: self.config.flush_on_start,
        })
    }

    /// Stop the streaming worker. Safe when never started.
    #[instrument(name = "session_stop", skip(self))]
    pub fn stop(&mut self) {
        self.worker.stop();
    }

    /// Block until every queued packet has been written, or `timeout` passes.
    pub fn wait_for_drain(&self, timeout: Duration) -> ClientResult<()> {
        if !self.worker.is_started() {
            return Err(ClientError::NotStarted);
        }

        let deadline = Instant::now() + timeout;
        while self.queue.live_items() > 0 {
            if Instant::now() >= deadline {
                warn!(remaining = self.queue.live_items(), "Queue did not drain in time");
                return Err(ClientError::DrainTimeout);
            }
            thread::sleep(DRAIN_CHECK_INTERVAL);
        }
        Ok(())
    }

    pub fn worker_state(&self) -> WorkerState {
        self.worker.state()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot(self.queue.len(), self.queue.evicted())
    }

    /// Stop the worker, then release channel, queue and muxer.
    pub fn destroy(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.worker.stop();

        self.channel.lock().close();

        self.queue.close();
        let drained = self.queue.flush();

        if let Err(e) = self.muxer.lock().finish() {
            debug!("Muxer finish failed: {}", e);
        }

        info!(
            drained,
            packets_sent = self.statistics.snapshot(0, 0).packets_sent,
            "Publishing session destroyed"
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Producer handle. Sending after the session is destroyed fails with
/// [`ClientError::QueueClosed`].
#[derive(Clone)]
pub struct PacketSender {
    queue: Arc<PacketQueue>,
    statistics: Arc<SessionStatistics>,
}

impl PacketSender {
    /// Queue a copy of `packet`; same rules as [`Session::send_packet`].
    pub fn send(&self, packet: &MediaPacket) -> ClientResult<()> {
        enqueue(&self.queue, &self.statistics, packet)
    }
}

fn enqueue(
    queue: &PacketQueue,
    statistics: &SessionStatistics,
    packet: &MediaPacket,
) -> ClientResult<()> {
    match packet {
        MediaPacket::Video(video) => {
            let shell = MediaPacket::Video(video.metadata_copy());
            let item = queue.item_alloc(video.data(), shell)?;
            let stamp = item.opaque();

            if let Err(e) = queue.push(item) {
                statistics.record_rejected();
                debug!(pts = stamp.pts, "Packet not queued: {}", e);
                return Err(e);
            }

            statistics.record_queued();
            trace!(pts = stamp.pts, size = stamp.size, "Packet queued");
            Ok(())
        }
        MediaPacket::Audio(audio) => {
            trace!(pts = audio.pts, "Audio packet accepted, not published");
            Ok(())
        }
        other => {
            let media_type = other.media_type();
            warn!(%media_type, "Rejecting unsupported packet type");
            Err(ClientError::UnsupportedPacketType(media_type))
        }
    }
}
