//! Streaming worker.
//!
//! A single background thread pops packets from the queue, muxes them and
//! lets the muxer output write the bytes to the transport channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, trace, warn};

use publisher_flv::Muxer;

use crate::envelope::PacketQueue;
use crate::error::ClientError;
use crate::stats::SessionStatistics;
use crate::{ClientResult, STATS_LOG_INTERVAL_SECS, WORKER_THREAD_NAME};

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkerState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl WorkerState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Everything the stream loop needs.
pub struct WorkerContext {
    pub queue: Arc<PacketQueue>,
    pub muxer: Arc<Mutex<Box<dyn Muxer>>>,
    pub statistics: Arc<SessionStatistics>,
    pub poll_interval: Duration,
    pub flush_on_start: bool,
}

/// Handle to the streaming thread.
#[derive(Default)]
pub struct StreamWorker {
    state: Arc<RwLock<WorkerState>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StreamWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    /// Whether a worker thread is spawned and not yet joined.
    pub fn is_started(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawn the streaming thread.
    ///
    /// Returns once the thread has flushed the backlog and entered its loop.
    #[instrument(name = "worker_start", skip_all)]
    pub fn start(&mut self, context: WorkerContext) -> ClientResult<()> {
        if self.handle.is_some() || self.running.load(Ordering::SeqCst) {
            debug!(state = self.state().name(), "Worker already started");
            return Err(ClientError::AlreadyStarted);
        }

        self.transition_to(WorkerState::Starting);
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let state = Arc::clone(&self.state);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let spawned = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || stream_loop(context, running, state, ready_tx));

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                if ready_rx.recv().is_err() {
                    warn!("Worker exited before signalling readiness");
                }
                info!("Streaming worker started");
                Ok(())
            }
            Err(e) => {
                error!("Failed to spawn streaming worker: {}", e);
                self.running.store(false, Ordering::SeqCst);
                self.transition_to(WorkerState::Stopped);
                Err(ClientError::SpawnFailed(e))
            }
        }
    }

    /// Signal the loop to exit and wait for the thread. No-op when stopped.
    #[instrument(name = "worker_stop", skip_all)]
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            debug!("Worker not started, ignoring stop");
            return;
        };

        info!("Stopping streaming worker");
        self.transition_to(WorkerState::Stopping);
        self.running.store(false, Ordering::SeqCst);

        if handle.join().is_err() {
            error!("Streaming worker panicked");
        }

        self.transition_to(WorkerState::Stopped);
        info!("Streaming worker stopped");
    }

    fn transition_to(&self, new_state: WorkerState) {
        let previous = std::mem::replace(&mut *self.state.write(), new_state);
        debug!(
            previous = previous.name(),
            current = new_state.name(),
            "Worker state transition"
        );
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Main streaming loop.
fn stream_loop(
    context: WorkerContext,
    running: Arc<AtomicBool>,
    state: Arc<RwLock<WorkerState>>,
    ready_tx: crossbeam_channel::Sender<()>,
) {
    debug!("Stream loop starting");

    if context.flush_on_start {
        let flushed = context.queue.flush();
        if flushed > 0 {
            info!(flushed, "Discarded packets queued before start");
            context.statistics.record_flushed(flushed as u64);
        }
    }

    {
        let mut state = state.write();
        if *state == WorkerState::Starting {
            *state = WorkerState::Running;
        }
    }
    context.statistics.start();
    let _ = ready_tx.send(());

    let start_time = Instant::now();
    let mut last_log_time = Instant::now();
    let mut packets_sent: u64 = 0;
    let mut packets_failed: u64 = 0;

    while running.load(Ordering::SeqCst) {
        // Periodic status logging every 5 seconds
        if last_log_time.elapsed() >= Duration::from_secs(STATS_LOG_INTERVAL_SECS) {
            info!(
                "Stream stats: sent={}, failed={}, queued={}, uptime={:.1}s",
                packets_sent,
                packets_failed,
                context.queue.len(),
                start_time.elapsed().as_secs_f32()
            );
            last_log_time = Instant::now();
        }

        let Some(item) = context.queue.pop_timeout(context.poll_interval) else {
            continue;
        };

        let stamp = item.opaque();
        let result = context.muxer.lock().write_packet(item.payload());

        match result {
            Ok(()) => {
                packets_sent += 1;
                context.statistics.record_sent();
                if packets_sent <= 5 || packets_sent % 100 == 0 {
                    debug!(
                        "Packet sent: #{}, pts={}, size={}, key={}",
                        packets_sent, stamp.pts, stamp.size, stamp.key_frame
                    );
                } else {
                    trace!(pts = stamp.pts, size = stamp.size, "Packet sent");
                }
            }
            Err(e) => {
                packets_failed += 1;
                context.statistics.record_mux_failure();
                warn!(pts = stamp.pts, size = stamp.size, "Dropping packet: {}", e);
            }
        }

        context.queue.item_free(item);
    }

    debug!(packets_sent, packets_failed, "Stream loop exited");
}
