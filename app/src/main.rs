//! Publish an H.264 elementary stream to an RTMP server.

mod source;

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use publisher_client::{ClientConfig, Session};
use publisher_media::{MediaPacket, Rational, VideoEncoderInfo, VideoPacket};

use crate::source::spawn_reader;

#[derive(Parser, Debug)]
#[command(name = "publisher")]
#[command(about = "Publish an H.264 elementary stream to an RTMP server")]
struct Args {
    /// Destination, rtmp://host[:port]/app/stream_key
    url: String,

    /// Annex B H.264 input file
    #[arg(short, long)]
    input: PathBuf,

    /// Frames per second of the input
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Picture width announced in stream metadata
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Picture height announced in stream metadata
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Bitrate announced in stream metadata
    #[arg(long, default_value_t = 2500)]
    bitrate_kbps: u32,

    /// Number of times to publish the input
    #[arg(long, default_value_t = 1)]
    loops: u32,

    /// JSON client configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// How long to wait for queued frames after the input ends
    #[arg(long, default_value_t = 10)]
    drain_timeout_secs: u64,
}

/// Initialize logging.
fn init_logging() {
    const DEFAULT_FILTER: &str =
        "publisher=info,publisher_client=debug,publisher_transport=debug,publisher_flv=info";

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: Option<&Path>) -> Result<ClientConfig> {
    let Some(path) = path else {
        return Ok(ClientConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    if args.fps == 0 || args.fps > i32::MAX as u32 {
        bail!("--fps must be a positive frame rate");
    }

    let config = load_config(args.config.as_deref())?;
    info!(input = %args.input.display(), fps = args.fps, "Publisher starting");

    let encoder = VideoEncoderInfo {
        width: args.width,
        height: args.height,
        framerate: Rational::new(args.fps as i32, 1),
        timebase: Rational::new(1, args.fps as i32),
        bitrate_kbps: args.bitrate_kbps,
        ..Default::default()
    };

    let mut session = Session::create_with_config(&args.url, config)
        .context("Failed to connect to destination")?;
    session.add_stream(&MediaPacket::Video(VideoPacket::new(
        Bytes::new(),
        0,
        0,
        false,
        encoder.clone(),
    )))?;

    let (units, reader) = spawn_reader(args.input.clone(), args.loops)?;
    session.start()?;

    let frame_interval = Duration::from_secs(1) / args.fps;
    let start_time = Instant::now();
    let mut frame_index: i64 = 0;
    let mut skipped = 0u64;

    for unit in units.iter() {
        if frame_index == 0 && !unit.key_frame {
            skipped += 1;
            continue;
        }

        let due = start_time + frame_interval * frame_index as u32;
        if let Some(wait) = due.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }

        let packet = VideoPacket::new(
            unit.data,
            frame_index,
            frame_index,
            unit.key_frame,
            encoder.clone(),
        );
        if let Err(e) = session.send_packet(&packet.into()) {
            warn!(frame = frame_index, "Frame not queued: {}", e);
        }
        frame_index += 1;
    }

    if skipped > 0 {
        warn!(skipped, "Skipped access units before the first key frame");
    }

    match reader.join() {
        Ok(result) => {
            let sent = result?;
            info!(access_units = sent, "Input finished");
        }
        Err(_) => bail!("Source reader panicked"),
    }

    if let Err(e) = session.wait_for_drain(Duration::from_secs(args.drain_timeout_secs)) {
        warn!("{}", e);
    }
    session.stop();

    let stats = session.statistics();
    info!(
        packets_sent = stats.packets_sent,
        packets_dropped = stats.packets_dropped,
        bytes_written = stats.bytes_written,
        bitrate_kbps = stats.bitrate_kbps,
        "Publishing finished"
    );
    session.destroy();

    Ok(())
}
