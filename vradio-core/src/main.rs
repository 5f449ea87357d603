//! Virtual radio tap (vradio-tap) - Main entry point
//!
//! Plays the role of the capture host: opens a stream with
//! `StreamDecoder`, then pulls one fixed-size chunk of PCM per period the
//! way a real-time audio graph would, stamping each chunk with 100 ns
//! media times. Optionally records what it pulled to a WAV file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vradio_core::{DecodedFormat, DecoderConfig, StreamDecoder};

/// Sleep between empty reads while filling a chunk
const EMPTY_POLL: Duration = Duration::from_millis(5);

/// Media time units per second (100 ns ticks)
const TICKS_PER_SECOND: u64 = 10_000_000;

/// Command-line arguments for vradio-tap
#[derive(Parser, Debug)]
#[command(name = "vradio-tap")]
#[command(about = "Pull decoded radio PCM at a fixed cadence")]
#[command(version)]
struct Args {
    /// Stream URL or local media file
    #[arg(env = "VRADIO_URL")]
    url: String,

    /// TOML configuration file
    #[arg(short, long, env = "VRADIO_CONFIG")]
    config: Option<PathBuf>,

    /// Stop after this many seconds of pulled audio (0 = until Ctrl+C)
    #[arg(short, long, default_value = "10")]
    seconds: u64,

    /// Chunk size pulled per period, in milliseconds
    #[arg(long, default_value = "100", env = "VRADIO_CHUNK_MS")]
    chunk_ms: u64,

    /// Record pulled audio to a WAV file
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vradio_core=debug,vradio_tap=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    if args.chunk_ms == 0 {
        anyhow::bail!("--chunk-ms must be positive");
    }

    let config = match &args.config {
        Some(path) => DecoderConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => DecoderConfig::default(),
    };
    let format = config.format;

    info!(
        "Starting vradio-tap: {} ({}Hz {}ch S16, {}ms chunks)",
        args.url, format.sample_rate, format.channels, args.chunk_ms
    );

    let mut decoder = StreamDecoder::new(config).context("Failed to create decoder")?;
    decoder
        .open(&args.url, format)
        .context("Failed to start decoder")?;

    let outcome = run_tap(&decoder, &args, format).await;

    let status = decoder.status();
    let stats = decoder.ring_stats();
    info!(
        "Session {} ended in state {}: {} bytes decoded, {} dropped, {} underruns",
        status.session_id, status.state, stats.bytes_written, stats.bytes_dropped, stats.underruns
    );
    if let Some(reason) = &status.last_error {
        warn!("Last error: {}", reason);
    }

    // close() joins the worker thread
    tokio::task::spawn_blocking(move || decoder.close())
        .await
        .context("Decoder shutdown task failed")?;

    let pulled = outcome?;
    info!("Pulled {:.2}s of audio", format.duration_of(pulled).as_secs_f64());
    Ok(())
}

/// Pull chunks until the time limit, Ctrl+C, or the session ends
///
/// Returns the number of PCM bytes delivered.
async fn run_tap(decoder: &StreamDecoder, args: &Args, format: DecodedFormat) -> Result<usize> {
    let period = Duration::from_millis(args.chunk_ms);
    let mut chunk = vec![0u8; format.bytes_for(period).max(format.frame_bytes())];
    let chunk_frames = (chunk.len() / format.frame_bytes()) as u64;

    let mut writer = match &args.output {
        Some(path) => {
            let spec = hound::WavSpec {
                channels: format.channels,
                sample_rate: format.sample_rate,
                bits_per_sample: format.bits_per_sample,
                sample_format: hound::SampleFormat::Int,
            };
            let writer = hound::WavWriter::create(path, spec)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            info!("Recording to {}", path.display());
            Some(writer)
        }
        None => None,
    };

    let deadline = (args.seconds > 0).then(|| Instant::now() + Duration::from_secs(args.seconds));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut frames_delivered: u64 = 0;
    let mut delivered_bytes = 0;

    'pull: loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => break 'pull,
        }

        // Fill the whole chunk, polling while the ring is empty
        let mut filled = 0;
        while filled < chunk.len() {
            let got = decoder.read_pcm(&mut chunk[filled..]);
            if got > 0 {
                filled += got;
                continue;
            }
            if !decoder.is_running() {
                info!("Decoder stopped, ending tap");
                break 'pull;
            }
            tokio::select! {
                _ = time::sleep(EMPTY_POLL) => {}
                _ = &mut shutdown => break 'pull,
            }
        }

        let start = frames_delivered * TICKS_PER_SECOND / format.sample_rate as u64;
        frames_delivered += chunk_frames;
        let end = frames_delivered * TICKS_PER_SECOND / format.sample_rate as u64;
        debug!("Chunk {} bytes, media time {}..{}", filled, start, end);

        if let Some(writer) = writer.as_mut() {
            for sample in chunk.chunks_exact(2) {
                writer
                    .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
                    .context("Failed to write WAV sample")?;
            }
        }
        delivered_bytes += filled;

        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("Time limit reached");
            break;
        }
    }

    if let Some(writer) = writer {
        writer.finalize().context("Failed to finalize WAV file")?;
    }

    Ok(delivered_bytes)
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
