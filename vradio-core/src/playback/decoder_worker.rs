//! Background stream decoder
//!
//! `StreamDecoder` owns one session at a time. `open` stops any previous
//! session, then hands the URL to a dedicated thread which runs session
//! setup and the decode loop, writing PCM into the shared ring buffer.
//! The host pulls bytes with `read_pcm` from its own thread.
//!
//! Setup and decode failures never surface from `open`: they end the
//! session and are visible through `is_running()` and `status()`.

use crate::audio::types::DecodedFormat;
use crate::config::DecoderConfig;
use crate::error::{Error, Result};
use crate::playback::ring_buffer::{ByteRingBuffer, RingBufferStats};
use crate::playback::session::{DecodeSession, Pump, SessionBackend, SymphoniaBackend};
use crate::playback::state::{DecoderStatus, SessionState, StopSignal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// State shared between the decoder handle and its worker thread
#[derive(Debug, Default)]
struct SessionShared {
    running: AtomicBool,
    status: Mutex<DecoderStatus>,
}

impl SessionShared {
    fn status(&self) -> MutexGuard<'_, DecoderStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        self.status().state = state;
    }

    fn finish(&self, state: SessionState, last_error: Option<String>) {
        let mut status = self.status();
        status.state = state;
        status.last_error = last_error;
    }
}

/// Clears the running flag when the worker exits, including by panic
struct RunningGuard(Arc<SessionShared>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

/// Handle to the worker thread of the active session
struct ActiveSession {
    id: u64,
    stop: StopSignal,
    thread: JoinHandle<()>,
}

/// Everything the worker thread owns for one session
struct SessionContext {
    id: u64,
    url: String,
    format: DecodedFormat,
    backend: Arc<dyn SessionBackend>,
    ring: Arc<ByteRingBuffer>,
    shared: Arc<SessionShared>,
    stop: StopSignal,
    scratch: Duration,
    stall_sleep: Duration,
    max_stall_retries: Option<u32>,
}

/// Why the decode loop returned
enum LoopExit {
    Stopped,
    Failed(String),
}

/// Network/file audio decoder feeding a lossy PCM ring buffer
pub struct StreamDecoder {
    config: DecoderConfig,
    backend: Arc<dyn SessionBackend>,
    ring: Arc<ByteRingBuffer>,
    format: DecodedFormat,
    shared: Arc<SessionShared>,
    active: Option<ActiveSession>,
    next_session_id: u64,
}

impl std::fmt::Debug for StreamDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDecoder")
            .field("format", &self.format)
            .field("ring", &self.ring)
            .field("status", &*self.shared.status())
            .field("running", &self.is_running())
            .finish()
    }
}

impl StreamDecoder {
    /// Create an idle decoder using symphonia for demux and decode
    pub fn new(config: DecoderConfig) -> Result<Self> {
        let backend = Arc::new(SymphoniaBackend::new(config.clone()));
        Self::with_backend(config, backend)
    }

    /// Create an idle decoder with a custom session backend
    pub fn with_backend(config: DecoderConfig, backend: Arc<dyn SessionBackend>) -> Result<Self> {
        config.validate()?;
        let format = config.format;
        let ring = Arc::new(ByteRingBuffer::for_format(&format, config.buffer.ring_buffer_duration())?);

        Ok(Self {
            config,
            backend,
            ring,
            format,
            shared: Arc::new(SessionShared::default()),
            active: None,
            next_session_id: 1,
        })
    }

    /// Start decoding `url` into `format`
    ///
    /// Returns once the worker thread is launched; connection and decode
    /// errors are reported through `status()`. Any previous session is
    /// stopped and its buffered audio discarded first.
    pub fn open(&mut self, url: &str, format: DecodedFormat) -> Result<()> {
        format.validate()?;
        self.close();

        if format.bytes_per_second() != self.format.bytes_per_second() {
            self.ring = Arc::new(ByteRingBuffer::for_format(
                &format,
                self.config.buffer.ring_buffer_duration(),
            )?);
        } else {
            self.ring.clear();
        }
        self.format = format;

        let id = self.next_session_id;
        self.next_session_id += 1;

        {
            let mut status = self.shared.status();
            *status = DecoderStatus {
                state: SessionState::Opening,
                url: Some(url.to_string()),
                last_error: None,
                session_id: id,
            };
        }

        let stop = StopSignal::new();
        let context = SessionContext {
            id,
            url: url.to_string(),
            format,
            backend: Arc::clone(&self.backend),
            ring: Arc::clone(&self.ring),
            shared: Arc::clone(&self.shared),
            stop: stop.clone(),
            scratch: self.config.buffer.scratch_duration(),
            stall_sleep: self.config.buffer.stall_sleep(),
            max_stall_retries: self.config.buffer.max_stall_retries,
        };

        info!("Opening session {}: {}", id, url);
        self.shared.running.store(true, Ordering::Release);

        let spawned = thread::Builder::new()
            .name(format!("vradio-decode-{}", id))
            .spawn(move || run_session(context));

        match spawned {
            Ok(thread) => {
                self.active = Some(ActiveSession { id, stop, thread });
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.finish(SessionState::Failed, Some(format!("Failed to spawn worker: {}", e)));
                Err(Error::Io(e))
            }
        }
    }

    /// Stop the current session and wait for its thread
    ///
    /// Safe to call at any time, any number of times.
    pub fn close(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        debug!("Stopping session {}", active.id);
        active.stop.request();

        match active.thread.join() {
            Ok(()) => {
                debug!("Session {} worker joined", active.id);
            }
            Err(e) => {
                error!("Session {} worker panicked: {:?}", active.id, e);
                self.shared
                    .finish(SessionState::Failed, Some("decode worker panicked".to_string()));
            }
        }

        self.shared.running.store(false, Ordering::Release);
        info!("Session {} closed", active.id);
    }

    /// Copy up to `dst.len()` bytes of PCM, returning how many were copied
    ///
    /// Never blocks waiting for data.
    pub fn read_pcm(&self, dst: &mut [u8]) -> usize {
        self.ring.read(dst)
    }

    /// True while a session thread is alive
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> DecoderStatus {
        self.shared.status().clone()
    }

    /// Output layout of the current (or last) session
    pub fn format(&self) -> DecodedFormat {
        self.format
    }

    pub fn ring_stats(&self) -> RingBufferStats {
        self.ring.stats()
    }
}

impl Drop for StreamDecoder {
    fn drop(&mut self) {
        self.close();
    }
}

/// Worker thread body for one session
fn run_session(ctx: SessionContext) {
    let _running = RunningGuard(Arc::clone(&ctx.shared));

    let mut session = match ctx.backend.open_session(&ctx.url, &ctx.format, &ctx.stop) {
        Ok(session) => session,
        Err(e) if matches!(e, Error::Stopped) || ctx.stop.is_requested() => {
            debug!("Session {} stopped during setup", ctx.id);
            ctx.shared.finish(SessionState::Idle, None);
            return;
        }
        Err(e) => {
            warn!("Session {} failed to open {}: {}", ctx.id, ctx.url, e);
            ctx.shared.finish(SessionState::Failed, Some(e.to_string()));
            return;
        }
    };

    ctx.shared.set_state(SessionState::Decoding);
    let exit = decode_loop(session.as_mut(), &ctx);

    if matches!(exit, LoopExit::Stopped) {
        ctx.shared.set_state(SessionState::Stopping);
    }
    drop(session);

    match exit {
        LoopExit::Stopped => {
            debug!("Session {} stopped", ctx.id);
            ctx.shared.finish(SessionState::Idle, None);
        }
        LoopExit::Failed(reason) => {
            warn!("Session {} failed: {}", ctx.id, reason);
            ctx.shared.finish(SessionState::Failed, Some(reason));
        }
    }
}

/// Pump the session until stopped or a terminal error
fn decode_loop(session: &mut dyn DecodeSession, ctx: &SessionContext) -> LoopExit {
    let mut scratch = Vec::with_capacity(ctx.format.bytes_for(ctx.scratch));
    let mut stalls: u32 = 0;
    let mut first_audio = true;

    loop {
        if ctx.stop.is_requested() {
            return LoopExit::Stopped;
        }

        scratch.clear();
        match session.pump(&mut scratch) {
            Ok(Pump::Produced) => {
                stalls = 0;
                if first_audio {
                    info!("Session {} decoding audio", ctx.id);
                    first_audio = false;
                }
                let accepted = ctx.ring.write(&scratch);
                if accepted < scratch.len() {
                    trace!("Ring full, dropped {} bytes", scratch.len() - accepted);
                }
            }
            Ok(Pump::Skipped) => {}
            Ok(Pump::Stalled) => {
                stalls = stalls.saturating_add(1);
                if let Some(max) = ctx.max_stall_retries {
                    if stalls > max {
                        return LoopExit::Failed(format!("no data after {} retries", max));
                    }
                }
                if stalls == 1 {
                    debug!("Session {} waiting for data", ctx.id);
                }
                if ctx.stop.sleep(ctx.stall_sleep, ctx.stall_sleep) {
                    return LoopExit::Stopped;
                }
            }
            Err(Error::Stopped) => return LoopExit::Stopped,
            Err(e) => return LoopExit::Failed(e.to_string()),
        }
    }
}
