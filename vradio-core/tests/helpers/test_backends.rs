//! Scripted session backends
//!
//! Stand in for the network so worker lifecycle tests are deterministic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use vradio_core::audio::types::DecodedFormat;
use vradio_core::error::{Error, Result};
use vradio_core::playback::{DecodeSession, Pump, SessionBackend, StopSignal};

/// Live/peak session counts shared by a `CountingBackend` and its sessions
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub opened: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl SessionCounters {
    fn enter(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

/// Backend whose sessions fill PCM with a byte derived from the URL
///
/// URL `"pattern://N"` produces bytes of value N. `open_delay` simulates a
/// slow connect that still honours stop.
pub struct CountingBackend {
    pub counters: Arc<SessionCounters>,
    pub open_delay: Duration,
}

impl CountingBackend {
    pub fn new() -> (Arc<Self>, Arc<SessionCounters>) {
        Self::with_open_delay(Duration::ZERO)
    }

    pub fn with_open_delay(open_delay: Duration) -> (Arc<Self>, Arc<SessionCounters>) {
        let counters = Arc::new(SessionCounters::default());
        let backend = Arc::new(Self {
            counters: Arc::clone(&counters),
            open_delay,
        });
        (backend, counters)
    }
}

struct CountingSession {
    byte: u8,
    counters: Arc<SessionCounters>,
}

impl DecodeSession for CountingSession {
    fn pump(&mut self, scratch: &mut Vec<u8>) -> Result<Pump> {
        scratch.extend_from_slice(&[self.byte; 400]);
        thread::sleep(Duration::from_millis(1));
        Ok(Pump::Produced)
    }
}

impl Drop for CountingSession {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SessionBackend for CountingBackend {
    fn open_session(&self, url: &str, _format: &DecodedFormat, stop: &StopSignal) -> Result<Box<dyn DecodeSession>> {
        if stop.sleep(self.open_delay, Duration::from_millis(2)) {
            return Err(Error::Stopped);
        }

        let byte = url
            .strip_prefix("pattern://")
            .and_then(|n| n.parse::<u8>().ok())
            .ok_or_else(|| Error::Source(format!("unknown test URL: {}", url)))?;

        self.counters.enter();
        Ok(Box::new(CountingSession {
            byte,
            counters: Arc::clone(&self.counters),
        }))
    }
}

/// Backend whose sessions never produce a packet
pub struct StallingBackend;

struct StallingSession;

impl DecodeSession for StallingSession {
    fn pump(&mut self, _scratch: &mut Vec<u8>) -> Result<Pump> {
        Ok(Pump::Stalled)
    }
}

impl SessionBackend for StallingBackend {
    fn open_session(&self, _url: &str, _format: &DecodedFormat, _stop: &StopSignal) -> Result<Box<dyn DecodeSession>> {
        Ok(Box::new(StallingSession))
    }
}

/// Backend whose sessions interleave dropped packets with real ones
///
/// Step k produces k as a little-endian u32, except every third step
/// (k % 3 == 1) which is skipped after scribbling into scratch. After
/// `steps` steps the session stalls forever.
pub struct SkippingBackend {
    pub steps: u32,
}

impl SkippingBackend {
    /// Values the ring should hold once every step has run
    pub fn expected(&self) -> Vec<u32> {
        (0..self.steps).filter(|k| k % 3 != 1).collect()
    }
}

struct SkippingSession {
    step: u32,
    steps: u32,
}

impl DecodeSession for SkippingSession {
    fn pump(&mut self, scratch: &mut Vec<u8>) -> Result<Pump> {
        if self.step >= self.steps {
            return Ok(Pump::Stalled);
        }
        let k = self.step;
        self.step += 1;

        if k % 3 == 1 {
            scratch.extend_from_slice(&[0xFF; 4]);
            return Ok(Pump::Skipped);
        }
        scratch.extend_from_slice(&k.to_le_bytes());
        Ok(Pump::Produced)
    }
}

impl SessionBackend for SkippingBackend {
    fn open_session(&self, _url: &str, _format: &DecodedFormat, _stop: &StopSignal) -> Result<Box<dyn DecodeSession>> {
        Ok(Box::new(SkippingSession {
            step: 0,
            steps: self.steps,
        }))
    }
}
