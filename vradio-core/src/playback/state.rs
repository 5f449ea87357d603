//! Session state machine and stop signalling
//!
//! ```text
//! Idle → Opening → Decoding → Stopping → Idle
//!           │          │
//!           └──────────┴────→ Failed  (until the next open)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Lifecycle state of the decoder's current session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session, or the last one stopped cleanly
    #[default]
    Idle,

    /// Connecting, probing, building decoder and resampler
    Opening,

    /// Decode loop running
    Decoding,

    /// Stop observed, releasing resources
    Stopping,

    /// Last session ended on a terminal error
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Opening => "opening",
            SessionState::Decoding => "decoding",
            SessionState::Stopping => "stopping",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Snapshot returned by `StreamDecoder::status()`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderStatus {
    pub state: SessionState,

    /// URL of the current or most recent session
    pub url: Option<String>,

    /// Reason the most recent session failed, cleared on open
    pub last_error: Option<String>,

    /// Incremented on every open; 0 before the first
    pub session_id: u64,
}

/// Single-writer, multi-reader stop flag for one session
///
/// Each session gets a fresh signal so a lingering reference from an old
/// session can never stop a new one.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sleep for `total` in `slice` steps, returning early once stop is
    /// requested
    ///
    /// Returns true when stop was requested.
    pub fn sleep(&self, total: Duration, slice: Duration) -> bool {
        let deadline = Instant::now() + total;
        let slice = slice.max(Duration::from_millis(1));

        loop {
            if self.is_requested() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(slice.min(deadline - now));
        }
    }
}
