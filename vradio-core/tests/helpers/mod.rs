//! Test helper modules for vradio-core integration tests
//!
//! - audio_generator: deterministic WAV fixtures
//! - test_backends: scripted session backends for worker lifecycle tests

#![allow(dead_code)]

pub mod audio_generator;
pub mod test_backends;

pub use audio_generator::generate_sine_wav;
pub use test_backends::{CountingBackend, SessionCounters, SkippingBackend, StallingBackend};

use std::time::{Duration, Instant};

/// Poll `condition` every few milliseconds until it holds or `timeout` passes
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
