//! Core audio data types
//!
//! Defines the fixed PCM layout delivered to the real-time consumer.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Only supported output width: signed 16-bit linear PCM
pub const OUTPUT_BITS_PER_SAMPLE: u16 = 16;

/// DecodedFormat describes the PCM layout written into the ring buffer.
///
/// **Format:**
/// - Samples are signed 16-bit little-endian
/// - Channels interleaved: [L, R, L, R, ...] for stereo
/// - One frame = channels × bytes per sample
///
/// Immutable for the lifetime of one decode session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DecodedFormat {
    /// Output sample rate in Hz
    pub sample_rate: u32,

    /// Output channel count
    pub channels: u16,

    /// Bits per sample (always 16)
    pub bits_per_sample: u16,
}

impl Default for DecodedFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            bits_per_sample: OUTPUT_BITS_PER_SAMPLE,
        }
    }
}

impl DecodedFormat {
    /// Create a S16 format with the given rate and channel count
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: OUTPUT_BITS_PER_SAMPLE,
        }
    }

    /// Reject layouts the pipeline cannot produce
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::InvalidFormat("sample rate must be positive".to_string()));
        }
        if self.channels == 0 {
            return Err(Error::InvalidFormat("channel count must be positive".to_string()));
        }
        if self.bits_per_sample != OUTPUT_BITS_PER_SAMPLE {
            return Err(Error::InvalidFormat(format!(
                "{} bits per sample requested, only {} is supported",
                self.bits_per_sample, OUTPUT_BITS_PER_SAMPLE
            )));
        }
        Ok(())
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample / 8) as usize
    }

    /// Bytes in one interleaved frame
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.bytes_per_sample()
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.frame_bytes()
    }

    /// Whole frames covering `duration`, expressed in bytes
    pub fn bytes_for(&self, duration: Duration) -> usize {
        let frames = (self.sample_rate as u128 * duration.as_micros()) / 1_000_000;
        frames as usize * self.frame_bytes()
    }

    /// Playback time represented by `bytes` of this format
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let per_second = self.bytes_per_second();
        if per_second == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((bytes as u128 * 1_000_000_000 / per_second as u128) as u64)
    }
}
