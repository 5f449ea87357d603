//! Audio test file generation
//!
//! Writes sine-wave WAV files with known rate, channel count and length so
//! decoded output can be checked against expected frame counts.

use hound::{WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::Path;

/// Generate a 16-bit sine wave WAV file
///
/// # Arguments
/// * `path` - Output file path
/// * `sample_rate` - Sample rate in Hz
/// * `channels` - Channel count; every channel carries the same tone
/// * `duration_ms` - Duration in milliseconds
/// * `frequency_hz` - Tone frequency
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    channels: u16,
    duration_ms: u64,
    frequency_hz: f32,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    let total_frames = sample_rate as u64 * duration_ms / 1000;

    for frame in 0..total_frames {
        let t = frame as f32 / sample_rate as f32;
        let value = ((2.0 * PI * frequency_hz * t).sin() * 0.5 * i16::MAX as f32) as i16;
        for _ in 0..channels {
            writer.write_sample(value)?;
        }
    }

    writer.finalize()?;
    Ok(())
}

/// Frame count `generate_sine_wav` writes for a duration
pub fn expected_frames(sample_rate: u32, duration_ms: u64) -> u64 {
    sample_rate as u64 * duration_ms / 1000
}
