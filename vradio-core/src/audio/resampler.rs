//! Streaming resampler using rubato
//!
//! Converts decoded f32 audio of any rate and channel count to the fixed
//! output layout: target channel count, target rate, signed 16-bit
//! little-endian interleaved.
//!
//! Input arrives in codec-sized frames (e.g. 1152 for MP3), while rubato's
//! fixed-input resamplers want constant chunks, so input is queued per
//! channel and converted whenever a whole chunk is available. Each call
//! emits at most `max_frames`; anything beyond stays queued for the next
//! call, see `has_backlog`.

use crate::audio::types::DecodedFormat;
use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

/// Input frames handed to rubato per call
const RESAMPLE_CHUNK_FRAMES: usize = 1024;

/// Streaming converter from decoded f32 to target-format PCM bytes
pub struct StreamResampler {
    source_rate: u32,
    source_channels: usize,
    target: DecodedFormat,

    /// `None` when source and target rates match
    rate_converter: Option<FastFixedIn<f32>>,

    /// Queued planar input, already mapped to target channels
    pending: Vec<Vec<f32>>,
}

impl std::fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResampler")
            .field("source_rate", &self.source_rate)
            .field("source_channels", &self.source_channels)
            .field("target", &self.target)
            .field("converting_rate", &self.rate_converter.is_some())
            .field("pending_frames", &self.pending_frames())
            .finish()
    }
}

impl StreamResampler {
    /// Build a converter from the source layout to `target`
    pub fn new(source_rate: u32, source_channels: usize, target: &DecodedFormat) -> Result<Self> {
        target.validate()?;
        if source_rate == 0 {
            return Err(Error::Resample("source sample rate is zero".to_string()));
        }
        if source_channels == 0 {
            return Err(Error::Resample("source has no channels".to_string()));
        }

        let target_channels = target.channels as usize;
        let rate_converter = if source_rate == target.sample_rate {
            None
        } else {
            Some(Self::create_resampler(source_rate, target.sample_rate, target_channels)?)
        };

        debug!(
            "Resampler: {}Hz {}ch -> {}Hz {}ch S16{}",
            source_rate,
            source_channels,
            target.sample_rate,
            target_channels,
            if rate_converter.is_some() { "" } else { " (rate passthrough)" }
        );

        Ok(Self {
            source_rate,
            source_channels,
            target: *target,
            rate_converter,
            pending: vec![Vec::with_capacity(RESAMPLE_CHUNK_FRAMES * 2); target_channels],
        })
    }

    /// Create a rubato resampler.
    ///
    /// Uses FastFixedIn for good quality at low CPU cost.
    fn create_resampler(input_rate: u32, output_rate: u32, channels: usize) -> Result<FastFixedIn<f32>> {
        FastFixedIn::<f32>::new(
            output_rate as f64 / input_rate as f64,
            1.0,
            PolynomialDegree::Septic,
            RESAMPLE_CHUNK_FRAMES,
            channels,
        )
        .map_err(|e| Error::Resample(format!("Failed to create resampler: {}", e)))
    }

    /// True when decoded audio in this layout can go through this converter
    pub fn matches_source(&self, rate: u32, channels: usize) -> bool {
        self.source_rate == rate && self.source_channels == channels
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn source_channels(&self) -> usize {
        self.source_channels
    }

    /// Frames queued waiting for a full rubato chunk
    pub fn pending_frames(&self) -> usize {
        self.pending.first().map_or(0, Vec::len)
    }

    /// Queued input is enough for more output without another packet
    pub fn has_backlog(&self) -> bool {
        match &self.rate_converter {
            Some(converter) => self.pending_frames() >= converter.input_frames_next(),
            None => self.pending_frames() > 0,
        }
    }

    /// Convert interleaved source samples, appending S16LE bytes to `out`
    ///
    /// Appends at most `max_frames` output frames (at least one rubato chunk
    /// when one is ready) and returns how many. Output may lag input by up
    /// to one resampler chunk plus whatever the cap held back.
    pub fn process(&mut self, interleaved: &[f32], out: &mut Vec<u8>, max_frames: usize) -> Result<usize> {
        map_channels(interleaved, self.source_channels, &mut self.pending);

        let pending = &mut self.pending;
        let Some(converter) = self.rate_converter.as_mut() else {
            let frames = pending.first().map_or(0, Vec::len).min(max_frames);
            write_s16le(pending, frames, out);
            for channel in pending.iter_mut() {
                channel.drain(..frames);
            }
            return Ok(frames);
        };

        let mut produced = 0;
        loop {
            let needed = converter.input_frames_next();
            if pending.first().map_or(0, Vec::len) < needed {
                break;
            }
            if produced > 0 && produced + converter.output_frames_next() > max_frames {
                break;
            }

            let chunk: Vec<Vec<f32>> = pending
                .iter_mut()
                .map(|channel| channel.drain(..needed).collect())
                .collect();

            let resampled = converter
                .process(&chunk, None)
                .map_err(|e| Error::Resample(format!("Resampling failed: {}", e)))?;

            let frames = resampled.first().map_or(0, Vec::len);
            produced += frames;
            write_s16le(&resampled, frames, out);
        }

        Ok(produced)
    }

    /// Drop queued input and converter history
    pub fn reset(&mut self) {
        for channel in &mut self.pending {
            channel.clear();
        }
        if let Some(converter) = self.rate_converter.as_mut() {
            converter.reset();
        }
    }
}

/// Append interleaved source frames to planar target channels.
///
/// - same count: copied
/// - mono source: duplicated to every target channel
/// - mono target: average of all source channels
/// - stereo target from more channels: even channels averaged to left,
///   odd channels averaged to right
/// - otherwise: channel i takes source channel min(i, last)
fn map_channels(interleaved: &[f32], source_channels: usize, planar: &mut [Vec<f32>]) {
    let target_channels = planar.len();
    if source_channels == 0 || target_channels == 0 {
        return;
    }

    for frame in interleaved.chunks_exact(source_channels) {
        if source_channels == target_channels {
            for (channel, &sample) in planar.iter_mut().zip(frame) {
                channel.push(sample);
            }
        } else if source_channels == 1 {
            for channel in planar.iter_mut() {
                channel.push(frame[0]);
            }
        } else if target_channels == 1 {
            let sum: f32 = frame.iter().sum();
            planar[0].push(sum / source_channels as f32);
        } else if target_channels == 2 && source_channels > 2 {
            let (mut left, mut right) = (0.0f32, 0.0f32);
            let (mut left_n, mut right_n) = (0usize, 0usize);
            for (idx, &sample) in frame.iter().enumerate() {
                if idx % 2 == 0 {
                    left += sample;
                    left_n += 1;
                } else {
                    right += sample;
                    right_n += 1;
                }
            }
            planar[0].push(left / left_n as f32);
            planar[1].push(right / right_n as f32);
        } else {
            for (idx, channel) in planar.iter_mut().enumerate() {
                channel.push(frame[idx.min(source_channels - 1)]);
            }
        }
    }
}

/// Interleave the first `frames` of planar f32 channels as signed 16-bit
/// little-endian bytes
fn write_s16le(planar: &[Vec<f32>], frames: usize, out: &mut Vec<u8>) {
    out.reserve(frames * planar.len() * 2);

    for frame_idx in 0..frames {
        for channel in planar {
            out.extend_from_slice(&f32_to_i16(channel[frame_idx]).to_le_bytes());
        }
    }
}

/// Convert a normalized sample to i16, clamping to [-1.0, 1.0]
pub fn f32_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32).round() as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_s16le(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn test_f32_to_i16_clamps() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(2.5), i16::MAX);
        assert_eq!(f32_to_i16(-3.0), -i16::MAX);
        assert_eq!(f32_to_i16(0.5), 16384);
    }

    #[test]
    fn test_map_mono_to_stereo() {
        let mut planar = vec![Vec::new(), Vec::new()];
        map_channels(&[0.1, 0.2, 0.3], 1, &mut planar);
        assert_eq!(planar[0], vec![0.1, 0.2, 0.3]);
        assert_eq!(planar[1], vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_map_stereo_to_mono() {
        let mut planar = vec![Vec::new()];
        map_channels(&[0.2, 0.4, -1.0, 1.0], 2, &mut planar);
        assert_eq!(planar[0].len(), 2);
        assert!((planar[0][0] - 0.3).abs() < 1e-6);
        assert!(planar[0][1].abs() < 1e-6);
    }

    #[test]
    fn test_map_surround_to_stereo() {
        let mut planar = vec![Vec::new(), Vec::new()];
        // 4 channels: FL, FR, RL, RR
        map_channels(&[0.2, 0.4, 0.6, 0.8], 4, &mut planar);
        assert!((planar[0][0] - 0.4).abs() < 1e-6);
        assert!((planar[1][0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_map_ignores_partial_frame() {
        let mut planar = vec![Vec::new(), Vec::new()];
        map_channels(&[0.1, 0.2, 0.3], 2, &mut planar);
        assert_eq!(planar[0], vec![0.1]);
        assert_eq!(planar[1], vec![0.2]);
    }

    #[test]
    fn test_passthrough_rate_mono_to_stereo() {
        let target = DecodedFormat::new(44100, 2);
        let mut resampler = StreamResampler::new(44100, 1, &target).unwrap();

        let mut out = Vec::new();
        let frames = resampler.process(&[0.5, -0.5], &mut out, usize::MAX).unwrap();

        assert_eq!(frames, 2);
        assert_eq!(decode_s16le(&out), vec![16384, 16384, -16384, -16384]);
        assert_eq!(resampler.pending_frames(), 0);
    }

    #[test]
    fn test_rate_conversion_output_length() {
        let target = DecodedFormat::new(48000, 2);
        let mut resampler = StreamResampler::new(44100, 2, &target).unwrap();

        // Feed 1 second in MP3-sized packets
        let mut out = Vec::new();
        let mut fed = 0;
        while fed < 44100 {
            let frames = 1152.min(44100 - fed);
            let mut packet = Vec::with_capacity(frames * 2);
            for i in 0..frames {
                let t = (fed + i) as f32 / 44100.0;
                let s = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5;
                packet.push(s);
                packet.push(s);
            }
            resampler.process(&packet, &mut out, usize::MAX).unwrap();
            fed += frames;
        }

        let output_frames = out.len() / target.frame_bytes();
        // Up to one chunk may still be queued
        let expected = 48000;
        let lag = (RESAMPLE_CHUNK_FRAMES as f64 * 48000.0 / 44100.0) as usize + 64;
        assert!(
            output_frames <= expected + 64 && output_frames + lag >= expected,
            "Expected ~{} frames, got {}",
            expected,
            output_frames
        );
        assert!(resampler.pending_frames() < RESAMPLE_CHUNK_FRAMES + 1);
    }

    #[test]
    fn test_passthrough_output_is_capped() {
        let target = DecodedFormat::new(8000, 1);
        let mut resampler = StreamResampler::new(8000, 1, &target).unwrap();
        let input: Vec<f32> = (0..100).map(|i| i as f32 / 1000.0).collect();

        let mut out = Vec::new();
        assert_eq!(resampler.process(&input, &mut out, 30).unwrap(), 30);
        assert_eq!(out.len(), 30 * 2);
        assert_eq!(resampler.pending_frames(), 70);
        assert!(resampler.has_backlog());

        // Backlog drains in order without new input
        let mut rest = Vec::new();
        while resampler.has_backlog() {
            assert!(resampler.process(&[], &mut rest, 30).unwrap() <= 30);
        }
        out.extend_from_slice(&rest);

        let expected: Vec<i16> = input.iter().map(|&s| f32_to_i16(s)).collect();
        assert_eq!(decode_s16le(&out), expected);
    }

    #[test]
    fn test_rate_conversion_output_is_capped() {
        let target = DecodedFormat::new(48000, 1);
        let mut resampler = StreamResampler::new(24000, 1, &target).unwrap();
        // 8 chunks worth of input in one packet, roughly 16k output frames
        let input = vec![0.25f32; RESAMPLE_CHUNK_FRAMES * 8];
        let cap = RESAMPLE_CHUNK_FRAMES * 3;

        let mut out = Vec::new();
        let first = resampler.process(&input, &mut out, cap).unwrap();
        assert!(first > 0 && first <= cap, "first call produced {}", first);
        assert!(resampler.has_backlog());

        let mut total = first;
        let mut calls = 1;
        while resampler.has_backlog() {
            let frames = resampler.process(&[], &mut out, cap).unwrap();
            assert!(frames > 0 && frames <= cap);
            total += frames;
            calls += 1;
        }

        assert!(calls >= 3, "backlog drained in {} calls", calls);
        assert_eq!(out.len(), total * target.frame_bytes());
        assert!(resampler.pending_frames() < RESAMPLE_CHUNK_FRAMES);
        assert!(total + 2 * RESAMPLE_CHUNK_FRAMES >= RESAMPLE_CHUNK_FRAMES * 16);
    }

    #[test]
    fn test_rejects_bad_layouts() {
        let target = DecodedFormat::default();
        assert!(StreamResampler::new(0, 2, &target).is_err());
        assert!(StreamResampler::new(44100, 0, &target).is_err());
        assert!(StreamResampler::new(44100, 2, &DecodedFormat::new(44100, 0)).is_err());
    }

    #[test]
    fn test_matches_source() {
        let resampler = StreamResampler::new(22050, 1, &DecodedFormat::default()).unwrap();
        assert!(resampler.matches_source(22050, 1));
        assert!(!resampler.matches_source(22050, 2));
        assert!(!resampler.matches_source(44100, 1));
    }
}
