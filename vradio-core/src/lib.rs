//! # Virtual Radio Core (vradio-core)
//!
//! Streaming audio decoder for virtual capture devices.
//!
//! **Purpose:** Open an internet radio stream or local media file, decode
//! and resample it on a background thread, and expose the result as
//! fixed-format PCM (S16LE interleaved) through a lossy ring buffer that a
//! host pulls from at its own cadence.
//!
//! **Architecture:** reqwest (blocking) source + symphonia demux/decode +
//! rubato resampling, one worker thread per session.

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;

pub use audio::types::DecodedFormat;
pub use config::DecoderConfig;
pub use error::{Error, Result};
pub use playback::{ByteRingBuffer, StreamDecoder};
