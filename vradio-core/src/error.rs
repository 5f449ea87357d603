//! Error types for vradio-core
//!
//! Errors never cross the `open` boundary of the decode worker: a session
//! that fails is reported through `StreamDecoder::status()` and by the
//! absence of PCM data. These types exist for the internal session steps,
//! configuration loading and local precondition checks.

use thiserror::Error;

/// Main error type for vradio-core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Output PCM layout rejected
    #[error("Invalid output format: {0}")]
    InvalidFormat(String),

    /// Stream source could not be opened or re-dialed
    #[error("Source error: {0}")]
    Source(String),

    /// Demux, probe or codec errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Resampler construction or processing errors
    #[error("Resample error: {0}")]
    Resample(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Session observed its stop signal
    #[error("Session stopped")]
    Stopped,
}

/// Convenience Result type using vradio-core Error
pub type Result<T> = std::result::Result<T, Error>;
