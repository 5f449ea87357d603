//! Configuration for the decode pipeline
//!
//! Loaded from a small TOML file; every field has a built-in default so an
//! empty file (or no file) yields these values:
//!
//! ```toml
//! [format]
//! sample_rate = 48000
//! channels = 2
//!
//! [source]
//! user_agent = "VirtualRadioSource/1.0"
//! reconnect = true
//! reconnect_streamed = true
//! reconnect_at_eof = true
//! reconnect_delay_max_secs = 5
//!
//! [buffer]
//! ring_buffer_ms = 1000
//! scratch_ms = 500
//! stall_sleep_ms = 10
//! # max_stall_retries = 3000
//! ```

use crate::audio::types::DecodedFormat;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Top-level decoder configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Output PCM layout used to size the ring buffer
    pub format: DecodedFormat,

    /// Network source resilience options
    pub source: SourceConfig,

    /// Buffering and retry timing
    pub buffer: BufferConfig,
}

/// Source options
///
/// Internet radio demuxer options:
/// user agent, reconnect, reconnect on streamed content and the maximum
/// reconnect backoff.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Client identifier sent as User-Agent
    pub user_agent: String,

    /// Re-dial after a read error on the connection
    pub reconnect: bool,

    /// Also re-dial streams without a known length (live radio)
    pub reconnect_streamed: bool,

    /// Re-dial when a streamed response ends cleanly
    pub reconnect_at_eof: bool,

    /// Give up a reconnect cycle once the backoff exceeds this
    pub reconnect_delay_max_secs: u64,

    /// TCP connect timeout
    pub connect_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            user_agent: "VirtualRadioSource/1.0".to_string(),
            reconnect: true,
            reconnect_streamed: true,
            reconnect_at_eof: true,
            reconnect_delay_max_secs: 5,
            connect_timeout_secs: 10,
        }
    }
}

impl SourceConfig {
    pub fn reconnect_delay_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_max_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Buffer sizing and worker loop timing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Ring buffer capacity expressed as audio duration
    pub ring_buffer_ms: u64,

    /// Most output one pump may produce, as audio duration. Larger decoded
    /// packets stay queued in the resampler and drain on later pumps.
    pub scratch_ms: u64,

    /// Sleep between retries when no packet is available
    pub stall_sleep_ms: u64,

    /// Consecutive empty reads before the session is declared failed.
    /// `None` retries until stopped.
    pub max_stall_retries: Option<u32>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            ring_buffer_ms: 1000,
            scratch_ms: 500,
            stall_sleep_ms: 10,
            max_stall_retries: None,
        }
    }
}

impl BufferConfig {
    pub fn ring_buffer_duration(&self) -> Duration {
        Duration::from_millis(self.ring_buffer_ms)
    }

    pub fn scratch_duration(&self) -> Duration {
        Duration::from_millis(self.scratch_ms)
    }

    pub fn stall_sleep(&self) -> Duration {
        Duration::from_millis(self.stall_sleep_ms)
    }
}

impl DecoderConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: DecoderConfig =
            toml::from_str(text).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded decoder configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.format.validate()?;
        if self.buffer.ring_buffer_ms == 0 {
            return Err(Error::Config("buffer.ring_buffer_ms must be positive".to_string()));
        }
        if self.buffer.scratch_ms == 0 {
            return Err(Error::Config("buffer.scratch_ms must be positive".to_string()));
        }
        if self.buffer.stall_sleep_ms == 0 {
            return Err(Error::Config("buffer.stall_sleep_ms must be positive".to_string()));
        }
        Ok(())
    }
}
