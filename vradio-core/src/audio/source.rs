//! Byte-stream sources for the demuxer
//!
//! Opens a URL as a symphonia `MediaSource`:
//! - `http://` / `https://`: blocking reqwest body with reconnect handling
//! - `file://` URLs and bare paths: local files
//!
//! Reconnect policy for HTTP follows the usual internet-radio demuxer
//! options: after a broken connection the source re-dials with a backoff
//! of 0, 1, 3, 7... seconds and gives up the cycle once the next delay
//! would exceed `reconnect_delay_max`. Resources with a known length are
//! re-requested with `Range` from the current offset so no byte reaches
//! the demuxer twice. A failed cycle surfaces as a read
//! error; the next read starts a new cycle, so a dead station is retried
//! until the session is stopped. All waiting is done in short slices that
//! check the session's stop signal.

use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::playback::state::StopSignal;
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_TYPE, RANGE};
use reqwest::StatusCode;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use symphonia::core::io::MediaSource;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

/// A source ready to hand to the probe
pub struct OpenedSource {
    pub source: Box<dyn MediaSource>,
    pub hint: Hint,
}

impl std::fmt::Debug for OpenedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedSource")
            .field("seekable", &self.source.is_seekable())
            .field("byte_len", &self.source.byte_len())
            .finish()
    }
}

/// Where a URL points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Http(String),
    File(PathBuf),
}

impl SourceLocation {
    /// Classify a URL or path
    pub fn parse(url: &str) -> Result<Self> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(Error::Source("empty URL".to_string()));
        }

        match reqwest::Url::parse(trimmed) {
            Ok(parsed) => match parsed.scheme() {
                "http" | "https" => Ok(SourceLocation::Http(parsed.to_string())),
                "file" => parsed
                    .to_file_path()
                    .map(SourceLocation::File)
                    .map_err(|_| Error::Source(format!("invalid file URL: {}", trimmed))),
                // Drive letters parse as one-letter schemes
                scheme if scheme.len() == 1 => Ok(SourceLocation::File(PathBuf::from(trimmed))),
                scheme => Err(Error::Source(format!("unsupported URL scheme: {}", scheme))),
            },
            Err(_) => Ok(SourceLocation::File(PathBuf::from(trimmed))),
        }
    }
}

/// Open `url` for demuxing
///
/// Only the initial connection happens here; a failure is terminal for
/// the session.
pub fn open_source(url: &str, options: &SourceConfig, stop: &StopSignal, poll: Duration) -> Result<OpenedSource> {
    match SourceLocation::parse(url)? {
        SourceLocation::Http(url) => {
            let stream = HttpStream::connect(&url, options, stop.clone(), poll)?;
            let mut hint = Hint::new();
            if let Some(ext) = stream.content_type().and_then(extension_for_mime) {
                hint.with_extension(ext);
            } else if let Some(ext) = url_extension(&url) {
                hint.with_extension(&ext);
            }
            Ok(OpenedSource {
                source: Box::new(stream),
                hint,
            })
        }
        SourceLocation::File(path) => {
            let file = std::fs::File::open(&path)
                .map_err(|e| Error::Source(format!("Failed to open file {}: {}", path.display(), e)))?;
            debug!("Opened local file source: {}", path.display());

            let mut hint = Hint::new();
            if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                hint.with_extension(ext);
            }
            Ok(OpenedSource {
                source: Box::new(file),
                hint,
            })
        }
    }
}

/// Map a Content-Type to a probe extension hint
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let essence = mime.split(';').next()?.trim().to_ascii_lowercase();
    match essence.as_str() {
        "audio/mpeg" | "audio/mp3" | "audio/mpeg3" => Some("mp3"),
        "audio/aac" | "audio/aacp" | "audio/x-aac" => Some("aac"),
        "audio/ogg" | "application/ogg" | "audio/vorbis" => Some("ogg"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav"),
        "audio/mp4" | "audio/x-m4a" => Some("m4a"),
        _ => None,
    }
}

fn url_extension(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.last()?.to_string();
    Path::new(&last)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Backoff before reconnect attempt `attempt` (0-based): 0, 1, 3, 7... seconds
fn reconnect_delay(attempt: u32) -> Duration {
    let secs = (1u64 << attempt.min(16)) - 1;
    Duration::from_secs(secs)
}

/// HTTP response body exposed as a non-seekable `MediaSource`
pub struct HttpStream {
    client: Client,
    url: String,
    options: SourceConfig,
    stop: StopSignal,
    poll: Duration,

    /// Current response body; `None` after a broken connection.
    /// Held in a Mutex so the source is `Sync` as symphonia requires.
    body: Mutex<Option<Response>>,

    /// Response had no Content-Length
    streamed: bool,

    /// Total resource length from the first response
    content_length: Option<u64>,
    content_type: Option<String>,

    /// Bytes delivered to the demuxer so far
    position: u64,
}

impl HttpStream {
    /// Build the client and perform the initial request
    pub fn connect(url: &str, options: &SourceConfig, stop: StopSignal, poll: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(options.user_agent.clone())
            .connect_timeout(options.connect_timeout())
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| Error::Source(format!("Failed to build HTTP client: {}", e)))?;

        let response = request(&client, url, None)?;
        let content_length = response.content_length();
        let streamed = content_length.is_none();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        info!(
            "Connected to {} (content-type={:?}, streamed={})",
            url, content_type, streamed
        );

        Ok(Self {
            client,
            url: url.to_string(),
            options: options.clone(),
            stop,
            poll,
            body: Mutex::new(Some(response)),
            streamed,
            content_length,
            content_type,
            position: 0,
        })
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn is_streamed(&self) -> bool {
        self.streamed
    }

    fn may_reconnect_on_error(&self) -> bool {
        self.options.reconnect && (!self.streamed || self.options.reconnect_streamed)
    }

    fn may_reconnect_at_eof(&self) -> bool {
        self.streamed && self.options.reconnect_at_eof && self.may_reconnect_on_error()
    }

    /// A fixed-length body ended before all of it was delivered
    fn ended_early(&self) -> bool {
        self.content_length.is_some_and(|len| self.position < len)
    }

    fn stopped() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionAborted, "stop requested")
    }

    /// One reconnect cycle with growing backoff
    fn reconnect(&mut self) -> io::Result<()> {
        let max_delay = self.options.reconnect_delay_max();
        let mut attempt = 0;

        loop {
            let delay = reconnect_delay(attempt);
            if delay > max_delay {
                warn!("Giving up reconnect to {} after {} attempts", self.url, attempt);
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    format!("reconnect to {} failed", self.url),
                ));
            }

            if self.stop.sleep(delay, self.poll) {
                return Err(Self::stopped());
            }

            // Fixed-length resources resume where the demuxer left off;
            // live streams just continue from "now"
            let resume_from = (!self.streamed && self.position > 0).then_some(self.position);

            debug!("Reconnecting to {} (attempt {}, delay {:?})", self.url, attempt + 1, delay);
            let resumed = request(&self.client, &self.url, resume_from)
                .map_err(|e| io::Error::new(io::ErrorKind::NotConnected, e.to_string()))
                .and_then(|response| skip_to_offset(response, resume_from));

            match resumed {
                Ok(response) => {
                    info!("Reconnected to {} at byte {}", self.url, self.position);
                    *self.body.get_mut().unwrap_or_else(PoisonError::into_inner) = Some(response);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Reconnect attempt {} to {} failed: {}", attempt + 1, self.url, e);
                    attempt += 1;
                }
            }
        }
    }
}

fn request(client: &Client, url: &str, resume_from: Option<u64>) -> Result<Response> {
    let mut builder = client.get(url);
    if let Some(offset) = resume_from {
        builder = builder.header(RANGE, format!("bytes={}-", offset));
    }
    builder
        .send()
        .and_then(Response::error_for_status)
        .map_err(|e| Error::Source(format!("Request to {} failed: {}", url, e)))
}

/// Position a re-dialed body at `resume_from`
///
/// A `206` already starts there. A server that ignores the range sends the
/// whole resource again, so the bytes already delivered are discarded.
fn skip_to_offset(mut response: Response, resume_from: Option<u64>) -> io::Result<Response> {
    let Some(offset) = resume_from else {
        return Ok(response);
    };
    if response.status() == StatusCode::PARTIAL_CONTENT {
        return Ok(response);
    }

    debug!("Range ignored by server, skipping {} bytes", offset);
    let skipped = io::copy(&mut (&mut response).take(offset), &mut io::sink())?;
    if skipped < offset {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("resource shorter than resume offset {}", offset),
        ));
    }
    Ok(response)
}

impl Read for HttpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if self.stop.is_requested() {
                return Err(Self::stopped());
            }

            let body = self.body.get_mut().unwrap_or_else(PoisonError::into_inner);
            let result = match body.as_mut() {
                Some(response) => response.read(buf),
                None => Err(io::Error::new(io::ErrorKind::NotConnected, "connection lost")),
            };

            match result {
                Ok(0) if self.ended_early() => {
                    if !self.may_reconnect_on_error() {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "response ended before Content-Length",
                        ));
                    }
                    warn!(
                        "Response from {} ended at byte {} of {:?}, reconnecting",
                        self.url, self.position, self.content_length
                    );
                }
                Ok(0) => {
                    if !self.may_reconnect_at_eof() {
                        return Ok(0);
                    }
                    warn!("Stream {} ended, reconnecting", self.url);
                }
                Ok(n) => {
                    self.position += n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if !self.may_reconnect_on_error() {
                        return Err(e);
                    }
                    warn!("Read from {} failed: {}, reconnecting", self.url, e);
                }
            }

            *self.body.get_mut().unwrap_or_else(PoisonError::into_inner) = None;
            self.reconnect()?;
        }
    }
}

impl Seek for HttpStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.position),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "network stream is not seekable",
            )),
        }
    }
}

impl MediaSource for HttpStream {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}
