//! Decode sessions
//!
//! A session is one attempt to stream a URL: open and probe the source,
//! select the audio track, build decoder and resampler, then produce PCM
//! one packet at a time until the worker stops pumping it.
//!
//! The worker only sees the `SessionBackend` / `DecodeSession` traits, so
//! the stop/stall/retry policy in `decoder_worker` is independent of the
//! codec library. Dropping a session releases everything it holds.

use crate::audio::decoder::{self, PacketRead, PcmConverter};
use crate::audio::resampler::StreamResampler;
use crate::audio::source;
use crate::audio::types::DecodedFormat;
use crate::config::DecoderConfig;
use crate::error::{Error, Result};
use crate::playback::state::StopSignal;
use symphonia::core::codecs::Decoder;
use symphonia::core::formats::FormatReader;
use tracing::{debug, info, trace, warn};

/// Result of pumping a session once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pump {
    /// PCM bytes were appended to the scratch buffer
    Produced,

    /// A packet was consumed without output (other track, decode error,
    /// resampler priming)
    Skipped,

    /// No packet available right now
    Stalled,
}

/// An open, decodable stream
pub trait DecodeSession {
    /// Process at most one demuxed packet, appending output PCM to
    /// `scratch`
    ///
    /// Transient conditions are reported as `Ok(Pump::Stalled)` or
    /// `Ok(Pump::Skipped)`; an `Err` ends the session.
    fn pump(&mut self, scratch: &mut Vec<u8>) -> Result<Pump>;
}

/// Factory for sessions, shared with the background thread
pub trait SessionBackend: Send + Sync + 'static {
    /// Run session setup for `url`
    ///
    /// May block on the network. Should return `Error::Stopped` promptly
    /// once `stop` is requested.
    fn open_session(&self, url: &str, format: &DecodedFormat, stop: &StopSignal) -> Result<Box<dyn DecodeSession>>;
}

/// Production backend: reqwest/file source, symphonia demux and decode,
/// rubato resampling
#[derive(Debug, Clone, Default)]
pub struct SymphoniaBackend {
    config: DecoderConfig,
}

impl SymphoniaBackend {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }
}

impl SessionBackend for SymphoniaBackend {
    fn open_session(&self, url: &str, format: &DecodedFormat, stop: &StopSignal) -> Result<Box<dyn DecodeSession>> {
        let poll = self.config.buffer.stall_sleep();

        // 1. Connect and probe
        let opened = source::open_source(url, &self.config.source, stop, poll)?;
        if stop.is_requested() {
            return Err(Error::Stopped);
        }
        let reader = decoder::probe(opened)?;

        // 2. First audio track
        let track = decoder::select_audio_track(reader.as_ref())?;

        // 3. Codec
        let codec = decoder::make_decoder(&track.codec_params)?;

        // 4. Resampler. Containers that only reveal the layout after the
        //    first decoded frame get a provisional one, rebuilt on mismatch.
        let source_rate = track.sample_rate().unwrap_or(format.sample_rate);
        let source_channels = track.channels().unwrap_or(format.channels as usize);
        let resampler = StreamResampler::new(source_rate, source_channels, format)?;

        info!(
            "Session ready for {}: {}Hz {}ch -> {}Hz {}ch",
            url, source_rate, source_channels, format.sample_rate, format.channels
        );

        Ok(Box::new(SymphoniaSession {
            resampler,
            converter: PcmConverter::new(),
            decoder: codec,
            format: reader,
            track_id: track.id,
            target: *format,
            scratch_frames: scratch_frames(format, &self.config),
            decode_errors: 0,
        }))
    }
}

/// Session state owned by the background thread
///
/// Field order is release order: resampler, decoder, demuxer.
pub struct SymphoniaSession {
    resampler: StreamResampler,
    converter: PcmConverter,
    decoder: Box<dyn Decoder>,
    format: Box<dyn FormatReader>,
    track_id: u32,
    target: DecodedFormat,

    /// Output cap per pump
    scratch_frames: usize,
    decode_errors: u64,
}

fn scratch_frames(format: &DecodedFormat, config: &DecoderConfig) -> usize {
    (format.bytes_for(config.buffer.scratch_duration()) / format.frame_bytes()).max(1)
}

impl SymphoniaSession {
    /// Rebuild the codec after the demuxer reports a new logical stream
    fn reset_decoder(&mut self) -> Result<()> {
        let track = decoder::select_audio_track(self.format.as_ref())?;
        self.decoder = decoder::make_decoder(&track.codec_params)?;
        self.track_id = track.id;
        self.resampler.reset();
        debug!("Decoder reset for new stream (track id={})", track.id);
        Ok(())
    }
}

impl DecodeSession for SymphoniaSession {
    fn pump(&mut self, scratch: &mut Vec<u8>) -> Result<Pump> {
        // Output held back by the cap goes out before the next packet
        if self.resampler.has_backlog() {
            return match self.resampler.process(&[], scratch, self.scratch_frames) {
                Ok(0) => Ok(Pump::Skipped),
                Ok(_) => Ok(Pump::Produced),
                Err(e) => {
                    warn!("Resampling failed, backlog dropped: {}", e);
                    self.resampler.reset();
                    Ok(Pump::Skipped)
                }
            };
        }

        let packet = match decoder::read_packet(self.format.as_mut()) {
            PacketRead::Packet(packet) => packet,
            PacketRead::Stall => return Ok(Pump::Stalled),
            PacketRead::ResetRequired => {
                self.reset_decoder()?;
                return Ok(Pump::Skipped);
            }
        };

        if packet.track_id() != self.track_id {
            return Ok(Pump::Skipped);
        }

        let decoded = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.decode_errors += 1;
                if self.decode_errors % 100 == 1 {
                    warn!("Decode error, packet dropped: {} (total: {})", e, self.decode_errors);
                } else {
                    trace!("Decode error, packet dropped: {}", e);
                }
                return Ok(Pump::Skipped);
            }
        };

        let (samples, rate, channels) = self.converter.convert(decoded);

        if !self.resampler.matches_source(rate, channels) {
            debug!(
                "Source layout changed: {}Hz {}ch -> {}Hz {}ch",
                self.resampler.source_rate(),
                self.resampler.source_channels(),
                rate,
                channels
            );
            self.resampler = StreamResampler::new(rate, channels, &self.target)?;
        }

        if let Err(e) = self.resampler.process(samples, scratch, self.scratch_frames) {
            warn!("Resampling failed, packet dropped: {}", e);
            self.resampler.reset();
            return Ok(Pump::Skipped);
        }

        Ok(if scratch.is_empty() { Pump::Skipped } else { Pump::Produced })
    }
}

impl Drop for SymphoniaSession {
    fn drop(&mut self) {
        debug!("Releasing session resources (resampler, decoder, demuxer)");
    }
}
