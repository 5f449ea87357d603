//! Demux and decode using symphonia
//!
//! Provides the pieces of session setup that touch the codec library:
//! probing the container, picking the audio track, building the codec and
//! converting decoded buffers to interleaved f32.

use crate::audio::source::OpenedSource;
use crate::error::{Error, Result};
use std::sync::OnceLock;
use symphonia::core::audio::{AudioBufferRef, SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CodecParameters, CodecRegistry, Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use tracing::{debug, trace};

/// Codec registry for radio formats
fn get_codec_registry() -> &'static CodecRegistry {
    static CODEC_REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();
    CODEC_REGISTRY.get_or_init(|| {
        let mut registry = CodecRegistry::new();
        registry.register_all::<symphonia::default::codecs::MpaDecoder>();
        registry.register_all::<symphonia::default::codecs::AacDecoder>();
        registry.register_all::<symphonia::default::codecs::VorbisDecoder>();
        registry.register_all::<symphonia::default::codecs::FlacDecoder>();
        registry.register_all::<symphonia::default::codecs::PcmDecoder>();
        registry.register_all::<symphonia::default::codecs::AdpcmDecoder>();
        registry
    })
}

/// Probe the container and return its reader
pub fn probe(opened: OpenedSource) -> Result<Box<dyn FormatReader>> {
    let OpenedSource { source, hint } = opened;
    let mss = MediaSourceStream::new(source, Default::default());

    let format_opts = FormatOptions {
        enable_gapless: false,
        ..Default::default()
    };

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_opts, &MetadataOptions::default())
        .map_err(|e| Error::Decode(format!("Failed to probe format: {}", e)))?;

    Ok(probed.format)
}

/// The audio track chosen for a session
#[derive(Debug, Clone)]
pub struct SelectedTrack {
    /// Position in the container's track list
    pub index: usize,

    /// Track id carried by packets
    pub id: u32,

    pub codec_params: CodecParameters,
}

impl SelectedTrack {
    pub fn sample_rate(&self) -> Option<u32> {
        self.codec_params.sample_rate
    }

    pub fn channels(&self) -> Option<usize> {
        self.codec_params.channels.map(|c| c.count())
    }
}

/// Pick the first track with a known codec and sample rate, in container
/// order
pub fn select_audio_track(format: &dyn FormatReader) -> Result<SelectedTrack> {
    let (index, track) = format
        .tracks()
        .iter()
        .enumerate()
        .find(|(_, t)| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
        .ok_or_else(|| Error::Decode("No audio track found".to_string()))?;

    debug!(
        "Selected track {} (id={}): codec={:?}, sample_rate={:?}, channels={:?}",
        index,
        track.id,
        track.codec_params.codec,
        track.codec_params.sample_rate,
        track.codec_params.channels.map(|c| c.count())
    );

    Ok(SelectedTrack {
        index,
        id: track.id,
        codec_params: track.codec_params.clone(),
    })
}

/// Build a codec for the track's parameters
pub fn make_decoder(codec_params: &CodecParameters) -> Result<Box<dyn Decoder>> {
    get_codec_registry()
        .make(codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))
}

/// Outcome of one demux read
pub enum PacketRead {
    Packet(Packet),

    /// Nothing available right now (underrun, end of data, broken
    /// connection being re-dialed)
    Stall,

    /// Demuxer started a new logical stream; codec state must be reset
    ResetRequired,
}

/// Read the next packet, folding every read failure into `Stall`
pub fn read_packet(format: &mut dyn FormatReader) -> PacketRead {
    match format.next_packet() {
        Ok(packet) => PacketRead::Packet(packet),
        Err(SymphoniaError::ResetRequired) => PacketRead::ResetRequired,
        Err(SymphoniaError::IoError(e)) => {
            trace!("Packet read stalled: {}", e);
            PacketRead::Stall
        }
        Err(e) => {
            trace!("Packet read failed: {}", e);
            PacketRead::Stall
        }
    }
}

/// Converts decoded buffers of any sample type to interleaved f32
#[derive(Default)]
pub struct PcmConverter {
    buffer: Option<SampleBuffer<f32>>,
    spec: Option<SignalSpec>,
}

impl PcmConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert one decoded buffer
    ///
    /// Returns the interleaved samples together with the buffer's rate
    /// and channel count.
    pub fn convert(&mut self, decoded: AudioBufferRef<'_>) -> (&[f32], u32, usize) {
        let spec = *decoded.spec();
        let needed = decoded.capacity() as u64;

        let reuse = matches!(
            (&self.buffer, &self.spec),
            (Some(buf), Some(old)) if *old == spec && buf.capacity() as u64 >= needed * spec.channels.count() as u64
        );
        if !reuse {
            self.buffer = Some(SampleBuffer::<f32>::new(needed, spec));
            self.spec = Some(spec);
        }

        let buffer = self.buffer.get_or_insert_with(|| SampleBuffer::<f32>::new(needed, spec));
        buffer.copy_interleaved_ref(decoded);
        (buffer.samples(), spec.rate, spec.channels.count())
    }
}
