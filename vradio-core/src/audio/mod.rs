//! Source, demux, decode and resample stages

pub mod decoder;
pub mod resampler;
pub mod source;
pub mod types;

pub use resampler::StreamResampler;
pub use types::DecodedFormat;
