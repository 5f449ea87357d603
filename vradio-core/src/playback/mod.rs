//! Decode worker, session lifecycle and PCM buffering

pub mod decoder_worker;
pub mod ring_buffer;
pub mod session;
pub mod state;

pub use decoder_worker::StreamDecoder;
pub use ring_buffer::{ByteRingBuffer, RingBufferStats};
pub use session::{DecodeSession, Pump, SessionBackend, SymphoniaBackend};
pub use state::{DecoderStatus, SessionState, StopSignal};
