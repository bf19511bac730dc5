//! Sample and image codecs
//!
//! PCM16 little-endian conversion for the microphone and speech streams,
//! a streaming resampler for device-rate capture, and JPEG encoding for
//! camera frames.

pub mod decoder;
pub mod encoder;
pub mod resample;

pub use decoder::Pcm16Decoder;
pub use encoder::{encode_pcm16, JpegEncoder};
pub use resample::StreamResampler;
