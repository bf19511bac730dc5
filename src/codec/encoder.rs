//! Outbound encoders
//!
//! PCM16 for microphone samples, JPEG for camera frames.

use bytes::Bytes;
use image::codecs::jpeg;
use image::RgbImage;

use crate::constants::DEFAULT_JPEG_QUALITY;
use crate::error::CodecError;

/// Encode f32 samples as little-endian signed 16-bit PCM.
///
/// Samples are clamped to [-1.0, 1.0] before scaling.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = if clamped < 0.0 {
            (clamped * 32768.0) as i16
        } else {
            (clamped * 32767.0) as i16
        };
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// JPEG encoder for sampled camera frames
pub struct JpegEncoder {
    quality: u8,
    /// Frames encoded
    frames_encoded: u64,
    /// Total bytes produced
    bytes_produced: u64,
}

impl JpegEncoder {
    /// Create an encoder; quality is clamped to 1..=100
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            frames_encoded: 0,
            bytes_produced: 0,
        }
    }

    /// Encode an RGB raster
    pub fn encode(&mut self, frame: &RgbImage) -> Result<Bytes, CodecError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(CodecError::EmptyFrame(width, height));
        }

        let mut out = Vec::with_capacity((width * height / 4) as usize);
        let mut encoder = jpeg::JpegEncoder::new_with_quality(&mut out, self.quality);
        encoder
            .encode_image(frame)
            .map_err(|e| CodecError::ImageEncode(e.to_string()))?;

        self.frames_encoded += 1;
        self.bytes_produced += out.len() as u64;
        Ok(Bytes::from(out))
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}
