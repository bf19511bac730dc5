//! PCM16 decoder
//!
//! Turns inbound little-endian signed 16-bit speech into normalized f32.

use crate::error::CodecError;

/// PCM16 decoder with silence detection and statistics
pub struct Pcm16Decoder {
    /// Peak amplitude below which a chunk is reported silent
    silence_threshold: f32,
    /// Chunks decoded
    chunks_decoded: u64,
    /// Chunks rejected as malformed
    chunks_rejected: u64,
    /// Total samples produced
    samples_produced: u64,
}

/// Result of decoding one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedChunk {
    pub samples: Vec<f32>,
    pub peak: f32,
}

impl DecodedChunk {
    pub fn is_silent(&self, threshold: f32) -> bool {
        self.peak < threshold
    }
}

impl Pcm16Decoder {
    pub fn new(silence_threshold: f32) -> Self {
        Self {
            silence_threshold,
            chunks_decoded: 0,
            chunks_rejected: 0,
            samples_produced: 0,
        }
    }

    /// Decode PCM16 bytes into samples in [-1.0, 1.0)
    pub fn decode(&mut self, bytes: &[u8]) -> Result<DecodedChunk, CodecError> {
        if bytes.len() % 2 != 0 {
            self.chunks_rejected += 1;
            return Err(CodecError::OddPcmLength(bytes.len()));
        }

        let mut peak = 0.0f32;
        let samples: Vec<f32> = bytes
            .chunks_exact(2)
            .map(|pair| {
                let sample = i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0;
                peak = peak.max(sample.abs());
                sample
            })
            .collect();

        self.chunks_decoded += 1;
        self.samples_produced += samples.len() as u64;

        Ok(DecodedChunk { samples, peak })
    }

    /// Whether a decoded chunk falls under this decoder's silence threshold
    pub fn is_silent(&self, chunk: &DecodedChunk) -> bool {
        chunk.is_silent(self.silence_threshold)
    }

    pub fn silence_threshold(&self) -> f32 {
        self.silence_threshold
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            chunks_decoded: self.chunks_decoded,
            chunks_rejected: self.chunks_rejected,
            samples_produced: self.samples_produced,
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone, Default)]
pub struct DecoderStats {
    pub chunks_decoded: u64,
    pub chunks_rejected: u64,
    pub samples_produced: u64,
}
