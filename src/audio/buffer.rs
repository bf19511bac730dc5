//! Audio chunk and playback unit types
//!
//! [`AudioChunk`] is the outbound microphone unit, [`PlaybackUnit`] the
//! inbound speech unit. [`ChunkAssembler`] cuts a continuous mono stream into
//! fixed-size chunks without holding more than one chunk's worth of samples.

use std::sync::Arc;

use bytes::Bytes;

use crate::codec::encode_pcm16;

/// One fixed-size unit of captured microphone audio, PCM16 LE mono
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Encoded samples
    pub data: Bytes,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count (always 1)
    pub channels: u16,
    /// Capture order, starting at 0 for each capture run
    pub sequence: u64,
}

impl AudioChunk {
    /// Number of samples in the chunk
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    /// Chunk duration in microseconds
    pub fn duration_us(&self) -> u64 {
        (self.sample_count() as u64 * 1_000_000) / self.sample_rate as u64
    }
}

/// One decoded, independently playable speech buffer
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackUnit {
    /// Normalized mono samples
    pub samples: Arc<[f32]>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Arrival order within the engine
    pub sequence: u64,
}

impl PlaybackUnit {
    pub fn new(samples: Vec<f32>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            sequence,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in microseconds
    pub fn duration_us(&self) -> u64 {
        (self.samples.len() as u64 * 1_000_000) / self.sample_rate as u64
    }
}

/// Cuts a mono sample stream into fixed-size PCM16 chunks
pub struct ChunkAssembler {
    chunk_samples: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl ChunkAssembler {
    pub fn new(chunk_samples: usize, sample_rate: u32) -> Self {
        let chunk_samples = chunk_samples.max(1);
        Self {
            chunk_samples,
            sample_rate,
            pending: Vec::with_capacity(chunk_samples * 2),
            next_sequence: 0,
        }
    }

    /// Append samples and emit every complete chunk, in order
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(AudioChunk)) {
        self.pending.extend_from_slice(samples);

        let mut offset = 0;
        while self.pending.len() - offset >= self.chunk_samples {
            let end = offset + self.chunk_samples;
            let data = Bytes::from(encode_pcm16(&self.pending[offset..end]));
            emit(AudioChunk {
                data,
                sample_rate: self.sample_rate,
                channels: 1,
                sequence: self.next_sequence,
            });
            self.next_sequence += 1;
            offset = end;
        }
        self.pending.drain(..offset);
    }

    /// Samples waiting for the next chunk
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.next_sequence = 0;
    }
}
