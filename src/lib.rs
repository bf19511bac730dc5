//! # Live Media Session
//!
//! Real-time multimodal conversation with a remote model over a single
//! full-duplex WebSocket.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                               LOCAL DEVICE                               │
//! │  ┌─────────────┐        ┌─────────────┐                                  │
//! │  │ Microphone  │        │   Camera    │  (VideoSource from the host)     │
//! │  └──────┬──────┘        └──────┬──────┘                                  │
//! │         │ cpal callback        │ 1s interval                             │
//! │         ▼                      ▼                                         │
//! │  ┌─────────────┐        ┌─────────────┐                                  │
//! │  │AudioChunker │        │FrameSampler │                                  │
//! │  │ mono/16k    │        │   JPEG      │                                  │
//! │  │ PCM16 chunk │        │             │                                  │
//! │  └──────┬──────┘        └──────┬──────┘                                  │
//! │         │ SPSC channel         │                                         │
//! │         ▼                      ▼                                         │
//! │  ┌───────────────────────────────────────────────────────────────────┐   │
//! │  │               SessionController (session::controller)              │   │
//! │  │   Disconnected → Connecting → Connected → Disconnected            │   │
//! │  │   outbound framing  ·  inbound dispatch  ·  event channel to UI   │   │
//! │  └──────┬─────────────────────────────┬──────────────────────▲──────┘   │
//! │         │ inline audio                │ toolCall batch       │ results   │
//! │         ▼                             ▼                      │          │
//! │  ┌─────────────┐              ┌──────────────┐               │          │
//! │  │PlaybackEngine│             │ToolDispatcher│───────────────┘          │
//! │  │ FIFO + slot │              │ name → handler│                          │
//! │  └──────┬──────┘              └──────────────┘                           │
//! │         ▼ cpal output (24k mono rendered to device format)               │
//! └─────────┼────────────────────────────────────────────────────────────────┘
//!           ▼
//!       Speaker                       ▲▼ WebSocket, one JSON object per frame
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod tools;
pub mod video;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate of the outbound microphone stream
    pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

    /// Sample rate of inbound synthesized speech
    pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

    /// Samples per outbound audio chunk (32 ms at 16 kHz)
    pub const DEFAULT_CHUNK_SAMPLES: usize = 512;

    /// Peak amplitude below which an inbound chunk counts as silence
    pub const SILENCE_THRESHOLD: f32 = 0.001;

    /// Gain ramp applied to the cancelled unit before the output node resets
    pub const DEFAULT_CANCEL_RAMP_MS: u32 = 10;

    /// Camera sampling interval
    pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 1000;

    /// JPEG quality for sampled frames
    pub const DEFAULT_JPEG_QUALITY: u8 = 70;

    /// Capacity of the capture → session hand-off channel (in chunks)
    pub const CHUNK_CHANNEL_CAPACITY: usize = 256;

    /// Default model identifier sent in the setup frame
    pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";

    /// Default WebSocket endpoint
    pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";
}
