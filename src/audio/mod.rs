//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;

pub use buffer::{AudioChunk, ChunkAssembler, PlaybackUnit};
pub use capture::{
    AudioChunker, CaptureConfig, CaptureStream, ChunkEmitter, CpalMicrophone, MicrophoneSource,
};
pub use device::{list_devices, get_device_by_id, AudioDevice, AudioDeviceInfo};
pub use playback::{
    CpalOutput, EnqueueOutcome, OutputDevice, OutputSink, PlaybackConfig, PlaybackEngine,
    PlaybackStats, PlaybackStatus, Renderer,
};
