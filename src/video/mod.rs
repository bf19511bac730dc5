//! Camera frame sampling

pub mod sampler;
pub mod source;

pub use sampler::{FrameCallback, FrameSample, FrameSampler, SamplerConfig};
pub use source::{SharedFrameSource, StillImageSource, VideoSource};
