//! Video sources the sampler draws from
//!
//! The host owns the camera; it hands the session something implementing
//! [`VideoSource`]. Two implementations ship here: a latest-frame slot the host
//! pushes into, and a fixed still image.

use image::RgbImage;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::VideoError;

/// Something the frame sampler can snapshot
pub trait VideoSource: Send + Sync {
    /// Whether the source is currently producing frames
    fn is_active(&self) -> bool;

    /// Copy of the current frame, if there is one
    fn capture(&self) -> Option<RgbImage>;
}

/// Latest-frame slot fed by the host's camera pipeline.
///
/// Only the most recent frame is kept. Deactivating clears it so a restarted
/// camera never serves a stale picture.
#[derive(Default)]
pub struct SharedFrameSource {
    latest: Mutex<Option<RgbImage>>,
    active: AtomicBool,
}

impl SharedFrameSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame
    pub fn push_frame(&self, frame: RgbImage) {
        *self.latest.lock() = Some(frame);
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
        if !active {
            self.latest.lock().take();
        }
    }
}

impl VideoSource for SharedFrameSource {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn capture(&self) -> Option<RgbImage> {
        if !self.is_active() {
            return None;
        }
        self.latest.lock().clone()
    }
}

/// A fixed picture served on every tick
pub struct StillImageSource {
    image: RgbImage,
}

impl StillImageSource {
    /// Load any format the `image` crate can decode
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VideoError> {
        let path = path.as_ref();
        let image = image::open(path)
            .map_err(|e| VideoError::Load(format!("{}: {}", path.display(), e)))?
            .to_rgb8();
        tracing::info!(
            "Loaded still image {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );
        Ok(Self { image })
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }
}

impl VideoSource for StillImageSource {
    fn is_active(&self) -> bool {
        true
    }

    fn capture(&self) -> Option<RgbImage> {
        Some(self.image.clone())
    }
}
