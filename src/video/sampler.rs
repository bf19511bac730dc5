//! Periodic frame sampling
//!
//! A timer task snapshots the video source once per interval, JPEG-encodes the
//! snapshot off the async workers and hands the bytes to a callback. Ticks
//! that find the source inactive are skipped; ticks missed while an encode is
//! running are skipped too, so nothing is ever buffered across cycles.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::codec::JpegEncoder;
use crate::constants::{DEFAULT_FRAME_INTERVAL_MS, DEFAULT_JPEG_QUALITY};
use crate::protocol::IMAGE_JPEG_MIME;
use crate::video::source::VideoSource;

/// One encoded camera frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSample {
    pub data: Bytes,
    pub mime_type: &'static str,
}

/// Receives every encoded frame
pub type FrameCallback = Arc<dyn Fn(FrameSample) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub interval: Duration,
    pub jpeg_quality: u8,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_FRAME_INTERVAL_MS),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Running frame sampler; must be created inside a tokio runtime
pub struct FrameSampler {
    task: Option<JoinHandle<()>>,
    stopped: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
}

impl FrameSampler {
    pub fn start(
        source: Arc<dyn VideoSource>,
        config: SamplerConfig,
        on_frame: FrameCallback,
    ) -> Self {
        let stopped = Arc::new(AtomicBool::new(false));
        let delivered = Arc::new(AtomicU64::new(0));

        tracing::info!(
            "Frame sampler started ({}ms, quality {})",
            config.interval.as_millis(),
            config.jpeg_quality
        );

        let task = tokio::spawn(run_sampler(
            source,
            config,
            on_frame,
            stopped.clone(),
            delivered.clone(),
        ));

        Self {
            task: Some(task),
            stopped,
            delivered,
        }
    }

    /// Cancel the timer. No callback runs once this returns.
    pub async fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            tracing::info!(
                "Frame sampler stopped after {} frame(s)",
                self.delivered.load(Ordering::Relaxed)
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    pub fn frames_delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl Drop for FrameSampler {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_sampler(
    source: Arc<dyn VideoSource>,
    config: SamplerConfig,
    on_frame: FrameCallback,
    stopped: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
) {
    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut encoder = Some(JpegEncoder::new(config.jpeg_quality));

    loop {
        interval.tick().await;

        if !source.is_active() {
            tracing::trace!("Video source inactive, skipping tick");
            continue;
        }
        let Some(frame) = source.capture() else {
            continue;
        };

        // Awaited inline: at most one encode in flight
        let mut job_encoder = encoder
            .take()
            .unwrap_or_else(|| JpegEncoder::new(config.jpeg_quality));
        let res = tokio::task::spawn_blocking(move || {
            let encoded = job_encoder.encode(&frame);
            (job_encoder, encoded)
        })
        .await;

        match res {
            Ok((returned, Ok(data))) => {
                encoder = Some(returned);
                if stopped.load(Ordering::SeqCst) {
                    return;
                }
                tracing::trace!("Frame encoded ({} bytes)", data.len());
                delivered.fetch_add(1, Ordering::Relaxed);
                on_frame(FrameSample {
                    data,
                    mime_type: IMAGE_JPEG_MIME,
                });
            }
            Ok((returned, Err(e))) => {
                encoder = Some(returned);
                tracing::warn!("Frame encode failed: {}", e);
            }
            Err(e) => {
                tracing::error!("Frame encode task failed: {}", e);
            }
        }
    }
}
