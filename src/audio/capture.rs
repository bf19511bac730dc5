//! Microphone capture
//!
//! [`AudioChunker`] opens the input device at its native configuration on a
//! dedicated thread, converts every callback block to mono at the capture
//! rate and hands complete PCM16 chunks to the session through a
//! [`ChunkEmitter`].

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Sample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::audio::buffer::{AudioChunk, ChunkAssembler};
use crate::audio::device::resolve_input_device;
use crate::codec::resample::{downmix_to_mono, StreamResampler};
use crate::constants::{CAPTURE_SAMPLE_RATE, DEFAULT_CHUNK_SAMPLES};
use crate::error::AudioError;

/// Capture settings
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Device id (`input:<name>`); `None` selects the default input
    pub device_id: Option<String>,
    /// Output sample rate of emitted chunks
    pub sample_rate: u32,
    /// Samples per emitted chunk
    pub chunk_samples: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            sample_rate: CAPTURE_SAMPLE_RATE,
            chunk_samples: DEFAULT_CHUNK_SAMPLES,
        }
    }
}

/// Order-preserving hand-off from the audio callback to the session.
///
/// The gate is held across each send so that once [`ChunkEmitter::close`]
/// returns no callback can still be mid-emit.
#[derive(Clone)]
pub struct ChunkEmitter {
    gate: Arc<Mutex<bool>>,
    tx: mpsc::Sender<AudioChunk>,
    emitted: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl ChunkEmitter {
    pub fn new(tx: mpsc::Sender<AudioChunk>) -> Self {
        Self {
            gate: Arc::new(Mutex::new(true)),
            tx,
            emitted: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Forward one chunk; returns false once closed or if the receiver lags
    pub fn emit(&self, chunk: AudioChunk) -> bool {
        let open = self.gate.lock();
        if !*open {
            return false;
        }
        match self.tx.try_send(chunk) {
            Ok(()) => {
                self.emitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Stop forwarding. No chunk is emitted after this returns.
    pub fn close(&self) {
        *self.gate.lock() = false;
    }

    pub fn is_open(&self) -> bool {
        *self.gate.lock()
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Chunks lost because the session fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Per-callback conversion: interleaved device samples → mono → capture
/// rate → fixed-size PCM16 chunks
pub struct CapturePipeline {
    channels: u16,
    resampler: StreamResampler,
    assembler: ChunkAssembler,
    mono: Vec<f32>,
    resampled: Vec<f32>,
    emitter: ChunkEmitter,
}

impl CapturePipeline {
    pub fn new(
        device_rate: u32,
        channels: u16,
        config: &CaptureConfig,
        emitter: ChunkEmitter,
    ) -> Self {
        Self {
            channels,
            resampler: StreamResampler::new(device_rate, config.sample_rate),
            assembler: ChunkAssembler::new(config.chunk_samples, config.sample_rate),
            mono: Vec::new(),
            resampled: Vec::new(),
            emitter,
        }
    }

    /// Process one callback block of interleaved samples
    pub fn process(&mut self, interleaved: &[f32]) {
        self.mono.clear();
        self.resampled.clear();
        downmix_to_mono(interleaved, self.channels, &mut self.mono);
        self.resampler.process(&self.mono, &mut self.resampled);

        let emitter = &self.emitter;
        self.assembler.push(&self.resampled, |chunk| {
            tracing::trace!("Captured chunk {} ({} samples)", chunk.sequence, chunk.sample_count());
            emitter.emit(chunk);
        });
    }
}

/// Microphone capture instance
pub struct AudioChunker {
    /// Device name
    device_name: String,

    /// Native stream configuration
    native_config: StreamConfig,

    /// Hand-off to the session
    emitter: ChunkEmitter,

    /// Tells the stream thread to drop the stream and exit
    shutdown: Arc<AtomicBool>,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Channel for stream errors
    error_rx: Receiver<AudioError>,
}

impl AudioChunker {
    /// Open the microphone and start emitting chunks.
    ///
    /// Blocks until the device stream is running or has failed to start, so
    /// call it off the async runtime.
    pub fn start(config: &CaptureConfig, emitter: ChunkEmitter) -> Result<Self, AudioError> {
        let device = resolve_input_device(config.device_id.as_deref())?;
        let supported = device.default_input_config()?;
        let sample_format = supported.sample_format();
        let native_config: StreamConfig = supported.config();
        let device_name = device.name.clone();

        tracing::info!(
            "Opening microphone '{}': {}Hz, {} channel(s), {:?} → {}Hz mono chunks of {}",
            device_name,
            native_config.sample_rate.0,
            native_config.channels,
            sample_format,
            config.sample_rate,
            config.chunk_samples
        );

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let shutdown = Arc::new(AtomicBool::new(false));

        let pipeline = CapturePipeline::new(
            native_config.sample_rate.0,
            native_config.channels,
            config,
            emitter.clone(),
        );
        let stream_config = native_config.clone();
        let shutdown_for_loop = shutdown.clone();

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let stream = match sample_format {
                    cpal::SampleFormat::F32 => {
                        build_stream::<f32>(&cpal_device, &stream_config, pipeline, error_tx)
                    }
                    cpal::SampleFormat::I16 => {
                        build_stream::<i16>(&cpal_device, &stream_config, pipeline, error_tx)
                    }
                    cpal::SampleFormat::U16 => {
                        build_stream::<u16>(&cpal_device, &stream_config, pipeline, error_tx)
                    }
                    other => Err(AudioError::UnsupportedConfig(format!(
                        "sample format {:?}",
                        other
                    ))),
                };

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive until stop()
                while !shutdown_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, releasing the microphone
            })
            .map_err(|e| AudioError::Thread(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(AudioError::Thread("capture thread exited during start".into()));
            }
        }

        Ok(Self {
            device_name,
            native_config,
            emitter,
            shutdown,
            thread_handle: Some(handle),
            error_rx,
        })
    }

    /// Stop capturing and release the microphone.
    ///
    /// No chunk is emitted after this returns.
    pub fn stop(&mut self) {
        self.emitter.close();
        self.shutdown.store(true, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!(
                "Microphone '{}' released ({} chunks emitted, {} dropped)",
                self.device_name,
                self.emitter.emitted(),
                self.emitter.dropped()
            );
        }
    }

    /// Check if capture is running
    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some()
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Native device configuration
    pub fn native_config(&self) -> &StreamConfig {
        &self.native_config
    }

    pub fn chunks_emitted(&self) -> u64 {
        self.emitter.emitted()
    }

    /// Check for errors
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }
}

impl Drop for AudioChunker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A microphone the session can start on demand
pub trait MicrophoneSource: Send + Sync {
    /// Acquire the device and start emitting chunks. May block.
    fn start(&self, emitter: ChunkEmitter) -> Result<Box<dyn CaptureStream>, AudioError>;
}

/// A running capture
pub trait CaptureStream: Send {
    /// Release the device; no chunk is emitted after this returns
    fn stop(&mut self);

    fn chunks_emitted(&self) -> u64;

    /// Next asynchronous stream error, if any
    fn check_errors(&self) -> Option<AudioError>;
}

impl CaptureStream for AudioChunker {
    fn stop(&mut self) {
        AudioChunker::stop(self);
    }

    fn chunks_emitted(&self) -> u64 {
        AudioChunker::chunks_emitted(self)
    }

    fn check_errors(&self) -> Option<AudioError> {
        AudioChunker::check_errors(self)
    }
}

/// Microphone capture through cpal
pub struct CpalMicrophone {
    config: CaptureConfig,
}

impl CpalMicrophone {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }
}

impl MicrophoneSource for CpalMicrophone {
    fn start(&self, emitter: ChunkEmitter) -> Result<Box<dyn CaptureStream>, AudioError> {
        Ok(Box::new(AudioChunker::start(&self.config, emitter)?))
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut pipeline: CapturePipeline,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let mut scratch: Vec<f32> = Vec::new();
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            scratch.clear();
            scratch.extend(data.iter().map(|s| s.to_sample::<f32>()));
            pipeline.process(&scratch);
        },
        move |err| {
            let _ = error_tx.try_send(AudioError::Stream(err.to_string()));
        },
        None,
    )?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(device_rate: u32, channels: u16) -> (CapturePipeline, ChunkEmitter, mpsc::Receiver<AudioChunk>) {
        let (tx, rx) = mpsc::channel(1024);
        let emitter = ChunkEmitter::new(tx);
        let config = CaptureConfig {
            chunk_samples: 160,
            ..Default::default()
        };
        (
            CapturePipeline::new(device_rate, channels, &config, emitter.clone()),
            emitter,
            rx,
        )
    }

    #[test]
    fn test_pipeline_preserves_callback_order() {
        let (mut pipeline, emitter, mut rx) = pipeline(48000, 2);

        // 48 kHz stereo, 10 ms blocks: 960 interleaved samples → 160 mono at 16 kHz
        for _ in 0..5 {
            pipeline.process(&[0.25; 960]);
        }

        let mut sequences = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            assert_eq!(chunk.sample_rate, 16000);
            assert_eq!(chunk.sample_count(), 160);
            sequences.push(chunk.sequence);
        }
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        assert_eq!(emitter.emitted(), 5);
    }

    #[test]
    fn test_closed_emitter_forwards_nothing() {
        let (mut pipeline, emitter, mut rx) = pipeline(16000, 1);
        pipeline.process(&[0.1; 160]);
        emitter.close();
        pipeline.process(&[0.1; 1600]);

        assert_eq!(emitter.emitted(), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_emission_count_freezes_after_close() {
        let (mut pipeline, emitter, mut rx) = pipeline(16000, 1);

        // Simulated audio thread producing callbacks until the gate closes
        let producer_emitter = emitter.clone();
        let producer = thread::spawn(move || {
            while producer_emitter.is_open() {
                pipeline.process(&[0.1; 160]);
                thread::sleep(Duration::from_millis(1));
            }
            // A few late callbacks after close
            for _ in 0..10 {
                pipeline.process(&[0.1; 160]);
            }
        });
        let drain = thread::spawn(move || {
            let mut received = 0u64;
            while rx.blocking_recv().is_some() {
                received += 1;
            }
            received
        });

        thread::sleep(Duration::from_millis(30));
        emitter.close();
        let frozen = emitter.emitted();
        assert!(frozen > 0);

        producer.join().unwrap();
        assert_eq!(emitter.emitted(), frozen);

        drop(emitter);
        assert_eq!(drain.join().unwrap(), frozen);
    }

    #[test]
    fn test_full_channel_counts_drops() {
        let (tx, _rx) = mpsc::channel(1);
        let emitter = ChunkEmitter::new(tx);
        let chunk = AudioChunk {
            data: bytes::Bytes::from_static(&[0, 0]),
            sample_rate: 16000,
            channels: 1,
            sequence: 0,
        };
        assert!(emitter.emit(chunk.clone()));
        assert!(!emitter.emit(chunk));
        assert_eq!(emitter.dropped(), 1);
    }
}
