//! Speech playback with barge-in
//!
//! The engine keeps a FIFO of decoded [`PlaybackUnit`]s and a single
//! now-playing slot. The output device pulls samples through a [`Renderer`];
//! when the current unit runs out mid-buffer the next queued unit continues
//! in the same buffer, so consecutive units are sample-contiguous.
//!
//! `hard_cancel` empties the queue and the slot at once. The few samples the
//! cancelled unit would have played next are faded to zero on the retiring
//! output node, after which a fresh node (full volume, no history) is
//! installed. A unit enqueued during that fade discards the fade and starts
//! on a fresh node immediately.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Sample, StreamConfig};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::PlaybackUnit;
use crate::audio::device::resolve_output_device;
use crate::codec::resample::StreamResampler;
use crate::codec::Pcm16Decoder;
use crate::constants::{DEFAULT_CANCEL_RAMP_MS, PLAYBACK_SAMPLE_RATE, SILENCE_THRESHOLD};
use crate::error::{AudioError, Result};

/// Playback settings
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Rate of inbound speech
    pub sample_rate: u32,
    /// Chunks with a lower peak are dropped when `drop_silence` is set
    pub silence_threshold: f32,
    pub drop_silence: bool,
    /// Fade applied to the cancelled unit before the node resets
    pub cancel_ramp_ms: u32,
    /// Output volume in [0.0, 1.0]
    pub volume: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: PLAYBACK_SAMPLE_RATE,
            silence_threshold: SILENCE_THRESHOLD,
            drop_silence: true,
            cancel_ramp_ms: DEFAULT_CANCEL_RAMP_MS,
            volume: 1.0,
        }
    }
}

// =============================================================================
// Output device seam
// =============================================================================

/// An audio output supplied by the hosting environment.
///
/// `open` acquires the device and starts pulling samples from the renderer;
/// the returned sink releases it on `close` (or drop).
pub trait OutputDevice: Send + Sync {
    fn open(&self, renderer: Renderer) -> std::result::Result<Box<dyn OutputSink>, AudioError>;
}

/// A running output stream
pub trait OutputSink: Send {
    fn close(&mut self);
}

/// Pull handle given to the output device
#[derive(Clone)]
pub struct Renderer {
    core: Arc<Mutex<PlayerCore>>,
    sample_rate: u32,
}

impl Renderer {
    /// Fill `out` with mono samples at [`Renderer::sample_rate`]
    pub fn render(&self, out: &mut [f32]) {
        self.core.lock().render(out);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

// =============================================================================
// Player core
// =============================================================================

/// What the now-playing slot holds
enum PlayerState {
    Idle,
    Playing { unit: PlaybackUnit, cursor: usize },
}

/// Samples of a cancelled unit being faded out
struct Release {
    tail: Vec<f32>,
    position: usize,
}

/// Gain stage between the player and the device
struct OutputNode {
    generation: u64,
    volume: f32,
    release: Option<Release>,
}

impl OutputNode {
    /// Replace the node: full configured volume, nothing pending
    fn reinstall(&mut self) {
        self.release = None;
        self.generation += 1;
    }

    fn next_release_sample(&mut self) -> f32 {
        let Some(release) = self.release.as_mut() else {
            return 0.0;
        };
        let len = release.tail.len();
        let gain = 1.0 - release.position as f32 / len as f32;
        let sample = release.tail[release.position] * gain * self.volume;
        release.position += 1;
        if release.position >= len {
            self.reinstall();
        }
        sample
    }
}

struct PlayerCore {
    queue: VecDeque<PlaybackUnit>,
    state: PlayerState,
    node: OutputNode,
    ramp_samples: usize,
    stats: PlaybackStats,
}

impl PlayerCore {
    fn new(config: &PlaybackConfig) -> Self {
        Self {
            queue: VecDeque::new(),
            state: PlayerState::Idle,
            node: OutputNode {
                generation: 0,
                volume: config.volume.clamp(0.0, 1.0),
                release: None,
            },
            ramp_samples: (config.sample_rate as u64 * config.cancel_ramp_ms as u64 / 1000) as usize,
            stats: PlaybackStats::default(),
        }
    }

    /// Queue a unit; returns true if it started playing immediately
    fn enqueue(&mut self, unit: PlaybackUnit) -> bool {
        if self.node.release.is_some() {
            self.node.reinstall();
        }
        self.queue.push_back(unit);
        self.stats.units_enqueued += 1;

        if matches!(self.state, PlayerState::Idle) {
            self.advance();
            return true;
        }
        false
    }

    fn advance(&mut self) {
        self.state = match self.queue.pop_front() {
            Some(unit) => PlayerState::Playing { unit, cursor: 0 },
            None => PlayerState::Idle,
        };
    }

    fn render(&mut self, out: &mut [f32]) {
        for slot in out.iter_mut() {
            *slot = self.next_sample();
        }
    }

    fn next_sample(&mut self) -> f32 {
        loop {
            if let PlayerState::Playing { unit, cursor } = &mut self.state {
                if *cursor < unit.len() {
                    let sample = unit.samples[*cursor];
                    *cursor += 1;
                    return sample * self.node.volume;
                }
            } else {
                return self.node.next_release_sample();
            }

            // Current unit finished: continue with the next one in this same
            // sample slot
            self.stats.units_played += 1;
            self.advance();
        }
    }

    fn hard_cancel(&mut self) -> usize {
        let mut cancelled = self.queue.len();
        self.queue.clear();

        let tail = match std::mem::replace(&mut self.state, PlayerState::Idle) {
            PlayerState::Playing { unit, cursor } => {
                cancelled += 1;
                let end = (cursor + self.ramp_samples).min(unit.len());
                unit.samples[cursor..end].to_vec()
            }
            PlayerState::Idle => Vec::new(),
        };

        if !tail.is_empty() {
            self.node.release = Some(Release { tail, position: 0 });
        } else if self.node.release.is_none() {
            self.node.reinstall();
        }

        self.stats.units_cancelled += cancelled as u64;
        cancelled
    }

    fn drain(&mut self) -> usize {
        let mut discarded = self.queue.len();
        self.queue.clear();
        if let PlayerState::Playing { .. } = std::mem::replace(&mut self.state, PlayerState::Idle) {
            discarded += 1;
        }
        self.node.reinstall();
        self.stats.units_cancelled += discarded as u64;
        discarded
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Result of an enqueue call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Nothing was playing; this unit started right away
    Started { sequence: u64 },
    /// Queued behind the current unit
    Queued { sequence: u64, queue_len: usize },
    /// Below the silence threshold and not queued
    DroppedSilent,
}

/// Snapshot of the engine state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackStatus {
    pub is_playing: bool,
    pub queue_len: usize,
    pub has_output: bool,
    /// Sequence of the unit in the now-playing slot
    pub current_sequence: Option<u64>,
    /// Increments every time a fresh output node is installed
    pub node_generation: u64,
    /// A cancelled unit is still fading out
    pub releasing: bool,
}

/// Playback statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub units_enqueued: u64,
    pub units_played: u64,
    pub units_cancelled: u64,
    pub units_dropped_silent: u64,
    pub decode_failures: u64,
}

/// Inbound speech player
pub struct PlaybackEngine {
    core: Arc<Mutex<PlayerCore>>,
    decoder: Pcm16Decoder,
    config: PlaybackConfig,
    output_device: Arc<dyn OutputDevice>,
    sink: Option<Box<dyn OutputSink>>,
    /// Open the output inside `enqueue`; otherwise the host attaches it
    auto_open: bool,
    next_sequence: u64,
}

impl PlaybackEngine {
    /// Engine that opens its output on the first enqueue (blocking)
    pub fn new(config: PlaybackConfig, output_device: Arc<dyn OutputDevice>) -> Self {
        Self {
            core: Arc::new(Mutex::new(PlayerCore::new(&config))),
            decoder: Pcm16Decoder::new(config.silence_threshold),
            config,
            output_device,
            sink: None,
            auto_open: true,
            next_sequence: 0,
        }
    }

    /// Engine for async hosts: `enqueue` never touches the device. Units
    /// wait in the queue until a sink from [`PlaybackEngine::output_opener`]
    /// is attached.
    pub fn with_deferred_output(
        config: PlaybackConfig,
        output_device: Arc<dyn OutputDevice>,
    ) -> Self {
        let mut engine = Self::new(config, output_device);
        engine.auto_open = false;
        engine
    }

    /// Blocking job that acquires the output for this engine
    pub fn output_opener(
        &self,
    ) -> impl FnOnce() -> std::result::Result<Box<dyn OutputSink>, AudioError> + Send + 'static
    {
        let device = self.output_device.clone();
        let renderer = self.renderer();
        move || device.open(renderer)
    }

    pub fn has_output(&self) -> bool {
        self.sink.is_some()
    }

    /// Install an opened sink; returns the one it replaces
    pub fn attach_output(&mut self, sink: Box<dyn OutputSink>) -> Option<Box<dyn OutputSink>> {
        tracing::info!("Audio output acquired at {}Hz", self.config.sample_rate);
        self.sink.replace(sink)
    }

    /// Hand the sink back without closing it, so the caller can release it
    /// off its event loop
    pub fn detach_output(&mut self) -> Option<Box<dyn OutputSink>> {
        self.sink.take()
    }

    /// Decode PCM16 speech and queue it.
    ///
    /// Odd-length payloads are rejected without touching the queue.
    pub fn enqueue(&mut self, pcm: &[u8]) -> Result<EnqueueOutcome> {
        let decoded = match self.decoder.decode(pcm) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.core.lock().stats.decode_failures += 1;
                return Err(e.into());
            }
        };

        if self.config.drop_silence && self.decoder.is_silent(&decoded) {
            self.core.lock().stats.units_dropped_silent += 1;
            tracing::trace!("Dropping silent chunk ({} samples)", decoded.samples.len());
            return Ok(EnqueueOutcome::DroppedSilent);
        }

        self.enqueue_samples(decoded.samples)
    }

    /// Queue already-decoded mono samples at the engine rate
    pub fn enqueue_samples(&mut self, samples: Vec<f32>) -> Result<EnqueueOutcome> {
        if self.auto_open {
            self.ensure_output()?;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let unit = PlaybackUnit::new(samples, self.config.sample_rate, sequence);

        let mut core = self.core.lock();
        if core.enqueue(unit) {
            Ok(EnqueueOutcome::Started { sequence })
        } else {
            Ok(EnqueueOutcome::Queued {
                sequence,
                queue_len: core.queue.len(),
            })
        }
    }

    /// Barge-in: stop the current unit and drop everything queued.
    ///
    /// Safe in any state. The output stays open for the next turn.
    pub fn hard_cancel(&mut self) -> usize {
        let cancelled = self.core.lock().hard_cancel();
        if cancelled > 0 {
            tracing::debug!("Playback cancelled, {} unit(s) discarded", cancelled);
        }
        cancelled
    }

    /// Stop immediately, discard everything and release the output device
    pub fn drain_and_stop(&mut self) -> usize {
        let discarded = self.core.lock().drain();
        if let Some(mut sink) = self.sink.take() {
            sink.close();
            tracing::info!("Audio output released ({} unit(s) discarded)", discarded);
        }
        discarded
    }

    /// Set output volume; clamped to [0.0, 1.0]
    pub fn set_volume(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.config.volume = volume;
        self.core.lock().node.volume = volume;
    }

    pub fn volume(&self) -> f32 {
        self.config.volume
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.core.lock().state, PlayerState::Playing { .. })
    }

    pub fn queue_len(&self) -> usize {
        self.core.lock().queue.len()
    }

    pub fn status(&self) -> PlaybackStatus {
        let core = self.core.lock();
        PlaybackStatus {
            is_playing: matches!(core.state, PlayerState::Playing { .. }),
            queue_len: core.queue.len(),
            has_output: self.sink.is_some(),
            current_sequence: match &core.state {
                PlayerState::Playing { unit, .. } => Some(unit.sequence),
                PlayerState::Idle => None,
            },
            node_generation: core.node.generation,
            releasing: core.node.release.is_some(),
        }
    }

    pub fn stats(&self) -> PlaybackStats {
        self.core.lock().stats.clone()
    }

    /// Pull handle on this engine's output
    pub fn renderer(&self) -> Renderer {
        Renderer {
            core: self.core.clone(),
            sample_rate: self.config.sample_rate,
        }
    }

    fn ensure_output(&mut self) -> std::result::Result<(), AudioError> {
        if self.sink.is_none() {
            let sink = self.output_device.open(self.renderer())?;
            self.attach_output(sink);
        }
        Ok(())
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.drain_and_stop();
    }
}

// =============================================================================
// cpal output
// =============================================================================

/// Speaker output through cpal
pub struct CpalOutput {
    device_id: Option<String>,
}

impl CpalOutput {
    /// `None` selects the default output device
    pub fn new(device_id: Option<String>) -> Self {
        Self { device_id }
    }
}

impl OutputDevice for CpalOutput {
    fn open(&self, renderer: Renderer) -> std::result::Result<Box<dyn OutputSink>, AudioError> {
        let device = resolve_output_device(self.device_id.as_deref())?;
        let supported = device.preferred_output_config(renderer.sample_rate())?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.config();

        tracing::info!(
            "Opening speaker '{}': {}Hz, {} channel(s), {:?}",
            device.name,
            config.sample_rate.0,
            config.channels,
            sample_format
        );

        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), AudioError>>(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_for_loop = shutdown.clone();

        let handle = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let stream = match sample_format {
                    cpal::SampleFormat::F32 => {
                        build_output_stream::<f32>(&cpal_device, &config, renderer)
                    }
                    cpal::SampleFormat::I16 => {
                        build_output_stream::<i16>(&cpal_device, &config, renderer)
                    }
                    cpal::SampleFormat::U16 => {
                        build_output_stream::<u16>(&cpal_device, &config, renderer)
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

                while !shutdown_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::Thread(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalSink {
                shutdown,
                thread_handle: Some(handle),
            })),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::Thread("playback thread exited during start".into()))
            }
        }
    }
}

struct CpalSink {
    shutdown: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl OutputSink for CpalSink {
    fn close(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Converts the engine's mono stream to the device's rate
struct DeviceFeeder {
    renderer: Renderer,
    resampler: StreamResampler,
    engine_block: Vec<f32>,
    ready: Vec<f32>,
}

impl DeviceFeeder {
    fn new(renderer: Renderer, device_rate: u32) -> Self {
        let resampler = StreamResampler::new(renderer.sample_rate(), device_rate);
        Self {
            renderer,
            resampler,
            engine_block: Vec::new(),
            ready: Vec::new(),
        }
    }

    /// Produce exactly `frames` mono samples at the device rate
    fn fill(&mut self, frames: usize) -> &[f32] {
        if self.resampler.is_passthrough() {
            self.ready.resize(frames, 0.0);
            self.renderer.render(&mut self.ready[..frames]);
            return &self.ready[..frames];
        }

        while self.ready.len() < frames {
            let missing = frames - self.ready.len();
            let needed = (missing as u64 * self.resampler.from_rate() as u64
                / self.resampler.to_rate() as u64) as usize
                + 1;
            self.engine_block.resize(needed, 0.0);
            self.renderer.render(&mut self.engine_block);
            self.resampler.process(&self.engine_block, &mut self.ready);
        }
        &self.ready[..frames]
    }

    /// Discard the samples handed out by the last `fill`
    fn consume(&mut self, frames: usize) {
        if self.resampler.is_passthrough() {
            return;
        }
        self.ready.drain(..frames);
    }
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    renderer: Renderer,
) -> std::result::Result<cpal::Stream, AudioError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    let mut feeder = DeviceFeeder::new(renderer, config.sample_rate.0);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels;
            let mono = feeder.fill(frames);
            for (frame, &sample) in data.chunks_exact_mut(channels).zip(mono.iter()) {
                let value = T::from_sample(sample);
                for slot in frame.iter_mut() {
                    *slot = value;
                }
            }
            feeder.consume(frames);
        },
        |err| {
            tracing::error!("Audio output stream error: {}", err);
        },
        None,
    )?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;

    /// Output that records acquisitions instead of opening hardware
    #[derive(Default)]
    struct RecordingOutput {
        opens: AtomicUsize,
        closes: Arc<AtomicUsize>,
        fail: bool,
    }

    struct RecordingSink {
        closes: Arc<AtomicUsize>,
        closed: bool,
    }

    impl OutputSink for RecordingSink {
        fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                self.closes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    impl OutputDevice for RecordingOutput {
        fn open(&self, _renderer: Renderer) -> std::result::Result<Box<dyn OutputSink>, AudioError> {
            if self.fail {
                return Err(AudioError::NotFound("no speaker".into()));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(RecordingSink {
                closes: self.closes.clone(),
                closed: false,
            }))
        }
    }

    fn engine() -> (PlaybackEngine, Arc<RecordingOutput>) {
        let output = Arc::new(RecordingOutput::default());
        let config = PlaybackConfig {
            cancel_ramp_ms: 1, // 24 samples
            ..Default::default()
        };
        (PlaybackEngine::new(config, output.clone()), output)
    }

    /// PCM16 bytes of `n` copies of `value`
    fn pcm(value: i16, n: usize) -> Vec<u8> {
        std::iter::repeat(value.to_le_bytes()).take(n).flatten().collect()
    }

    fn level(value: i16) -> f32 {
        value as f32 / 32768.0
    }

    fn render(engine: &PlaybackEngine, n: usize) -> Vec<f32> {
        let mut out = vec![f32::NAN; n];
        engine.renderer().render(&mut out);
        out
    }

    #[test]
    fn test_units_play_back_to_back_in_order() {
        let (mut engine, _) = engine();
        assert_eq!(
            engine.enqueue(&pcm(1000, 10)).unwrap(),
            EnqueueOutcome::Started { sequence: 0 }
        );
        assert_eq!(
            engine.enqueue(&pcm(2000, 5)).unwrap(),
            EnqueueOutcome::Queued { sequence: 1, queue_len: 1 }
        );
        engine.enqueue(&pcm(3000, 7)).unwrap();

        let out = render(&engine, 25);
        let mut expected = vec![level(1000); 10];
        expected.extend(vec![level(2000); 5]);
        expected.extend(vec![level(3000); 7]);
        expected.extend(vec![0.0; 3]);
        assert_eq!(out, expected);

        let stats = engine.stats();
        assert_eq!(stats.units_played, 3);
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_second_frame_waits_for_first() {
        let (mut engine, _) = engine();
        engine.enqueue(&pcm(1000, 100)).unwrap();
        let _ = render(&engine, 40);

        // Arrives while the first is still playing
        let outcome = engine.enqueue(&pcm(-1000, 50)).unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Queued { .. }));
        assert_eq!(engine.status().current_sequence, Some(0));

        let out = render(&engine, 110);
        assert!(out[..60].iter().all(|&s| s == level(1000)));
        assert!(out[60..110].iter().all(|&s| s == level(-1000)));
    }

    #[test]
    fn test_hard_cancel_mid_playback() {
        let (mut engine, _) = engine();
        for _ in 0..3 {
            engine.enqueue(&pcm(8000, 2400)).unwrap();
        }
        let _ = render(&engine, 100);
        assert_eq!(engine.queue_len(), 2);

        let generation = engine.status().node_generation;
        assert_eq!(engine.hard_cancel(), 3);

        let status = engine.status();
        assert_eq!(status.queue_len, 0);
        assert!(!status.is_playing);
        assert!(status.releasing);

        // 24-sample fade of the cancelled unit, then silence
        let out = render(&engine, 100);
        assert_eq!(out[0], level(8000));
        for pair in out[..24].windows(2) {
            assert!(pair[1] < pair[0]);
        }
        assert!(out[24..].iter().all(|&s| s == 0.0));

        let status = engine.status();
        assert!(!status.releasing);
        assert_eq!(status.node_generation, generation + 1);
        assert_eq!(engine.stats().units_cancelled, 3);
    }

    #[test]
    fn test_enqueue_after_cancel_has_no_leftovers() {
        let (mut engine, _) = engine();
        engine.enqueue(&pcm(8000, 2400)).unwrap();
        engine.enqueue(&pcm(8000, 2400)).unwrap();
        let _ = render(&engine, 10);

        engine.hard_cancel();
        // New turn arrives before the fade has been rendered
        assert_eq!(
            engine.enqueue(&pcm(-4000, 30)).unwrap(),
            EnqueueOutcome::Started { sequence: 2 }
        );

        let out = render(&engine, 40);
        assert!(out[..30].iter().all(|&s| s == level(-4000)));
        assert!(out[30..].iter().all(|&s| s == 0.0));
        assert!(!engine.status().releasing);
    }

    #[test]
    fn test_cancel_is_safe_when_idle() {
        let (mut engine, output) = engine();
        assert_eq!(engine.hard_cancel(), 0);
        assert_eq!(engine.drain_and_stop(), 0);
        assert_eq!(output.opens.load(Ordering::SeqCst), 0);
        assert!(render(&engine, 8).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_silent_chunks_dropped_without_reordering() {
        let (mut engine, _) = engine();
        engine.enqueue(&pcm(1000, 4)).unwrap();
        assert_eq!(
            engine.enqueue(&pcm(10, 4)).unwrap(),
            EnqueueOutcome::DroppedSilent
        );
        engine.enqueue(&pcm(2000, 4)).unwrap();

        let out = render(&engine, 8);
        assert_eq!(&out[..4], &[level(1000); 4]);
        assert_eq!(&out[4..], &[level(2000); 4]);
        assert_eq!(engine.stats().units_dropped_silent, 1);
    }

    #[test]
    fn test_decode_failure_skips_unit() {
        let (mut engine, _) = engine();
        engine.enqueue(&pcm(1000, 2)).unwrap();
        assert!(engine.enqueue(&[1, 2, 3]).is_err());
        engine.enqueue(&pcm(2000, 2)).unwrap();

        assert_eq!(render(&engine, 4), vec![level(1000), level(1000), level(2000), level(2000)]);
        assert_eq!(engine.stats().decode_failures, 1);
    }

    #[test]
    fn test_output_is_scoped_to_use() {
        let (mut engine, output) = engine();
        engine.enqueue(&pcm(1000, 4)).unwrap();
        engine.enqueue(&pcm(1000, 4)).unwrap();
        assert_eq!(output.opens.load(Ordering::SeqCst), 1);
        assert!(engine.status().has_output);

        assert_eq!(engine.drain_and_stop(), 2);
        assert_eq!(output.closes.load(Ordering::SeqCst), 1);
        assert!(!engine.status().has_output);
        assert!(render(&engine, 4).iter().all(|&s| s == 0.0));

        engine.enqueue(&pcm(1000, 4)).unwrap();
        assert_eq!(output.opens.load(Ordering::SeqCst), 2);
        drop(engine);
        assert_eq!(output.closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_output_failure_leaves_queue_empty() {
        let output = Arc::new(RecordingOutput {
            fail: true,
            ..Default::default()
        });
        let mut engine = PlaybackEngine::new(PlaybackConfig::default(), output);
        assert!(engine.enqueue(&pcm(1000, 4)).is_err());
        assert_eq!(engine.queue_len(), 0);
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_deferred_output_is_attached_by_host() {
        let output = Arc::new(RecordingOutput::default());
        let mut engine =
            PlaybackEngine::with_deferred_output(PlaybackConfig::default(), output.clone());

        engine.enqueue(&pcm(1000, 4)).unwrap();
        engine.enqueue(&pcm(2000, 4)).unwrap();
        assert_eq!(output.opens.load(Ordering::SeqCst), 0);
        let status = engine.status();
        assert!(status.is_playing);
        assert_eq!(status.queue_len, 1);
        assert!(!status.has_output);

        let sink = engine.output_opener()().unwrap();
        assert!(engine.attach_output(sink).is_none());
        assert_eq!(output.opens.load(Ordering::SeqCst), 1);
        assert_eq!(render(&engine, 8)[..4], [level(1000); 4]);

        // Detached sinks are released by the caller, not the engine
        let mut sink = engine.detach_output().unwrap();
        assert_eq!(engine.drain_and_stop(), 0);
        assert_eq!(output.closes.load(Ordering::SeqCst), 0);
        sink.close();
        assert_eq!(output.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_volume_scales_output() {
        let (mut engine, _) = engine();
        engine.set_volume(0.5);
        engine.enqueue(&pcm(16384, 2)).unwrap();
        assert_eq!(render(&engine, 2), vec![0.25, 0.25]);

        engine.set_volume(3.0);
        assert_eq!(engine.volume(), 1.0);
    }

    #[test]
    fn test_device_feeder_resamples_to_device_rate() {
        let (mut engine, _) = engine();
        engine.enqueue_samples(vec![0.5; 2400]).unwrap();

        let mut feeder = DeviceFeeder::new(engine.renderer(), 48000);
        let first = feeder.fill(480).to_vec();
        feeder.consume(480);
        assert_eq!(first.len(), 480);
        assert!(first.iter().all(|&s| (s - 0.5).abs() < 1e-6));

        let mut passthrough = DeviceFeeder::new(engine.renderer(), 24000);
        assert_eq!(passthrough.fill(16).len(), 16);
    }

    proptest! {
        #[test]
        fn prop_playback_is_ordered_and_gapless(
            lengths in proptest::collection::vec(1usize..300, 1..12),
            block in 1usize..257,
        ) {
            let (mut engine, _) = engine();
            let mut expected = Vec::new();
            for (i, len) in lengths.iter().enumerate() {
                let value = 1000 + i as i16 * 100;
                engine.enqueue(&pcm(value, *len)).unwrap();
                expected.extend(std::iter::repeat(level(value)).take(*len));
            }

            let mut played = Vec::new();
            let renderer = engine.renderer();
            let mut buffer = vec![0.0; block];
            while played.len() < expected.len() {
                renderer.render(&mut buffer);
                played.extend_from_slice(&buffer);
            }
            played.truncate(expected.len());

            prop_assert_eq!(played, expected);
            prop_assert_eq!(engine.stats().units_played, lengths.len() as u64);
        }
    }
}
