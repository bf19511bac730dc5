//! Session controller
//!
//! One task owns the socket, the playback engine and whatever capture is
//! running. Everything reaches it as a message: host commands through the
//! [`SessionHandle`], socket frames, microphone chunks, camera frames and
//! finished tool batches. The task publishes its state on a watch channel and
//! reports everything else as [`Notification`]s.

use base64::prelude::*;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use url::Url;
use uuid::Uuid;

use crate::audio::{
    AudioChunk, CaptureConfig, CaptureStream, ChunkEmitter, CpalMicrophone, CpalOutput,
    EnqueueOutcome, MicrophoneSource, OutputDevice, OutputSink, PlaybackConfig, PlaybackEngine,
    PlaybackStatus,
};
use crate::config::{AppConfig, StartOptions};
use crate::constants::CHUNK_CHANNEL_CAPACITY;
use crate::error::{AudioError, TransportError, VideoError};
use crate::protocol::{
    InboundFrame, ModelPart, OutboundFrame, ServerContent, SetupConfig, ToolInvocation,
    ToolResult, AUDIO_PCM_MIME,
};
use crate::session::events::{
    DeviceKind, DisconnectReason, Notification, SessionEvent, SessionState,
};
use crate::session::transport::{self, Connection, Incoming, WsStream};
use crate::tools::ToolDispatcher;
use crate::video::{FrameCallback, FrameSample, FrameSampler, SamplerConfig, VideoSource};

/// Frames waiting between the sampler and the socket
const FRAME_CHANNEL_CAPACITY: usize = 2;

/// Everything that shapes one session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Full endpoint, including any key parameter
    pub url: Url,
    /// Sent as soon as the socket opens
    pub setup: Option<SetupConfig>,
    pub start: StartOptions,
    pub playback: PlaybackConfig,
    pub sampler: SamplerConfig,
}

impl SessionOptions {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            setup: Some(SetupConfig::default()),
            start: StartOptions::default(),
            playback: PlaybackConfig::default(),
            sampler: SamplerConfig::default(),
        }
    }

    pub fn from_config(config: &AppConfig, url: Url) -> Self {
        Self {
            url,
            setup: Some(config.session.setup.clone()),
            start: config.startup.clone(),
            playback: config.audio.playback_config(),
            sampler: config.video.sampler_config(),
        }
    }
}

/// Collaborators supplied by the host
#[derive(Clone)]
pub struct SessionDeps {
    pub microphone: Arc<dyn MicrophoneSource>,
    pub output: Arc<dyn OutputDevice>,
    /// `None` when the host has no camera
    pub video: Option<Arc<dyn VideoSource>>,
    pub tools: ToolDispatcher,
}

impl SessionDeps {
    /// cpal microphone and speaker, no camera
    pub fn from_config(config: &AppConfig) -> Self {
        let capture: CaptureConfig = config.audio.capture_config();
        Self {
            microphone: Arc::new(CpalMicrophone::new(capture)),
            output: Arc::new(CpalOutput::new(config.audio.output_device.clone())),
            video: None,
            tools: ToolDispatcher::new(config.session.unknown_tools),
        }
    }
}

enum Command {
    SendSetup(SetupConfig),
    SendAudioChunk(Bytes),
    SendFrame(FrameSample),
    SendText { text: String, turn_complete: bool },
    SendEndOfAudio,
    SendToolResult(Vec<ToolResult>),
    StartMicrophone,
    StopMicrophone,
    StartCamera,
    StopCamera,
    SetVolume(f32),
    PlaybackStatus(oneshot::Sender<PlaybackStatus>),
    Disconnect,
}

/// Entry point
pub struct Session;

impl Session {
    /// Start a session: the transport opens in the background.
    ///
    /// Must be called inside a tokio runtime. The receiver yields every
    /// notification of this session, ending with exactly one `Disconnected`.
    pub fn connect(
        options: SessionOptions,
        deps: SessionDeps,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<Notification>) {
        let id = Uuid::new_v4();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

        let controller = Controller {
            id,
            state: SessionState::Disconnected,
            state_tx,
            events: event_tx,
            link: None,
            pending_setup: options.setup,
            start: options.start,
            sampler_config: options.sampler,
            playback: PlaybackEngine::with_deferred_output(options.playback, deps.output),
            speaker_opening: None,
            speaker_error_reported: false,
            tools: deps.tools,
            tool_batches: JoinSet::new(),
            microphone: deps.microphone,
            mic: None,
            mic_starting: None,
            mic_chunks: None,
            video: deps.video,
            sampler: None,
            frame_tx,
            frame_rx,
        };

        tracing::info!("Session {} starting", id);
        tokio::spawn(controller.run(options.url, command_rx));

        let handle = SessionHandle {
            id,
            commands: command_tx,
            state: state_rx,
        };
        (handle, event_rx)
    }
}

/// Cloneable control surface of a running session.
///
/// Dropping every handle disconnects the session.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Resolves once the session has fully torn down
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == SessionState::Disconnected).await;
    }

    /// Send setup now, or when the socket opens if it is not open yet.
    /// A newer setup replaces one still waiting.
    pub fn send_setup(&self, setup: SetupConfig) -> Result<(), TransportError> {
        self.command(Command::SendSetup(setup))
    }

    /// Forward a PCM16 chunk produced outside the built-in capture
    pub fn send_audio_chunk(&self, pcm: Bytes) -> Result<(), TransportError> {
        self.command(Command::SendAudioChunk(pcm))
    }

    pub fn send_frame(&self, frame: FrameSample) -> Result<(), TransportError> {
        self.command(Command::SendFrame(frame))
    }

    pub fn send_text(&self, text: impl Into<String>, turn_complete: bool) -> Result<(), TransportError> {
        self.command(Command::SendText {
            text: text.into(),
            turn_complete,
        })
    }

    pub fn send_end_of_audio(&self) -> Result<(), TransportError> {
        self.command(Command::SendEndOfAudio)
    }

    /// Answer tool calls the host resolved itself
    pub fn send_tool_result(&self, results: Vec<ToolResult>) -> Result<(), TransportError> {
        self.command(Command::SendToolResult(results))
    }

    pub fn start_microphone(&self) -> Result<(), TransportError> {
        self.command(Command::StartMicrophone)
    }

    /// Stop capture and tell the peer the audio stream ended
    pub fn stop_microphone(&self) -> Result<(), TransportError> {
        self.command(Command::StopMicrophone)
    }

    pub fn start_camera(&self) -> Result<(), TransportError> {
        self.command(Command::StartCamera)
    }

    pub fn stop_camera(&self) -> Result<(), TransportError> {
        self.command(Command::StopCamera)
    }

    pub fn set_volume(&self, volume: f32) -> Result<(), TransportError> {
        self.command(Command::SetVolume(volume))
    }

    pub async fn playback_status(&self) -> Result<PlaybackStatus, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::PlaybackStatus(tx))?;
        rx.await.map_err(|_| TransportError::SessionGone)
    }

    pub fn disconnect(&self) -> Result<(), TransportError> {
        self.command(Command::Disconnect)
    }

    fn command(&self, command: Command) -> Result<(), TransportError> {
        self.commands
            .send(command)
            .map_err(|_| TransportError::SessionGone)
    }
}

struct Controller {
    id: Uuid,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    events: mpsc::UnboundedSender<Notification>,

    /// Write half, present while the socket is open
    link: Option<Connection>,
    pending_setup: Option<SetupConfig>,
    start: StartOptions,
    sampler_config: SamplerConfig,

    playback: PlaybackEngine,
    /// Output device being acquired off the runtime
    speaker_opening: Option<JoinHandle<Result<Box<dyn OutputSink>, AudioError>>>,
    speaker_error_reported: bool,

    tools: ToolDispatcher,
    tool_batches: JoinSet<Vec<ToolResult>>,

    microphone: Arc<dyn MicrophoneSource>,
    mic: Option<Box<dyn CaptureStream>>,
    mic_starting: Option<JoinHandle<Result<Box<dyn CaptureStream>, AudioError>>>,
    mic_chunks: Option<mpsc::Receiver<AudioChunk>>,

    video: Option<Arc<dyn VideoSource>>,
    sampler: Option<FrameSampler>,
    frame_tx: mpsc::Sender<FrameSample>,
    frame_rx: mpsc::Receiver<FrameSample>,
}

impl Controller {
    async fn run(mut self, url: Url, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.set_state(SessionState::Connecting);

        let mut connecting: Option<BoxFuture<'static, Result<WsStream, TransportError>>> =
            Some(Box::pin(transport::connect(url)));
        let mut inbound = None;

        let reason = loop {
            let step: Result<(), TransportError> = tokio::select! {
                opened = poll_slot(&mut connecting) => {
                    connecting = None;
                    match opened {
                        Ok(ws) => {
                            let (sink, source) = ws.split();
                            self.link = Some(Connection::new(sink));
                            inbound = Some(source);
                            self.on_open().await
                        }
                        Err(e) => {
                            tracing::error!("Session {}: {}", self.id, e);
                            break DisconnectReason::ConnectFailed { message: e.to_string() };
                        }
                    }
                }

                item = next_in_slot(&mut inbound) => {
                    match transport::classify(item) {
                        Incoming::Frame(frame) => self.handle_frame(frame).await,
                        Incoming::Malformed(e) => {
                            tracing::warn!("Dropping malformed frame: {}", e);
                            self.notify(SessionEvent::ProtocolError { message: e.to_string() });
                            Ok(())
                        }
                        Incoming::Ping(payload) => match self.link.as_mut() {
                            Some(link) => link.pong(payload).await,
                            None => Ok(()),
                        },
                        Incoming::Closed { code, reason } => {
                            tracing::info!("Session {} closed by server ({} {})", self.id, code, reason);
                            break DisconnectReason::ClosedByPeer { code, reason };
                        }
                        Incoming::Failed(message) => {
                            tracing::error!("Session {} transport failed: {}", self.id, message);
                            break DisconnectReason::Transport { message };
                        }
                        Incoming::Ignored => Ok(()),
                    }
                }

                command = commands.recv() => match command {
                    Some(Command::Disconnect) | None => break DisconnectReason::Requested,
                    Some(command) => self.handle_command(command).await,
                },

                chunk = recv_slot(&mut self.mic_chunks) => match chunk {
                    Some(chunk) => self.forward_chunk(chunk).await,
                    None => {
                        self.mic_chunks = None;
                        Ok(())
                    }
                },

                Some(frame) = self.frame_rx.recv() => {
                    self.send(OutboundFrame::image(frame.mime_type, &frame.data)).await
                }

                started = poll_slot(&mut self.mic_starting) => {
                    self.mic_starting = None;
                    self.on_microphone_started(started);
                    Ok(())
                }

                opened = poll_slot(&mut self.speaker_opening) => {
                    self.speaker_opening = None;
                    self.on_speaker_opened(opened);
                    Ok(())
                }

                Some(joined) = self.tool_batches.join_next(), if !self.tool_batches.is_empty() => {
                    self.on_tool_batch(joined).await
                }
            };

            if let Err(e) = step {
                tracing::error!("Session {} transport failed: {}", self.id, e);
                break DisconnectReason::Transport { message: e.to_string() };
            }
        };

        self.teardown(reason).await;
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    async fn on_open(&mut self) -> Result<(), TransportError> {
        match self.pending_setup.take() {
            Some(setup) => {
                tracing::info!("Sending setup for model {}", setup.model);
                self.send(setup.to_frame()).await
            }
            None => {
                tracing::warn!("Socket open but no setup configured; waiting for send_setup");
                Ok(())
            }
        }
    }

    fn on_setup_complete(&mut self) {
        if self.state == SessionState::Connected {
            tracing::debug!("Duplicate setupComplete ignored");
            return;
        }
        self.set_state(SessionState::Connected);
        self.notify(SessionEvent::SetupComplete);

        if self.start.auto_start_microphone {
            self.start_microphone();
        }
        if self.start.auto_start_camera {
            self.start_camera();
        }
    }

    async fn teardown(&mut self, reason: DisconnectReason) {
        self.stop_microphone_capture().await;
        // The socket is going away; whatever is still queued is not sent
        self.mic_chunks = None;
        self.stop_camera_capture().await;
        self.release_speaker().await;
        self.tool_batches.abort_all();

        if let Some(link) = self.link.take() {
            tracing::debug!("Closing socket after {} frame(s)", link.frames_sent());
            if reason == DisconnectReason::Requested {
                link.close().await;
            }
        }

        self.set_state(SessionState::Disconnected);
        if reason.is_error() {
            tracing::warn!("Session {} ended: {}", self.id, reason);
        } else {
            tracing::info!("Session {} ended", self.id);
        }
        self.notify(SessionEvent::Disconnected { reason });
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        tracing::info!("Session {}: {} → {}", self.id, self.state, state);
        self.state = state;
        self.state_tx.send_replace(state);
        self.notify(SessionEvent::StateChanged { state });
    }

    fn notify(&self, event: SessionEvent) {
        let _ = self.events.send(Notification::new(self.id, event));
    }

    /// Write one frame, or drop it with a warning if the socket is not open
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), TransportError> {
        match self.link.as_mut() {
            Some(link) => link.send(&frame).await,
            None => {
                tracing::warn!("Transport not open, dropping {} frame", frame.kind());
                Ok(())
            }
        }
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    async fn handle_frame(&mut self, frame: InboundFrame) -> Result<(), TransportError> {
        match frame {
            InboundFrame::SetupComplete => {
                self.on_setup_complete();
                Ok(())
            }
            InboundFrame::ToolCall(invocations) => {
                if self.state != SessionState::Connected {
                    tracing::warn!(
                        "Tool call with {} invocation(s) before setup completed, ignoring",
                        invocations.len()
                    );
                    return Ok(());
                }
                self.on_tool_call(invocations);
                Ok(())
            }
            InboundFrame::ServerContent(content) => {
                if self.state != SessionState::Connected {
                    tracing::warn!("Server content before setup completed, ignoring");
                    return Ok(());
                }
                self.on_server_content(content);
                Ok(())
            }
            InboundFrame::Other(keys) => {
                tracing::debug!("Ignoring frame with keys {:?}", keys);
                Ok(())
            }
        }
    }

    fn on_server_content(&mut self, content: ServerContent) {
        if content.interrupted {
            let cancelled = self.playback.hard_cancel();
            tracing::info!("Interrupted, {} unit(s) cancelled", cancelled);
            self.notify(SessionEvent::Interrupted);
            return;
        }

        for part in content.parts {
            match part {
                ModelPart::Audio { data, .. } => self.play_audio(&data),
                ModelPart::Text(text) => self.notify(SessionEvent::Text { text }),
                ModelPart::InlineData { mime_type } => {
                    tracing::debug!("Ignoring inline {} part", mime_type);
                }
                ModelPart::Unknown => tracing::trace!("Ignoring unknown model part"),
            }
        }

        if content.turn_complete {
            self.notify(SessionEvent::TurnComplete);
        }
    }

    /// Discard queued speech and close the output without blocking the loop
    async fn release_speaker(&mut self) {
        let mut sink = self.playback.detach_output();
        if let Some(opening) = self.speaker_opening.take() {
            if let Ok(Ok(opened)) = opening.await {
                sink = Some(opened);
            }
        }
        // No sink attached, so this only empties the queue
        let discarded = self.playback.drain_and_stop();
        if discarded > 0 {
            tracing::debug!("Discarded {} queued unit(s) on disconnect", discarded);
        }
        if let Some(mut sink) = sink {
            if let Err(e) = tokio::task::spawn_blocking(move || sink.close()).await {
                tracing::error!("Speaker release task failed: {}", e);
            }
            tracing::info!("Audio output released");
        }
    }

    fn play_audio(&mut self, data: &str) {
        let pcm = match BASE64_STANDARD.decode(data) {
            Ok(pcm) => pcm,
            Err(e) => {
                tracing::warn!("Skipping audio part with bad base64: {}", e);
                self.notify(SessionEvent::ProtocolError {
                    message: format!("audio payload: {}", e),
                });
                return;
            }
        };

        match self.playback.enqueue(&pcm) {
            Ok(EnqueueOutcome::DroppedSilent) => {}
            Ok(outcome) => {
                tracing::trace!("Audio part: {:?}", outcome);
                self.ensure_speaker();
            }
            Err(e) => {
                tracing::warn!("Skipping undecodable audio part: {}", e);
                self.notify(SessionEvent::ProtocolError {
                    message: e.to_string(),
                });
            }
        }
    }

    /// Acquire the output on first use; the open runs on the blocking pool
    fn ensure_speaker(&mut self) {
        if self.playback.has_output() || self.speaker_opening.is_some() {
            return;
        }
        self.speaker_opening = Some(tokio::task::spawn_blocking(self.playback.output_opener()));
    }

    fn on_speaker_opened(
        &mut self,
        opened: Result<Result<Box<dyn OutputSink>, AudioError>, JoinError>,
    ) {
        let error = match opened {
            Ok(Ok(sink)) => {
                self.playback.attach_output(sink);
                self.speaker_error_reported = false;
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("speaker open task failed: {}", e),
        };

        // Nothing can play the queued speech
        let discarded = self.playback.drain_and_stop();
        tracing::error!("Speaker unavailable ({} unit(s) discarded): {}", discarded, error);
        if !self.speaker_error_reported {
            self.speaker_error_reported = true;
            self.notify(SessionEvent::DeviceError {
                device: DeviceKind::Speaker,
                message: error,
            });
        }
    }

    fn on_tool_call(&mut self, invocations: Vec<ToolInvocation>) {
        tracing::info!("Tool call batch of {}", invocations.len());
        self.notify(SessionEvent::ToolCall {
            invocations: invocations.clone(),
        });

        let tools = self.tools.clone();
        self.tool_batches
            .spawn(async move { tools.dispatch(invocations).await });
    }

    async fn on_tool_batch(
        &mut self,
        joined: Result<Vec<ToolResult>, JoinError>,
    ) -> Result<(), TransportError> {
        let results = match joined {
            Ok(results) => results,
            Err(e) => {
                tracing::error!("Tool batch task failed: {}", e);
                return Ok(());
            }
        };
        self.send_tool_results(results).await
    }

    async fn send_tool_results(&mut self, results: Vec<ToolResult>) -> Result<(), TransportError> {
        if results.is_empty() {
            tracing::warn!("Tool batch produced no results, nothing to send");
            return Ok(());
        }
        self.send(OutboundFrame::tool_response(&results)).await?;
        tracing::info!("Sent {} tool result(s)", results.len());
        self.notify(SessionEvent::ToolResponseSent { results });
        Ok(())
    }

    // =========================================================================
    // Commands
    // =========================================================================

    async fn handle_command(&mut self, command: Command) -> Result<(), TransportError> {
        match command {
            Command::SendSetup(setup) => {
                if self.link.is_some() {
                    self.send(setup.to_frame()).await
                } else {
                    if self.pending_setup.replace(setup).is_some() {
                        tracing::debug!("Replacing setup waiting for the socket");
                    }
                    Ok(())
                }
            }
            Command::SendAudioChunk(pcm) => self.send(OutboundFrame::audio_chunk(&pcm)).await,
            Command::SendFrame(frame) => {
                self.send(OutboundFrame::image(frame.mime_type, &frame.data))
                    .await
            }
            Command::SendText {
                text,
                turn_complete,
            } => self.send(OutboundFrame::text(&text, turn_complete)).await,
            Command::SendEndOfAudio => self.send(OutboundFrame::end_of_audio()).await,
            Command::SendToolResult(results) => self.send_tool_results(results).await,
            Command::StartMicrophone => {
                self.start_microphone();
                Ok(())
            }
            Command::StopMicrophone => {
                let was_running = self.stop_microphone_capture().await;
                self.flush_microphone().await?;
                if was_running {
                    self.send(OutboundFrame::end_of_audio()).await?;
                }
                Ok(())
            }
            Command::StartCamera => {
                self.start_camera();
                Ok(())
            }
            Command::StopCamera => {
                self.stop_camera_capture().await;
                Ok(())
            }
            Command::SetVolume(volume) => {
                self.playback.set_volume(volume);
                Ok(())
            }
            Command::PlaybackStatus(reply) => {
                let _ = reply.send(self.playback.status());
                Ok(())
            }
            // Handled by the run loop
            Command::Disconnect => Ok(()),
        }
    }

    // =========================================================================
    // Capture
    // =========================================================================

    fn start_microphone(&mut self) {
        if self.state != SessionState::Connected {
            tracing::warn!("Microphone requested while {}, ignoring", self.state);
            return;
        }
        if self.mic.is_some() || self.mic_starting.is_some() {
            tracing::debug!("Microphone already running");
            return;
        }

        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let emitter = ChunkEmitter::new(tx);
        let microphone = self.microphone.clone();
        self.mic_chunks = Some(rx);
        self.mic_starting = Some(tokio::task::spawn_blocking(move || {
            microphone.start(emitter)
        }));
    }

    fn on_microphone_started(
        &mut self,
        started: Result<Result<Box<dyn CaptureStream>, AudioError>, JoinError>,
    ) {
        let error = match started {
            Ok(Ok(stream)) => {
                self.mic = Some(stream);
                self.notify(SessionEvent::CaptureChanged {
                    device: DeviceKind::Microphone,
                    active: true,
                });
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("capture start task failed: {}", e),
        };

        tracing::error!("Microphone start failed: {}", error);
        self.mic_chunks = None;
        self.notify(SessionEvent::DeviceError {
            device: DeviceKind::Microphone,
            message: error,
        });
    }

    async fn forward_chunk(&mut self, chunk: AudioChunk) -> Result<(), TransportError> {
        if let Some(e) = self.mic.as_ref().and_then(|mic| mic.check_errors()) {
            tracing::warn!("Microphone stream error: {}", e);
            self.notify(SessionEvent::DeviceError {
                device: DeviceKind::Microphone,
                message: e.to_string(),
            });
        }
        tracing::trace!("Forwarding {} chunk {}", AUDIO_PCM_MIME, chunk.sequence);
        self.send(OutboundFrame::audio_chunk(&chunk.data)).await
    }

    /// Stop capture; chunks already emitted stay queued for
    /// [`Controller::flush_microphone`]. Returns whether a capture was running.
    async fn stop_microphone_capture(&mut self) -> bool {
        if let Some(starting) = self.mic_starting.take() {
            // Acquisition cannot be aborted; wait for it and release
            if let Ok(Ok(stream)) = starting.await {
                self.mic = Some(stream);
            }
        }

        match self.mic.take() {
            Some(mut stream) => {
                let emitted = stream.chunks_emitted();
                // Joins the capture thread
                if let Err(e) = tokio::task::spawn_blocking(move || stream.stop()).await {
                    tracing::error!("Microphone stop task failed: {}", e);
                }
                tracing::info!("Microphone stopped after {} chunk(s)", emitted);
                self.notify(SessionEvent::CaptureChanged {
                    device: DeviceKind::Microphone,
                    active: false,
                });
                true
            }
            None => false,
        }
    }

    /// Send every chunk emitted before the stop, then drop the channel
    async fn flush_microphone(&mut self) -> Result<(), TransportError> {
        let Some(mut chunks) = self.mic_chunks.take() else {
            return Ok(());
        };
        let mut flushed = 0;
        while let Ok(chunk) = chunks.try_recv() {
            self.forward_chunk(chunk).await?;
            flushed += 1;
        }
        if flushed > 0 {
            tracing::debug!("Flushed {} microphone chunk(s) after stop", flushed);
        }
        Ok(())
    }

    fn start_camera(&mut self) {
        if self.state != SessionState::Connected {
            tracing::warn!("Camera requested while {}, ignoring", self.state);
            return;
        }
        if self.sampler.is_some() {
            tracing::debug!("{}", VideoError::AlreadyRunning);
            return;
        }
        let Some(source) = self.video.clone() else {
            tracing::warn!("{}", VideoError::NotConfigured);
            self.notify(SessionEvent::DeviceError {
                device: DeviceKind::Camera,
                message: VideoError::NotConfigured.to_string(),
            });
            return;
        };

        let tx = self.frame_tx.clone();
        let on_frame: FrameCallback = Arc::new(move |frame| {
            if tx.try_send(frame).is_err() {
                tracing::trace!("Frame dropped, socket busy");
            }
        });
        self.sampler = Some(FrameSampler::start(source, self.sampler_config.clone(), on_frame));
        self.notify(SessionEvent::CaptureChanged {
            device: DeviceKind::Camera,
            active: true,
        });
    }

    async fn stop_camera_capture(&mut self) {
        if let Some(mut sampler) = self.sampler.take() {
            sampler.stop().await;
            while self.frame_rx.try_recv().is_ok() {}
            self.notify(SessionEvent::CaptureChanged {
                device: DeviceKind::Camera,
                active: false,
            });
        }
    }
}

/// Await an optional future; pending forever when empty
async fn poll_slot<F>(slot: &mut Option<F>) -> F::Output
where
    F: Future + Unpin,
{
    match slot.as_mut() {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn next_in_slot<S>(slot: &mut Option<S>) -> Option<S::Item>
where
    S: Stream + Unpin,
{
    match slot.as_mut() {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn recv_slot<T>(slot: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match slot.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
