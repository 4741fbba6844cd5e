//! Realtime session
//!
//! One session per conversation. A single task owns the socket and
//! serialises every send and receive; external operations (`connect`,
//! `send_audio_frame`, `mute`, `end_session`) are posted into that task as
//! commands. Subscribers get state changes, transcriptions and audio
//! events over a broadcast channel.
//!
//! State machine:
//!
//! ```text
//! Idle ─connect→ Connecting ─socket open→ Connected ─mic live→ Listening
//!   Listening ─speech_started→ Processing ─audio delta→ Speaking
//!   Speaking ─response.completed→ Listening
//!   non-Idle ─socket close/error→ Error → (auto) Connecting, 5 attempts
//!   any ─end_session→ Idle
//! ```

use crate::events::{InboundEvent, OutboundEvent, VoiceSessionConfig};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use polyvox_audio::AudioEngine;
use polyvox_core::cancel::CancelToken;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, client::IntoClientRequest, http::HeaderValue},
};
use tracing::{debug, info, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Listening,
    Processing,
    Speaking,
    Error,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session task is gone")]
    ChannelClosed,
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// WebSocket endpoint; the model is appended as a query parameter
    pub url: String,

    /// Bearer credential; falls back to `OPENAI_API_KEY` when unset
    pub api_key: Option<String>,

    /// Backoff schedule for reconnection attempts
    pub reconnect_delays: Vec<Duration>,

    /// Uniform jitter applied to each reconnect delay (fraction, ≤ 0.1)
    pub reconnect_jitter: f64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.openai.com/v1/realtime".to_string(),
            api_key: None,
            reconnect_delays: [1u64, 2, 4, 8, 16]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
            reconnect_jitter: 0.1,
        }
    }
}

/// Events broadcast to subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    TranscriptionDelta(String),
    TranscriptionCompleted(String),
    /// Base64 PCM16 audio from the server
    AudioDelta(String),
    AudioDone,
    ResponseCompleted,
    SessionError(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    /// Frames accepted and sent on the socket
    pub audio_frames_sent: u64,
    /// Frames dropped at the boundary or during a reconnect window
    pub audio_frames_dropped: u64,
    /// Playback buffers currently queued
    pub playback_buffers: usize,
}

struct Shared {
    state: parking_lot::Mutex<SessionState>,
    muted: AtomicBool,
    reconnect_attempt: AtomicU32,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

enum Command {
    Connect {
        model: String,
        voice: String,
        instructions: String,
    },
    SendAudio(Vec<u8>),
    Mute(bool),
    End,
}

pub struct RealtimeSession {
    cmd_tx: mpsc::UnboundedSender<Command>,
    events_tx: broadcast::Sender<SessionEvent>,
    shared: Arc<Shared>,
    engine: Option<Arc<AudioEngine>>,
    cancel: CancelToken,
}

impl RealtimeSession {
    pub fn new(config: RealtimeConfig) -> Self {
        Self::build(config, None)
    }

    /// Session wired to an audio engine: inbound audio deltas go to its
    /// playback queue, and `end_session` stops it.
    pub fn with_engine(config: RealtimeConfig, engine: Arc<AudioEngine>) -> Self {
        Self::build(config, Some(engine))
    }

    fn build(config: RealtimeConfig, engine: Option<Arc<AudioEngine>>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(256);
        let shared = Arc::new(Shared {
            state: parking_lot::Mutex::new(SessionState::Idle),
            muted: AtomicBool::new(false),
            reconnect_attempt: AtomicU32::new(0),
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        });
        let cancel = CancelToken::new();

        let task = SessionTask {
            config,
            shared: shared.clone(),
            events_tx: events_tx.clone(),
            engine: engine.clone(),
            cancel: cancel.clone(),
            socket: None,
            connect_params: None,
        };
        tokio::spawn(task.run(cmd_rx));

        Self {
            cmd_tx,
            events_tx,
            shared,
            engine,
            cancel,
        }
    }

    /// Open the socket and configure the voice session.
    pub fn connect(
        &self,
        model: impl Into<String>,
        voice: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.cmd_tx
            .send(Command::Connect {
                model: model.into(),
                voice: voice.into(),
                instructions: system_prompt.into(),
            })
            .map_err(|_| SessionError::ChannelClosed)
    }

    /// Queue one PCM16 frame for transmission.
    ///
    /// Empty and all-zero frames are dropped here at the boundary and only
    /// counted; they never reach the socket.
    pub fn send_audio_frame(&self, pcm16: &[u8]) -> Result<(), SessionError> {
        if pcm16.is_empty() || pcm16.iter().all(|&b| b == 0) {
            self.shared.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        self.cmd_tx
            .send(Command::SendAudio(pcm16.to_vec()))
            .map_err(|_| SessionError::ChannelClosed)
    }

    pub fn mute(&self, muted: bool) -> Result<(), SessionError> {
        self.cmd_tx
            .send(Command::Mute(muted))
            .map_err(|_| SessionError::ChannelClosed)
    }

    /// Close the socket, stop the audio engine and return to Idle.
    pub fn end_session(&self) -> Result<(), SessionError> {
        self.cancel.cancel();
        self.cmd_tx
            .send(Command::End)
            .map_err(|_| SessionError::ChannelClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::Relaxed)
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.shared.reconnect_attempt.load(Ordering::Relaxed)
    }

    pub fn counters(&self) -> SessionCounters {
        SessionCounters {
            audio_frames_sent: self.shared.frames_sent.load(Ordering::Relaxed),
            audio_frames_dropped: self.shared.frames_dropped.load(Ordering::Relaxed),
            playback_buffers: self
                .engine
                .as_ref()
                .map(|e| e.playback_buffer_count())
                .unwrap_or(0),
        }
    }

    /// Input level bars, when an engine is attached.
    pub fn input_levels(&self) -> Vec<f32> {
        self.engine
            .as_ref()
            .map(|e| e.input_levels())
            .unwrap_or_default()
    }

    pub fn output_levels(&self) -> Vec<f32> {
        self.engine
            .as_ref()
            .map(|e| e.output_levels())
            .unwrap_or_default()
    }
}

struct ConnectParams {
    model: String,
    voice: String,
    instructions: String,
}

struct SessionTask {
    config: RealtimeConfig,
    shared: Arc<Shared>,
    events_tx: broadcast::Sender<SessionEvent>,
    engine: Option<Arc<AudioEngine>>,
    cancel: CancelToken,
    socket: Option<Socket>,
    connect_params: Option<ConnectParams>,
}

enum Step {
    Command(Option<Command>),
    Incoming(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
}

impl SessionTask {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            let step = match self.socket.as_mut() {
                Some(socket) => {
                    tokio::select! {
                        cmd = cmd_rx.recv() => Step::Command(cmd),
                        msg = socket.next() => Step::Incoming(msg),
                    }
                }
                None => Step::Command(cmd_rx.recv().await),
            };

            match step {
                Step::Command(None) => {
                    // Session handle dropped: release everything.
                    self.teardown().await;
                    return;
                }
                Step::Command(Some(command)) => {
                    if self.handle_command(command).await {
                        self.reconnect(&mut cmd_rx).await;
                    }
                }
                Step::Incoming(message) => {
                    if self.handle_incoming(message).await {
                        self.reconnect(&mut cmd_rx).await;
                    }
                }
            }
        }
    }

    /// Handle one posted command. Returns true when the socket was lost
    /// and a reconnect should run.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect {
                model,
                voice,
                instructions,
            } => {
                self.connect_params = Some(ConnectParams {
                    model,
                    voice,
                    instructions,
                });
                self.set_state(SessionState::Connecting);
                if self.try_connect().await {
                    self.on_connected();
                    false
                } else {
                    self.set_state(SessionState::Error);
                    true
                }
            }
            Command::SendAudio(frame) => self.send_frame(frame).await,
            Command::Mute(muted) => {
                self.apply_mute(muted);
                false
            }
            Command::End => {
                self.teardown().await;
                self.set_state(SessionState::Idle);
                self.cancel.reset();
                false
            }
        }
    }

    fn apply_mute(&mut self, muted: bool) {
        self.shared.muted.store(muted, Ordering::Relaxed);
        let state = *self.shared.state.lock();
        if self.socket.is_some() {
            if muted && state == SessionState::Listening {
                self.set_state(SessionState::Connected);
            } else if !muted && state == SessionState::Connected {
                self.set_state(SessionState::Listening);
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None).await;
        }
        if let Some(engine) = &self.engine
            && engine.is_running()
        {
            let _ = engine.stop();
        }
        self.connect_params = None;
        info!("realtime session closed");
    }

    fn on_connected(&mut self) {
        self.shared.reconnect_attempt.store(0, Ordering::Relaxed);
        self.set_state(SessionState::Connected);
        if !self.shared.muted.load(Ordering::Relaxed) {
            self.set_state(SessionState::Listening);
        }
    }

    /// One connect attempt: open the socket and send `session.update`.
    async fn try_connect(&mut self) -> bool {
        let Some(params) = &self.connect_params else {
            return false;
        };
        let model = params.model.clone();
        let voice = params.voice.clone();
        let instructions = params.instructions.clone();
        let separator = if self.config.url.contains('?') { '&' } else { '?' };
        let url = format!("{}{}model={}", self.config.url, separator, model);

        let mut request = match url.clone().into_client_request() {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "invalid realtime URL");
                return false;
            }
        };
        let api_key = self
            .config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        if let Some(key) = api_key
            && let Ok(value) = HeaderValue::from_str(&format!("Bearer {key}"))
        {
            request.headers_mut().insert("Authorization", value);
        }
        if let Ok(value) = HeaderValue::from_str("realtime=v1") {
            request.headers_mut().insert("OpenAI-Beta", value);
        }

        let socket = match connect_async(request).await {
            Ok((socket, _)) => socket,
            Err(e) => {
                warn!(error = %e, url = %url, "realtime connect failed");
                return false;
            }
        };
        self.socket = Some(socket);

        let update = OutboundEvent::SessionUpdate {
            session: VoiceSessionConfig::new(voice, instructions),
        };
        if let Err(e) = self.send_text(update.to_json()).await {
            warn!(error = %e, "failed to send session config");
            self.socket = None;
            return false;
        }
        debug!(model = %model, "realtime socket open");
        true
    }

    /// Exponential-backoff reconnection, up to the configured schedule.
    ///
    /// If nothing to reconnect to (never connected, or ended), returns
    /// immediately. Commands keep draining during the backoff: audio
    /// frames captured in the window are dropped but counted, mute flips
    /// apply, and `End` aborts the whole attempt.
    async fn reconnect(&mut self, cmd_rx: &mut mpsc::UnboundedReceiver<Command>) {
        if self.connect_params.is_none() {
            return;
        }
        let delays = self.config.reconnect_delays.clone();
        for (index, &delay) in delays.iter().enumerate() {
            self.shared
                .reconnect_attempt
                .store(index as u32 + 1, Ordering::Relaxed);
            self.set_state(SessionState::Connecting);

            let jitter = self.config.reconnect_jitter;
            let perturbed = if jitter > 0.0 {
                let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
                delay.mul_f64(factor)
            } else {
                delay
            };
            debug!(attempt = index + 1, delay_ms = perturbed.as_millis() as u64, "reconnecting");
            if !self.backoff_wait(perturbed, cmd_rx).await {
                return;
            }

            if self.try_connect().await {
                info!(attempt = index + 1, "realtime session reconnected");
                self.on_connected();
                return;
            }
        }

        warn!("reconnect attempts exhausted");
        self.set_state(SessionState::Error);
        let _ = self.events_tx.send(SessionEvent::SessionError(
            "connection lost and could not be re-established".to_string(),
        ));
    }

    /// Sleep one backoff interval while draining commands.
    ///
    /// Returns false when the session ended (or was cancelled) and the
    /// reconnect loop should stop.
    async fn backoff_wait(
        &mut self,
        delay: Duration,
        cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            if self.cancel.is_cancelled() {
                self.teardown().await;
                self.set_state(SessionState::Idle);
                self.cancel.reset();
                return false;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return true,
                command = cmd_rx.recv() => match command {
                    Some(Command::SendAudio(_)) => {
                        self.shared.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    Some(Command::Mute(muted)) => {
                        self.shared.muted.store(muted, Ordering::Relaxed);
                    }
                    Some(Command::Connect { model, voice, instructions }) => {
                        self.connect_params = Some(ConnectParams { model, voice, instructions });
                    }
                    Some(Command::End) | None => {
                        self.teardown().await;
                        self.set_state(SessionState::Idle);
                        self.cancel.reset();
                        return false;
                    }
                },
            }
        }
    }

    /// Send one validated frame. Returns true when the socket died and a
    /// reconnect should run.
    async fn send_frame(&mut self, frame: Vec<u8>) -> bool {
        let state = *self.shared.state.lock();
        let sendable = self.socket.is_some()
            && !self.shared.muted.load(Ordering::Relaxed)
            && matches!(
                state,
                SessionState::Connected
                    | SessionState::Listening
                    | SessionState::Processing
                    | SessionState::Speaking
            );
        if !sendable {
            // Mic audio arriving while muted or mid-reconnect is dropped,
            // but the counter still reflects it.
            self.shared.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let event = OutboundEvent::InputAudioAppend {
            audio: BASE64.encode(&frame),
        };
        match self.send_text(event.to_json()).await {
            Ok(()) => {
                self.shared.frames_sent.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(e) => {
                warn!(error = %e, "audio send failed, socket presumed dead");
                self.shared.frames_dropped.fetch_add(1, Ordering::Relaxed);
                self.socket = None;
                self.set_state(SessionState::Error);
                true
            }
        }
    }

    async fn send_text(
        &mut self,
        payload: String,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        match self.socket.as_mut() {
            Some(socket) => socket.send(Message::Text(payload.into())).await,
            None => Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed),
        }
    }

    /// Handle one socket message. Returns true when the socket closed
    /// unexpectedly and a reconnect should run.
    async fn handle_incoming(
        &mut self,
        message: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) -> bool {
        match message {
            Some(Ok(Message::Text(text))) => {
                if let Some(event) = InboundEvent::parse(text.as_str()) {
                    self.dispatch(event);
                } else {
                    debug!("unparseable realtime event");
                }
                false
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                let state = *self.shared.state.lock();
                self.socket = None;
                if state != SessionState::Idle {
                    warn!("realtime socket closed unexpectedly");
                    self.set_state(SessionState::Error);
                    true
                } else {
                    false
                }
            }
            Some(Ok(_)) => false, // ping/pong/binary
        }
    }

    fn dispatch(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::AudioDelta { delta } => {
                self.set_state(SessionState::Speaking);
                if let Some(engine) = &self.engine
                    && let Err(e) = engine.push_playback(&delta)
                {
                    debug!(error = %e, "playback buffer rejected");
                }
                let _ = self.events_tx.send(SessionEvent::AudioDelta(delta));
            }
            InboundEvent::AudioDone => {
                let _ = self.events_tx.send(SessionEvent::AudioDone);
            }
            InboundEvent::TranscriptionDelta { delta } => {
                let _ = self.events_tx.send(SessionEvent::TranscriptionDelta(delta));
            }
            InboundEvent::TranscriptionCompleted { transcript } => {
                let _ = self
                    .events_tx
                    .send(SessionEvent::TranscriptionCompleted(transcript));
            }
            InboundEvent::SpeechStarted => {
                self.set_state(SessionState::Processing);
            }
            InboundEvent::SpeechStopped => {}
            InboundEvent::ResponseCompleted => {
                let _ = self.events_tx.send(SessionEvent::ResponseCompleted);
                if self.shared.muted.load(Ordering::Relaxed) {
                    self.set_state(SessionState::Connected);
                } else {
                    self.set_state(SessionState::Listening);
                }
            }
            InboundEvent::ServerError { error } => {
                warn!(message = %error.message, "realtime server error");
                self.set_state(SessionState::Error);
                let _ = self
                    .events_tx
                    .send(SessionEvent::SessionError(error.message));
            }
            InboundEvent::Unknown => {}
        }
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.shared.state.lock();
        if *state != next {
            debug!(from = ?*state, to = ?next, "session state change");
            *state = next;
            drop(state);
            let _ = self.events_tx.send(SessionEvent::StateChanged(next));
        }
    }
}
