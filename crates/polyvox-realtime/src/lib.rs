//! Polyvox Realtime Session
//!
//! A persistent bidirectional audio session over a WebSocket: outbound
//! PCM16 frames as `input_audio_buffer.append`, inbound audio deltas and
//! transcriptions dispatched by event type, with server voice-activity
//! detection and automatic reconnection.
//!
//! - [`events`]: serde types for the wire events, both directions
//! - [`session`]: the session state machine and its owning task
//!
//! Wiring the microphone and speakers to a session:
//!
//! ```no_run
//! use std::sync::Arc;
//! use polyvox_audio::{AudioEngine, AudioEngineConfig};
//! use polyvox_realtime::{RealtimeConfig, RealtimeSession, SessionEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let session = Arc::new(RealtimeSession::new(RealtimeConfig::default()));
//!
//! // Capture pipeline output feeds the session.
//! let sink = {
//!     let session = session.clone();
//!     Arc::new(move |frame: Vec<u8>| {
//!         let _ = session.send_audio_frame(&frame);
//!     })
//! };
//! let engine = AudioEngine::new(AudioEngineConfig::default(), sink);
//! engine.start().unwrap();
//!
//! // Server audio feeds the playback queue.
//! let mut events = session.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         if let SessionEvent::AudioDelta(b64) = event {
//!             let _ = engine.push_playback(&b64);
//!         }
//!     }
//! });
//!
//! session.connect("gpt-realtime", "verse", "You are concise.").unwrap();
//! # }
//! ```

pub mod events;
pub mod session;

pub use events::{InboundEvent, OutboundEvent, VoiceSessionConfig};
pub use session::{
    RealtimeConfig, RealtimeSession, SessionCounters, SessionError, SessionEvent, SessionState,
};
