//! Realtime wire events
//!
//! One direction each: the client sends `session.update` and
//! `input_audio_buffer.append`; the server sends audio deltas,
//! transcriptions, speech markers, completion and errors. Audio travels
//! base64-encoded PCM16 (24 kHz mono little-endian) in the `audio`/`delta`
//! fields. Unknown inbound event types decode to [`InboundEvent::Unknown`]
//! so new server events never break the session.

use serde::{Deserialize, Serialize};

/// Session configuration sent in `session.update` right after the socket
/// opens. Server VAD with `create_response` keeps the turn loop on the
/// server side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSessionConfig {
    pub modalities: Vec<String>,
    pub voice: String,
    pub instructions: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub turn_detection: TurnDetection,
}

impl VoiceSessionConfig {
    pub fn new(voice: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            modalities: vec!["audio".to_string(), "text".to_string()],
            voice: voice.into(),
            instructions: instructions.into(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            turn_detection: TurnDetection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub create_response: bool,
    pub threshold: f32,
    pub silence_duration_ms: u32,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self {
            kind: "server_vad".to_string(),
            create_response: true,
            threshold: 0.5,
            silence_duration_ms: 500,
        }
    }
}

/// Client → server events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: VoiceSessionConfig },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend {
        /// Base64 PCM16 frame
        audio: String,
    },
}

impl OutboundEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("outbound events serialize infallibly")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// Server → client events, dispatched by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InboundEvent {
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Base64 PCM16 frame
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.audio.done")]
    AudioDone,

    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    TranscriptionDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    #[serde(rename = "response.completed")]
    ResponseCompleted,

    #[serde(rename = "error")]
    ServerError {
        #[serde(default)]
        error: ErrorDetail,
    },

    #[serde(other)]
    Unknown,
}

impl InboundEvent {
    pub fn parse(json: &str) -> Option<Self> {
        serde_json::from_str(json).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_update_shape() {
        let event = OutboundEvent::SessionUpdate {
            session: VoiceSessionConfig::new("verse", "Be helpful."),
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value["type"], "session.update");
        assert_eq!(value["session"]["voice"], "verse");
        assert_eq!(value["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(value["session"]["turn_detection"]["create_response"], true);
        assert_eq!(value["session"]["input_audio_format"], "pcm16");
    }

    #[test]
    fn test_audio_append_shape() {
        let event = OutboundEvent::InputAudioAppend {
            audio: "AAEC".to_string(),
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value["type"], "input_audio_buffer.append");
        assert_eq!(value["audio"], "AAEC");
    }

    #[test]
    fn test_inbound_dispatch_by_type() {
        let delta = InboundEvent::parse(r#"{"type":"response.audio.delta","delta":"UENN"}"#);
        assert!(matches!(delta, Some(InboundEvent::AudioDelta { delta }) if delta == "UENN"));

        let done = InboundEvent::parse(r#"{"type":"response.audio.done"}"#);
        assert!(matches!(done, Some(InboundEvent::AudioDone)));

        let completed = InboundEvent::parse(
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"hi"}"#,
        );
        assert!(matches!(
            completed,
            Some(InboundEvent::TranscriptionCompleted { transcript }) if transcript == "hi"
        ));

        let started = InboundEvent::parse(r#"{"type":"input_audio_buffer.speech_started","audio_start_ms":120}"#);
        assert!(matches!(started, Some(InboundEvent::SpeechStarted)));
    }

    #[test]
    fn test_inbound_error_event() {
        let event = InboundEvent::parse(
            r#"{"type":"error","error":{"message":"session expired","code":"session_expired"}}"#,
        );
        match event {
            Some(InboundEvent::ServerError { error }) => {
                assert_eq!(error.message, "session expired");
                assert_eq!(error.code.as_deref(), Some("session_expired"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_type_tolerated() {
        let event = InboundEvent::parse(r#"{"type":"rate_limits.updated","rate_limits":[]}"#);
        assert!(matches!(event, Some(InboundEvent::Unknown)));
    }
}
