//! Realtime session tests against an in-process WebSocket server

use futures::{SinkExt, StreamExt};
use polyvox_realtime::{RealtimeConfig, RealtimeSession, SessionEvent, SessionState};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

fn test_config(addr: std::net::SocketAddr) -> RealtimeConfig {
    RealtimeConfig {
        url: format!("ws://{addr}"),
        api_key: Some("test-key".to_string()),
        reconnect_delays: vec![
            Duration::from_millis(20),
            Duration::from_millis(40),
            Duration::from_millis(60),
        ],
        reconnect_jitter: 0.0,
    }
}

async fn wait_for_state(
    rx: &mut broadcast::Receiver<SessionEvent>,
    wanted: SessionState,
) -> SessionState {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let event = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {wanted:?}"))
            .expect("event channel closed");
        if let SessionEvent::StateChanged(state) = event
            && state == wanted
        {
            return state;
        }
    }
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let event = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn test_connect_sends_session_update_and_reaches_listening() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let first = ws.next().await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(first.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "session.update");
        assert_eq!(value["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(value["session"]["turn_detection"]["create_response"], true);
        assert_eq!(value["session"]["voice"], "verse");

        // Keep the socket open until the client is done.
        while ws.next().await.is_some() {}
    });

    let session = RealtimeSession::new(test_config(addr));
    let mut rx = session.subscribe();
    session.connect("gpt-realtime", "verse", "Be brief.").unwrap();

    wait_for_state(&mut rx, SessionState::Listening).await;
    assert_eq!(session.state(), SessionState::Listening);

    session.end_session().unwrap();
    wait_for_state(&mut rx, SessionState::Idle).await;
    server.abort();
}

#[tokio::test]
async fn test_audio_frames_are_base64_appended() {
    use base64::Engine as _;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (frame_tx, frame_rx) = tokio::sync::oneshot::channel::<Vec<u8>>();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let _update = ws.next().await.unwrap().unwrap();
        let append = ws.next().await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(append.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "input_audio_buffer.append");
        let audio = base64::engine::general_purpose::STANDARD
            .decode(value["audio"].as_str().unwrap())
            .unwrap();
        let _ = frame_tx.send(audio);

        while ws.next().await.is_some() {}
    });

    let session = RealtimeSession::new(test_config(addr));
    let mut rx = session.subscribe();
    session.connect("gpt-realtime", "verse", "").unwrap();
    wait_for_state(&mut rx, SessionState::Listening).await;

    // Boundary drops: empty and all-zero frames never reach the socket.
    session.send_audio_frame(&[]).unwrap();
    session.send_audio_frame(&[0u8; 480]).unwrap();

    let pcm: Vec<u8> = vec![0x12, 0x34, 0x56, 0x78];
    session.send_audio_frame(&pcm).unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), frame_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, pcm);

    let counters = session.counters();
    assert_eq!(counters.audio_frames_sent, 1);
    assert_eq!(counters.audio_frames_dropped, 2);

    session.end_session().unwrap();
    server.abort();
}

#[tokio::test]
async fn test_inbound_events_drive_state_and_broadcast() {
    use base64::Engine as _;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let audio_b64 = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3, 4]);
    let audio_for_server = audio_b64.clone();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _update = ws.next().await.unwrap().unwrap();

        let events = [
            r#"{"type":"input_audio_buffer.speech_started"}"#.to_string(),
            r#"{"type":"conversation.item.input_audio_transcription.delta","delta":"hel"}"#
                .to_string(),
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"hello"}"#
                .to_string(),
            format!(r#"{{"type":"response.audio.delta","delta":"{audio_for_server}"}}"#),
            r#"{"type":"response.audio.done"}"#.to_string(),
            r#"{"type":"response.completed"}"#.to_string(),
        ];
        for event in events {
            ws.send(Message::Text(event.into())).await.unwrap();
        }
        while ws.next().await.is_some() {}
    });

    let session = RealtimeSession::new(test_config(addr));
    let mut rx = session.subscribe();
    session.connect("gpt-realtime", "verse", "").unwrap();

    wait_for_state(&mut rx, SessionState::Processing).await;
    let delta = wait_for(&mut rx, |e| matches!(e, SessionEvent::TranscriptionDelta(_))).await;
    assert!(matches!(delta, SessionEvent::TranscriptionDelta(d) if d == "hel"));

    let completed =
        wait_for(&mut rx, |e| matches!(e, SessionEvent::TranscriptionCompleted(_))).await;
    assert!(matches!(completed, SessionEvent::TranscriptionCompleted(t) if t == "hello"));

    // State change to Speaking is broadcast before the audio payload.
    wait_for_state(&mut rx, SessionState::Speaking).await;
    let audio = wait_for(&mut rx, |e| matches!(e, SessionEvent::AudioDelta(_))).await;
    assert!(matches!(audio, SessionEvent::AudioDelta(a) if a == audio_b64));

    wait_for(&mut rx, |e| matches!(e, SessionEvent::ResponseCompleted)).await;
    wait_for_state(&mut rx, SessionState::Listening).await;

    session.end_session().unwrap();
    server.abort();
}

#[tokio::test]
async fn test_reconnects_after_unexpected_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        // First connection: handshake, then drop it.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _update = ws.next().await.unwrap().unwrap();
        drop(ws);

        // Second connection: stay up.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _update = ws.next().await.unwrap().unwrap();
        while ws.next().await.is_some() {}
    });

    let session = RealtimeSession::new(test_config(addr));
    let mut rx = session.subscribe();
    session.connect("gpt-realtime", "verse", "").unwrap();

    wait_for_state(&mut rx, SessionState::Listening).await;
    // The drop forces Error → Connecting → Listening again.
    wait_for_state(&mut rx, SessionState::Error).await;
    wait_for_state(&mut rx, SessionState::Connecting).await;
    wait_for_state(&mut rx, SessionState::Listening).await;
    assert_eq!(session.reconnect_attempt(), 0, "reset after success");

    session.end_session().unwrap();
    server.abort();
}

#[tokio::test]
async fn test_reconnect_exhaustion_lands_in_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _update = ws.next().await.unwrap().unwrap();
        drop(ws);
        // Listener drops here: every reconnect attempt is refused.
    });

    let session = RealtimeSession::new(test_config(addr));
    let mut rx = session.subscribe();
    session.connect("gpt-realtime", "verse", "").unwrap();

    wait_for_state(&mut rx, SessionState::Listening).await;
    let error = wait_for(&mut rx, |e| matches!(e, SessionEvent::SessionError(_))).await;
    assert!(
        matches!(error, SessionEvent::SessionError(m) if m.contains("could not be re-established"))
    );
    assert_eq!(session.state(), SessionState::Error);

    server.abort();
}
