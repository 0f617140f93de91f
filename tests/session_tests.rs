// Integration tests for the session lifecycle
//
// Each test drives a real session against a loopback mock speech engine and
// plays the caller side through the transport channels.

mod common;

use anyhow::Result;
use common::{
    expect_outbound, media, next_outbound, start, stop, test_config, MockEngine,
    TestCollaborators, WAIT,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use voice_bridge::collaborators::Role;
use voice_bridge::config::Config;
use voice_bridge::session::{AnalyticsRecord, EndReason, SessionManager, SessionStatus, TransportKind};
use voice_bridge::transport::{BridgeMessage, CallerMessage, TransportEvent};

struct Harness {
    inbound: mpsc::Sender<TransportEvent>,
    outbound: mpsc::Receiver<BridgeMessage>,
    status: tokio::sync::watch::Receiver<SessionStatus>,
    task: JoinHandle<AnalyticsRecord>,
}

impl Harness {
    fn open(config: Config, collaborators: Arc<TestCollaborators>, transport: TransportKind) -> Self {
        let manager = SessionManager::new(config, collaborators);
        let run = manager.open(transport);
        let status = run.status();
        let (inbound, inbound_rx) = mpsc::channel(64);
        let (outbound_tx, outbound) = mpsc::channel(64);
        let task = tokio::spawn(run.run(None, inbound_rx, outbound_tx));
        Self {
            inbound,
            outbound,
            status,
            task,
        }
    }

    async fn send(&self, event: TransportEvent) -> Result<()> {
        self.inbound.send(event).await?;
        Ok(())
    }

    async fn wait_state(&mut self, state: &str) -> Result<()> {
        tokio::time::timeout(WAIT, self.status.wait_for(|s| s.state == state)).await??;
        Ok(())
    }

    /// Wait for the session to end and collect what was left on the wire
    async fn finish(self) -> Result<(AnalyticsRecord, Vec<BridgeMessage>)> {
        let Harness {
            inbound,
            mut outbound,
            task,
            ..
        } = self;
        let record = tokio::time::timeout(WAIT, task).await??;
        drop(inbound);
        let mut rest = Vec::new();
        while let Some(message) = outbound.recv().await {
            rest.push(message);
        }
        Ok((record, rest))
    }
}

fn tone(len: usize, amplitude: i16) -> Vec<i16> {
    (0..len)
        .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
        .collect()
}

fn has_error(messages: &[BridgeMessage]) -> bool {
    messages
        .iter()
        .any(|m| matches!(m, BridgeMessage::Error { .. }))
}

#[tokio::test]
async fn test_stop_emits_single_record() -> Result<()> {
    let mut engine = MockEngine::start().await?;
    let collaborators = Arc::new(TestCollaborators::default());
    let mut session = Harness::open(
        test_config(&engine.url),
        collaborators.clone(),
        TransportKind::BrowserTest,
    );

    session.send(start("caller-42")).await?;
    engine.expect_setup().await?;
    session.wait_state("listening").await?;

    session.send(stop()).await?;
    session.wait_state("closed").await?;

    let (record, rest) = session.finish().await?;
    assert_eq!(record.end_reason, EndReason::Stopped);
    assert_eq!(record.transport, TransportKind::BrowserTest);
    assert_eq!(record.assistant_ref.as_deref(), Some("assistant-1"));
    assert!(!has_error(&rest));

    assert_eq!(collaborators.analytics.lock().unwrap().len(), 1);
    assert_eq!(
        collaborators.lookups.lock().unwrap().as_slice(),
        &[Some("caller-42".to_string())]
    );
    Ok(())
}

#[tokio::test]
async fn test_disconnect_without_stop_emits_single_record() -> Result<()> {
    let mut engine = MockEngine::start().await?;
    let collaborators = Arc::new(TestCollaborators::default());
    let mut session = Harness::open(
        test_config(&engine.url),
        collaborators.clone(),
        TransportKind::Telephony,
    );

    session.send(start("caller-1")).await?;
    engine.expect_setup().await?;
    session.wait_state("listening").await?;

    session.send(TransportEvent::Disconnected).await?;

    let (record, rest) = session.finish().await?;
    assert_eq!(record.end_reason, EndReason::Disconnected);
    assert!(!has_error(&rest));
    assert_eq!(collaborators.analytics.lock().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_setup_timeout_without_start() -> Result<()> {
    let engine = MockEngine::start().await?;
    let collaborators = Arc::new(TestCollaborators::default());
    let mut config = test_config(&engine.url);
    config.session.setup_timeout_ms = 100;

    let session = Harness::open(config, collaborators.clone(), TransportKind::Telephony);

    let (record, rest) = session.finish().await?;
    assert_eq!(record.end_reason, EndReason::SetupTimeout);
    assert!(has_error(&rest));
    assert!(record.assistant_ref.is_none());
    assert_eq!(collaborators.analytics.lock().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_engine_close_is_fatal() -> Result<()> {
    let mut engine = MockEngine::start().await?;
    let collaborators = Arc::new(TestCollaborators::default());
    let mut session = Harness::open(
        test_config(&engine.url),
        collaborators.clone(),
        TransportKind::BrowserTest,
    );

    session.send(start("caller-1")).await?;
    engine.expect_setup().await?;
    session.wait_state("listening").await?;

    engine.close();

    let (record, rest) = session.finish().await?;
    assert!(matches!(record.end_reason, EndReason::EngineClosed(_)));
    assert!(matches!(rest.last(), Some(BridgeMessage::Error { .. })));
    assert_eq!(collaborators.analytics.lock().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_inbound_frames_forwarded_once_in_order() -> Result<()> {
    let mut engine = MockEngine::start().await?;
    let collaborators = Arc::new(TestCollaborators::default());
    let mut session = Harness::open(
        test_config(&engine.url),
        collaborators,
        TransportKind::Telephony,
    );

    session.send(start("caller-1")).await?;
    engine.expect_setup().await?;
    session.wait_state("listening").await?;

    for (sequence, value) in [(1, 1i16), (2, 2), (2, 2), (3, 3)] {
        session.send(media(sequence, &[value; 160])).await?;
    }
    // Malformed frame is dropped without ending the session
    session
        .send(TransportEvent::Message(CallerMessage::Media {
            payload: "%%%".to_string(),
            sequence: Some(4),
            sample_rate: None,
        }))
        .await?;
    session.send(stop()).await?;

    let (record, _) = session.finish().await?;
    assert_eq!(record.end_reason, EndReason::Stopped);

    let appended: Vec<String> = engine
        .drain()
        .await
        .into_iter()
        .filter(|e| e["type"] == "input_audio_buffer.append")
        .filter_map(|e| e["audio"].as_str().map(str::to_string))
        .collect();
    let expected: Vec<String> = [1i16, 2, 3]
        .iter()
        .map(|v| voice_bridge::audio::encode_samples(&[*v; 160]))
        .collect();
    assert_eq!(appended, expected);
    Ok(())
}

#[tokio::test]
async fn test_engine_audio_played_and_turns_counted() -> Result<()> {
    let mut engine = MockEngine::start().await?;
    let collaborators = Arc::new(TestCollaborators::default());
    let mut session = Harness::open(
        test_config(&engine.url),
        collaborators,
        TransportKind::BrowserTest,
    );

    session.send(start("caller-1")).await?;
    engine.expect_setup().await?;
    session.wait_state("listening").await?;

    engine.response_created("r1");
    engine.respond_audio("r1", &tone(480, 1_000));
    engine.respond_audio("r1", &tone(480, 1_000));
    engine.response_done("r1", "completed");
    engine.response_created("r2");
    engine.respond_audio("r2", &tone(480, 1_000));

    let mut sequences = Vec::new();
    while sequences.len() < 3 {
        if let BridgeMessage::Media {
            sequence,
            sample_rate,
            ..
        } = next_outbound(&mut session.outbound).await?
        {
            assert_eq!(sample_rate, 24_000);
            sequences.push(sequence);
        }
    }
    assert_eq!(sequences, vec![1, 2, 3]);

    session.send(stop()).await?;
    let (record, _) = session.finish().await?;
    assert_eq!(record.turn_count, 1);
    assert_eq!(record.interrupted_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_barge_in_flushes_and_aborts_once() -> Result<()> {
    let mut engine = MockEngine::start().await?;
    let collaborators = Arc::new(TestCollaborators::default());
    let mut session = Harness::open(
        test_config(&engine.url),
        collaborators,
        TransportKind::Telephony,
    );

    session.send(start("caller-1")).await?;
    engine.expect_setup().await?;
    session.wait_state("listening").await?;

    engine.response_created("r1");
    for _ in 0..3 {
        engine.respond_audio("r1", &tone(480, 1_000));
    }

    // Telephony waits for the caller to echo each mark, so playback stays busy
    expect_outbound(&mut session.outbound, |m| matches!(m, BridgeMessage::Mark { .. })).await?;
    session.wait_state("speaking").await?;

    // 8 x 20 ms of loud caller audio at 8 kHz
    for sequence in 1..=8 {
        session.send(media(sequence, &tone(160, 3_000))).await?;
    }

    expect_outbound(&mut session.outbound, |m| *m == BridgeMessage::Clear).await?;
    engine.expect("response.cancel").await?;
    session.wait_state("listening").await?;

    // Late audio of the interrupted response never reaches the caller
    engine.respond_audio("r1", &tone(480, 1_000));
    engine.response_done("r1", "cancelled");
    engine.response_created("r2");
    engine.respond_audio("r2", &tone(480, 500));

    let resumed = expect_outbound(&mut session.outbound, |m| {
        matches!(m, BridgeMessage::Media { .. })
    })
    .await?;
    assert!(matches!(resumed, BridgeMessage::Media { sequence: 4, .. }));

    session.send(stop()).await?;
    let (record, _) = session.finish().await?;
    assert_eq!(record.interrupted_count, 1);
    assert_eq!(record.turn_count, 0);

    let cancels = engine
        .drain()
        .await
        .iter()
        .filter(|e| e["type"] == "response.cancel")
        .count();
    assert_eq!(cancels, 0, "abort_response must be sent exactly once");
    Ok(())
}

#[tokio::test]
async fn test_browser_barge_in_while_audio_plays() -> Result<()> {
    let mut engine = MockEngine::start().await?;
    let collaborators = Arc::new(TestCollaborators::default());
    let mut session = Harness::open(
        test_config(&engine.url),
        collaborators,
        TransportKind::BrowserTest,
    );

    session.send(start("caller-1")).await?;
    engine.expect_setup().await?;
    session.wait_state("listening").await?;

    // 30 x 100 ms at 24 kHz
    engine.response_created("r1");
    for _ in 0..30 {
        engine.respond_audio("r1", &tone(2_400, 1_000));
    }
    expect_outbound(&mut session.outbound, |m| matches!(m, BridgeMessage::Media { .. })).await?;
    session.wait_state("speaking").await?;

    // The browser is still playing what it was handed
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(session.status.borrow().state, "speaking");

    // 10 x 20 ms of loud caller audio at 24 kHz
    for sequence in 1..=10 {
        session.send(media(sequence, &tone(480, 3_000))).await?;
    }

    let mut played = 1;
    expect_outbound(&mut session.outbound, |m| {
        if matches!(m, BridgeMessage::Media { .. }) {
            played += 1;
        }
        *m == BridgeMessage::Clear
    })
    .await?;
    engine.expect("response.cancel").await?;
    session.wait_state("listening").await?;
    assert!(played < 30, "{} chunks handed over before the clear", played);

    session.send(stop()).await?;
    let (record, _) = session.finish().await?;
    assert_eq!(record.interrupted_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_barge_in_after_response_done_truncates_item() -> Result<()> {
    let mut engine = MockEngine::start().await?;
    let collaborators = Arc::new(TestCollaborators::default());
    let mut session = Harness::open(
        test_config(&engine.url),
        collaborators.clone(),
        TransportKind::Telephony,
    );

    session.send(start("caller-1")).await?;
    engine.expect_setup().await?;
    session.wait_state("listening").await?;

    // Engine finishes generating; the caller is still hearing it
    engine.response_created("r1");
    for _ in 0..3 {
        engine.respond_item_audio("r1", "item-1", &tone(480, 1_000));
    }
    engine.response_done("r1", "completed");
    // Events are relayed in order, so this landing means r1 is done
    engine.send(json!({
        "type": "conversation.item.input_audio_transcription.completed",
        "transcript": "after r1",
    }));
    tokio::time::timeout(WAIT, async {
        loop {
            let seen = collaborators
                .messages
                .lock()
                .unwrap()
                .iter()
                .any(|(_, text)| text == "after r1");
            if seen {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    expect_outbound(&mut session.outbound, |m| matches!(m, BridgeMessage::Mark { .. })).await?;
    session.wait_state("speaking").await?;

    for sequence in 1..=8 {
        session.send(media(sequence, &tone(160, 3_000))).await?;
    }

    expect_outbound(&mut session.outbound, |m| *m == BridgeMessage::Clear).await?;
    let truncate = engine.expect("conversation.item.truncate").await?;
    assert_eq!(truncate["item_id"], "item-1");
    assert_eq!(truncate["content_index"], 0);
    // Never past the 60 ms the engine produced
    assert!(truncate["audio_end_ms"].as_u64().unwrap_or(u64::MAX) <= 60);

    session.send(stop()).await?;
    let (record, _) = session.finish().await?;
    assert_eq!(record.interrupted_count, 1);
    assert_eq!(record.turn_count, 1);

    let cancels = engine
        .drain()
        .await
        .iter()
        .filter(|e| e["type"] == "response.cancel")
        .count();
    assert_eq!(cancels, 0);
    Ok(())
}

#[tokio::test]
async fn test_engine_vad_triggers_barge_in() -> Result<()> {
    let mut engine = MockEngine::start().await?;
    let collaborators = Arc::new(TestCollaborators::default());
    let mut session = Harness::open(
        test_config(&engine.url),
        collaborators,
        TransportKind::Telephony,
    );

    session.send(start("caller-1")).await?;
    engine.expect_setup().await?;
    session.wait_state("listening").await?;

    engine.response_created("r1");
    engine.respond_audio("r1", &tone(480, 1_000));
    expect_outbound(&mut session.outbound, |m| matches!(m, BridgeMessage::Mark { .. })).await?;
    session.wait_state("speaking").await?;

    engine.send(json!({ "type": "input_audio_buffer.speech_started", "audio_start_ms": 1200 }));

    expect_outbound(&mut session.outbound, |m| *m == BridgeMessage::Clear).await?;
    engine.expect("response.cancel").await?;

    session.send(stop()).await?;
    let (record, _) = session.finish().await?;
    assert_eq!(record.interrupted_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_quiet_caller_does_not_interrupt() -> Result<()> {
    let mut engine = MockEngine::start().await?;
    let collaborators = Arc::new(TestCollaborators::default());
    let mut session = Harness::open(
        test_config(&engine.url),
        collaborators,
        TransportKind::Telephony,
    );

    session.send(start("caller-1")).await?;
    engine.expect_setup().await?;
    session.wait_state("listening").await?;

    engine.response_created("r1");
    engine.respond_audio("r1", &tone(480, 1_000));
    expect_outbound(&mut session.outbound, |m| matches!(m, BridgeMessage::Mark { .. })).await?;

    for sequence in 1..=20 {
        session.send(media(sequence, &tone(160, 50))).await?;
    }
    session.send(stop()).await?;

    let (record, rest) = session.finish().await?;
    assert_eq!(record.interrupted_count, 0);
    assert!(!rest.contains(&BridgeMessage::Clear));
    Ok(())
}

#[tokio::test]
async fn test_booking_in_transcript_is_submitted() -> Result<()> {
    let mut engine = MockEngine::start().await?;
    let collaborators = Arc::new(TestCollaborators::default());
    let mut session = Harness::open(
        test_config(&engine.url),
        collaborators.clone(),
        TransportKind::BrowserTest,
    );

    session.send(start("caller-1")).await?;
    engine.expect_setup().await?;
    session.wait_state("listening").await?;

    let transcript = "You're booked!\n```json\n{\"booking_confirmed\": {\"name\": \"Dana\", \"date\": \"2025-06-02\", \"time\": \"10:30 AM\", \"details\": \"trim\"}}\n```";

    engine.response_created("r1");
    engine.send(json!({
        "type": "response.audio_transcript.done",
        "response_id": "r1",
        "transcript": transcript,
    }));
    engine.response_done("r1", "completed");
    engine.response_created("r2");
    engine.respond_audio("r2", &tone(480, 500));
    expect_outbound(&mut session.outbound, |m| matches!(m, BridgeMessage::Media { .. })).await?;

    session.send(stop()).await?;
    let (record, _) = session.finish().await?;
    assert!(record.booking_created);
    assert_eq!(collaborators.bookings.lock().unwrap().len(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let messages = collaborators.messages.lock().unwrap();
    assert!(messages
        .iter()
        .any(|(role, text)| *role == Role::Assistant && text == "You're booked!"));
    Ok(())
}

#[tokio::test]
async fn test_booking_json_is_not_voiced() -> Result<()> {
    let mut engine = MockEngine::start().await?;
    let collaborators = Arc::new(TestCollaborators::default());
    let mut session = Harness::open(
        test_config(&engine.url),
        collaborators,
        TransportKind::BrowserTest,
    );

    session.send(start("caller-1")).await?;
    engine.expect_setup().await?;
    session.wait_state("listening").await?;

    engine.response_created("r1");
    engine.send(json!({
        "type": "response.audio_transcript.delta",
        "response_id": "r1",
        "delta": "Done. ```json {\"booking_confirmed\"",
    }));
    engine.respond_audio("r1", &tone(480, 1_000));
    engine.response_done("r1", "completed");
    engine.response_created("r2");
    engine.respond_audio("r2", &tone(480, 500));

    let first = expect_outbound(&mut session.outbound, |m| {
        matches!(m, BridgeMessage::Media { .. })
    })
    .await?;
    assert!(matches!(first, BridgeMessage::Media { sequence: 1, .. }));
    if let BridgeMessage::Media { payload, .. } = first {
        assert_eq!(payload, voice_bridge::audio::encode_samples(&tone(480, 500)));
    }

    session.send(stop()).await?;
    let (record, _) = session.finish().await?;
    assert_eq!(record.interrupted_count, 0);
    assert_eq!(record.turn_count, 1);
    Ok(())
}
