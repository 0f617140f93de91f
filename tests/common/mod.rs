// Shared fixtures for session-level integration tests
//
// `MockEngine` is a loopback WebSocket server standing in for the realtime
// speech engine. `TestCollaborators` records every collaborator call.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use voice_bridge::audio::encode_samples;
use voice_bridge::collaborators::{BookingRequest, Collaborators, Role, SessionDescriptor};
use voice_bridge::config::Config;
use voice_bridge::session::{AnalyticsRecord, TransportKind};
use voice_bridge::transport::{BridgeMessage, CallerMessage, TransportEvent};

pub const WAIT: Duration = Duration::from_secs(5);

enum MockCommand {
    Send(Value),
    Close,
}

pub struct MockEngine {
    pub url: String,
    received: mpsc::UnboundedReceiver<Value>,
    commands: mpsc::UnboundedSender<MockCommand>,
}

impl MockEngine {
    /// Accept a single connection on a random loopback port
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("ws://{}", listener.local_addr()?);
        let (received_tx, received) = mpsc::unbounded_channel();
        let (commands, mut commands_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                return;
            };
            let (mut sink, mut source) = ws.split();

            loop {
                tokio::select! {
                    incoming = source.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                                let _ = received_tx.send(value);
                            }
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    },
                    command = commands_rx.recv() => match command {
                        Some(MockCommand::Send(value)) => {
                            if sink.send(Message::Text(value.to_string())).await.is_err() {
                                break;
                            }
                        }
                        Some(MockCommand::Close) | None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                }
            }
        });

        Ok(Self {
            url,
            received,
            commands,
        })
    }

    pub fn send(&self, event: Value) {
        let _ = self.commands.send(MockCommand::Send(event));
    }

    pub fn close(&self) {
        let _ = self.commands.send(MockCommand::Close);
    }

    /// Next client event of the given type, skipping others
    pub async fn expect(&mut self, kind: &str) -> Result<Value> {
        tokio::time::timeout(WAIT, async {
            while let Some(event) = self.received.recv().await {
                if event["type"] == kind {
                    return Ok(event);
                }
            }
            Err(anyhow!("engine connection ended before {}", kind))
        })
        .await
        .map_err(|_| anyhow!("timed out waiting for {}", kind))?
    }

    /// Wait through session setup and the greeting request
    pub async fn expect_setup(&mut self) -> Result<()> {
        self.expect("session.update").await?;
        self.expect("conversation.item.create").await?;
        self.expect("response.create").await?;
        Ok(())
    }

    /// Everything the client sent that has not been consumed yet
    pub async fn drain(&mut self) -> Vec<Value> {
        let mut rest = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(500), self.received.recv()).await
        {
            rest.push(event);
        }
        rest
    }

    pub fn respond_audio(&self, response_id: &str, samples: &[i16]) {
        self.send(json!({
            "type": "response.audio.delta",
            "response_id": response_id,
            "delta": encode_samples(samples),
        }));
    }

    pub fn respond_item_audio(&self, response_id: &str, item_id: &str, samples: &[i16]) {
        self.send(json!({
            "type": "response.audio.delta",
            "response_id": response_id,
            "item_id": item_id,
            "delta": encode_samples(samples),
        }));
    }

    pub fn response_created(&self, response_id: &str) {
        self.send(json!({
            "type": "response.created",
            "response": { "id": response_id, "status": "in_progress" },
        }));
    }

    pub fn response_done(&self, response_id: &str, status: &str) {
        self.send(json!({
            "type": "response.done",
            "response": { "id": response_id, "status": status },
        }));
    }
}

#[derive(Default)]
pub struct TestCollaborators {
    pub analytics: Mutex<Vec<AnalyticsRecord>>,
    pub bookings: Mutex<Vec<BookingRequest>>,
    pub messages: Mutex<Vec<(Role, String)>>,
    pub lookups: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl Collaborators for TestCollaborators {
    async fn lookup_descriptor(
        &self,
        _transport: TransportKind,
        caller_ref: Option<&str>,
    ) -> Result<SessionDescriptor> {
        self.lookups
            .lock()
            .unwrap()
            .push(caller_ref.map(str::to_string));
        Ok(SessionDescriptor::fallback("assistant-1", "Ava"))
    }

    async fn submit_booking(&self, request: BookingRequest) -> Result<bool> {
        self.bookings.lock().unwrap().push(request);
        Ok(true)
    }

    async fn append_message(&self, _conversation_ref: &str, role: Role, text: &str) -> Result<()> {
        self.messages.lock().unwrap().push((role, text.to_string()));
        Ok(())
    }

    async fn record_analytics(&self, record: &AnalyticsRecord) -> Result<()> {
        self.analytics.lock().unwrap().push(record.clone());
        Ok(())
    }
}

pub fn test_config(engine_url: &str) -> Config {
    let mut config = Config::default();
    config.engine.url = engine_url.to_string();
    config.engine.model = String::new();
    config.engine.api_key_env = "VOICE_BRIDGE_TEST_UNSET_KEY".to_string();
    config.engine.connect_timeout_ms = 2_000;
    config.session.setup_timeout_ms = 2_000;
    config
}

pub fn start(hint: &str) -> TransportEvent {
    TransportEvent::Message(CallerMessage::Start {
        session_hint: Some(hint.to_string()),
    })
}

pub fn media(sequence: u64, samples: &[i16]) -> TransportEvent {
    TransportEvent::Message(CallerMessage::Media {
        payload: encode_samples(samples),
        sequence: Some(sequence),
        sample_rate: None,
    })
}

pub fn stop() -> TransportEvent {
    TransportEvent::Message(CallerMessage::Stop)
}

/// Next outbound message, with a timeout
pub async fn next_outbound(rx: &mut mpsc::Receiver<BridgeMessage>) -> Result<BridgeMessage> {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .map_err(|_| anyhow!("timed out waiting for outbound message"))?
        .ok_or_else(|| anyhow!("outbound channel closed"))
}

/// Skip outbound messages until one matches
pub async fn expect_outbound<F>(rx: &mut mpsc::Receiver<BridgeMessage>, mut matches: F) -> Result<BridgeMessage>
where
    F: FnMut(&BridgeMessage) -> bool,
{
    loop {
        let message = next_outbound(rx).await?;
        if matches(&message) {
            return Ok(message);
        }
    }
}
