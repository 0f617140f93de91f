use futures::{Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use super::messages::{ClientEvent, EngineEvent, ServerEvent};
use super::setup::EngineSetup;
use crate::audio::{encode_samples, AudioFormat, AudioFrame};
use crate::config::EngineConfig;
use crate::error::{BridgeError, BridgeResult};

const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle of the engine connection. One-way; there is no reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Closed,
}

enum Control {
    Abort,
    Close,
}

/// Cloneable producer side of the connection
#[derive(Clone)]
pub struct EngineSender {
    audio: mpsc::Sender<String>,
    control: mpsc::Sender<Control>,
    state: watch::Receiver<ConnectionState>,
}

impl EngineSender {
    /// Forward one inbound frame without waiting
    pub fn send_audio(&self, frame: &AudioFrame) -> BridgeResult<()> {
        let state = self.state();
        if state != ConnectionState::Active {
            return Err(BridgeError::EngineUnavailable(format!(
                "connection is {:?}",
                state
            )));
        }

        self.audio
            .try_send(encode_samples(&frame.samples))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => BridgeError::Backpressure,
                mpsc::error::TrySendError::Closed(_) => {
                    BridgeError::EngineUnavailable("connection task ended".to_string())
                }
            })
    }

    /// Wait until the send buffer has room again
    pub async fn ready(&self) -> BridgeResult<()> {
        self.audio
            .reserve()
            .await
            .map(drop)
            .map_err(|_| BridgeError::EngineUnavailable("connection task ended".to_string()))
    }

    /// Ask the engine to discard its in-flight response. Idempotent.
    pub fn abort_response(&self) -> BridgeResult<()> {
        match self.control.try_send(Control::Abort) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(BridgeError::EngineUnavailable(
                "connection task ended".to_string(),
            )),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

/// Owns the single connection a session keeps to the speech engine
pub struct EngineConnector {
    sender: EngineSender,
    task: JoinHandle<()>,
}

impl EngineConnector {
    /// Dial the configured endpoint and start the connection task
    pub async fn connect(
        config: &EngineConfig,
        setup: EngineSetup,
    ) -> BridgeResult<(Self, mpsc::Receiver<EngineEvent>)> {
        let endpoint = config.endpoint();
        info!("Connecting to speech engine at {}", config.url);

        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| BridgeError::EngineUnavailable(format!("invalid endpoint: {}", e)))?;

        match std::env::var(&config.api_key_env) {
            Ok(key) if !key.is_empty() => {
                let bearer = HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|_| {
                    BridgeError::EngineUnavailable("API key is not a valid header".to_string())
                })?;
                let headers = request.headers_mut();
                headers.insert("Authorization", bearer);
                headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));
            }
            _ => warn!("{} not set; connecting without credentials", config.api_key_env),
        }

        let (stream, _response) =
            tokio::time::timeout(config.connect_timeout(), tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| {
                    BridgeError::EngineUnavailable(format!(
                        "connect timed out after {:?}",
                        config.connect_timeout()
                    ))
                })?
                .map_err(|e| BridgeError::EngineUnavailable(e.to_string()))?;

        info!("Connected to speech engine");

        Ok(Self::spawn(
            stream,
            setup,
            config.command_capacity,
            config.event_capacity,
        ))
    }

    /// Run the connection task over an already established WebSocket
    pub fn spawn<S>(
        stream: S,
        setup: EngineSetup,
        command_capacity: usize,
        event_capacity: usize,
    ) -> (Self, mpsc::Receiver<EngineEvent>)
    where
        S: Stream<Item = Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Unpin
            + Send
            + 'static,
    {
        let (audio_tx, audio_rx) = mpsc::channel(command_capacity.max(1));
        let (control_tx, control_rx) = mpsc::channel(8);
        let (events_tx, events_rx) = mpsc::channel(event_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let connection = Connection {
            stream,
            audio: audio_rx,
            control: control_rx,
            events: events_tx,
            state: state_tx,
            in_flight: None,
            voiced: None,
        };

        let connector = Self {
            sender: EngineSender {
                audio: audio_tx,
                control: control_tx,
                state: state_rx,
            },
            task: tokio::spawn(connection.run(setup)),
        };

        (connector, events_rx)
    }

    pub fn sender(&self) -> EngineSender {
        self.sender.clone()
    }

    pub fn send_audio(&self, frame: &AudioFrame) -> BridgeResult<()> {
        self.sender.send_audio(frame)
    }

    pub fn abort_response(&self) -> BridgeResult<()> {
        self.sender.abort_response()
    }

    pub fn state(&self) -> ConnectionState {
        self.sender.state()
    }

    /// Resolves once the connection is active, or fails if it closed first
    pub async fn wait_active(&self) -> BridgeResult<()> {
        let mut state = self.sender.state_watch();
        let reached = state
            .wait_for(|s| *s != ConnectionState::Connecting)
            .await
            .map(|s| *s)
            .unwrap_or(ConnectionState::Closed);

        match reached {
            ConnectionState::Active => Ok(()),
            _ => Err(BridgeError::EngineUnavailable(
                "connection closed during setup".to_string(),
            )),
        }
    }

    /// Close the connection and wait briefly for the task to finish
    pub async fn close(self) {
        let _ = self.sender.control.send(Control::Close).await;
        let mut task = self.task;
        if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
            warn!("Engine connection task did not stop in time; aborting");
            task.abort();
        }
    }
}

struct InFlight {
    response_id: Option<String>,
    cancelled: bool,
}

/// Latest assistant audio item relayed to the caller
struct VoicedItem {
    item_id: String,
    first_audio: Instant,
    audio: Duration,
    truncated: bool,
}

struct Connection<S> {
    stream: S,
    audio: mpsc::Receiver<String>,
    control: mpsc::Receiver<Control>,
    events: mpsc::Sender<EngineEvent>,
    state: watch::Sender<ConnectionState>,
    in_flight: Option<InFlight>,
    voiced: Option<VoicedItem>,
}

impl<S> Connection<S>
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin + Send,
{
    async fn run(mut self, setup: EngineSetup) {
        for event in setup.initial_events() {
            if let Err(e) = self.send(&event).await {
                error!("Engine session setup failed: {}", e);
                self.finish(format!("setup failed: {}", e)).await;
                return;
            }
        }

        let _ = self.state.send(ConnectionState::Active);
        info!("Engine session active (voice={})", setup.voice);

        let reason = loop {
            tokio::select! {
                biased;
                control = self.control.recv() => match control {
                    Some(Control::Abort) => {
                        if let Err(e) = self.abort().await {
                            break format!("send failed: {}", e);
                        }
                    }
                    Some(Control::Close) | None => {
                        if let Err(e) = self.drain_audio().await {
                            break format!("send failed: {}", e);
                        }
                        break "closed by bridge".to_string();
                    }
                },
                incoming = self.stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if !self.handle_text(&text).await {
                            break "event consumer gone".to_string();
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                            .unwrap_or_else(|| "closed by engine".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break e.to_string(),
                    None => break "stream ended".to_string(),
                },
                audio = self.audio.recv() => match audio {
                    Some(audio) => {
                        if let Err(e) = self.send(&ClientEvent::InputAudioAppend { audio }).await {
                            break format!("send failed: {}", e);
                        }
                    }
                    None => break "closed by bridge".to_string(),
                },
            }
        };

        let _ = self.stream.close().await;
        self.finish(reason).await;
    }

    async fn finish(&mut self, reason: String) {
        info!("Engine connection closed: {}", reason);
        let _ = self.state.send(ConnectionState::Closed);
        let _ = self.events.send(EngineEvent::Closed(reason)).await;
    }

    async fn send(&mut self, event: &ClientEvent) -> Result<(), WsError> {
        let json = serde_json::to_string(event).map_err(|e| WsError::Io(e.into()))?;
        self.stream.send(Message::Text(json)).await
    }

    /// Send caller audio that was queued before the close request
    async fn drain_audio(&mut self) -> Result<(), WsError> {
        while let Ok(audio) = self.audio.try_recv() {
            self.send(&ClientEvent::InputAudioAppend { audio }).await?;
        }
        Ok(())
    }

    /// Cancel the live response, then cut the voiced item to what was heard.
    /// The truncate also applies to a finished response whose audio is still
    /// playing.
    async fn abort(&mut self) -> Result<(), WsError> {
        let cancel = match self.in_flight.as_mut() {
            Some(in_flight) if !in_flight.cancelled => {
                in_flight.cancelled = true;
                Some(in_flight.response_id.clone())
            }
            _ => None,
        };
        if let Some(response_id) = cancel {
            info!(response_id = ?response_id, "Cancelling in-flight engine response");
            self.send(&ClientEvent::ResponseCancel { response_id }).await?;
        }

        let truncate = match self.voiced.as_mut() {
            Some(item) if !item.truncated => {
                item.truncated = true;
                let heard = item.first_audio.elapsed().min(item.audio);
                Some((item.item_id.clone(), heard.as_millis() as u64))
            }
            _ => None,
        };
        match truncate {
            Some((item_id, audio_end_ms)) => {
                info!(item_id = %item_id, audio_end_ms, "Truncating assistant item");
                self.send(&ClientEvent::ConversationItemTruncate {
                    item_id,
                    content_index: 0,
                    audio_end_ms,
                })
                .await
            }
            None => {
                debug!("Abort requested with nothing voiced");
                Ok(())
            }
        }
    }

    fn track_voiced(&mut self, item_id: Option<String>, delta: &str) {
        let Some(item_id) = item_id else {
            return;
        };
        let duration = pcm16_duration(delta);
        match self.voiced.as_mut() {
            Some(item) if item.item_id == item_id => item.audio += duration,
            _ => {
                self.voiced = Some(VoicedItem {
                    item_id,
                    first_audio: Instant::now(),
                    audio: duration,
                    truncated: false,
                })
            }
        }
    }

    /// Returns false once the session stopped listening
    async fn handle_text(&mut self, text: &str) -> bool {
        let event = match ServerEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                debug!("Unrecognised engine event: {}", e);
                return true;
            }
        };

        let mapped = match event {
            ServerEvent::SessionCreated | ServerEvent::Other => None,
            ServerEvent::ResponseCreated { response } => {
                self.in_flight = Some(InFlight {
                    response_id: response.id.clone(),
                    cancelled: false,
                });
                Some(EngineEvent::ResponseStarted {
                    response_id: response.id,
                })
            }
            ServerEvent::AudioDelta {
                response_id,
                item_id,
                delta,
            } => {
                if self.is_cancelled(&response_id) {
                    debug!(response_id = ?response_id, "Dropping audio of cancelled response");
                    None
                } else {
                    self.track_voiced(item_id, &delta);
                    Some(EngineEvent::AudioChunk {
                        response_id,
                        payload: delta,
                    })
                }
            }
            ServerEvent::TranscriptDelta { response_id, delta } => {
                Some(EngineEvent::TranscriptDelta {
                    response_id,
                    text: delta,
                })
            }
            ServerEvent::TranscriptDone {
                response_id,
                transcript,
            } => Some(EngineEvent::AssistantTranscript {
                response_id,
                text: transcript,
            }),
            ServerEvent::ResponseDone { response } => {
                let cancelled = response.is_cancelled()
                    || self.in_flight.as_ref().is_some_and(|f| f.cancelled);
                self.in_flight = None;
                if cancelled {
                    Some(EngineEvent::Cleared {
                        response_id: response.id,
                    })
                } else {
                    Some(EngineEvent::ResponseDone {
                        response_id: response.id,
                    })
                }
            }
            ServerEvent::SpeechStarted { .. } => Some(EngineEvent::SpeechStarted),
            ServerEvent::InputTranscriptionCompleted { transcript } => {
                Some(EngineEvent::UserTranscript(transcript))
            }
            ServerEvent::Error { error } => {
                warn!(code = ?error.code, "Speech engine error: {}", error.message);
                Some(EngineEvent::Error(error.message))
            }
        };

        match mapped {
            Some(event) => self.events.send(event).await.is_ok(),
            None => true,
        }
    }

    fn is_cancelled(&self, response_id: &Option<String>) -> bool {
        match &self.in_flight {
            Some(in_flight) if in_flight.cancelled => {
                response_id.is_none() || *response_id == in_flight.response_id
            }
            _ => false,
        }
    }
}

/// Playback length of a base64 PCM16 payload at the engine rate
fn pcm16_duration(payload: &str) -> Duration {
    let padding = payload.bytes().rev().take_while(|b| *b == b'=').count();
    let bytes = (payload.len() / 4 * 3).saturating_sub(padding);
    let samples = (bytes / 2) as u64;
    Duration::from_micros(samples * 1_000_000 / AudioFormat::ENGINE.sample_rate as u64)
}
