//! Session orchestration.
//!
//! Each session runs four tasks: ingress, egress playback, the engine
//! connection, and the control task in [`SessionRun::run`]. The control task
//! owns the session state and is the only place it changes. Everything else
//! reports to it over channels.

use std::sync::Arc;

use chrono::Local;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::analytics::{AnalyticsAccumulator, AnalyticsRecord, EndReason};
use super::booking::{extract_booking_action, mentions_booking_payload, BookingAction};
use super::config::SessionConfig;
use super::interruption::InterruptionController;
use super::session::{Floor, Session, SessionBinding, SessionState, SessionStatus, TransportKind};
use crate::audio::{Direction, FrameCodec};
use crate::collaborators::{BookingRequest, Collaborators, Role, SessionDescriptor};
use crate::config::{Config, EngineConfig};
use crate::engine::{EngineConnector, EngineEvent, EngineSender, EngineSetup};
use crate::error::BridgeError;
use crate::transport::{
    BridgeMessage, EgressHandle, EgressScheduler, IngressAdapter, IngressEvent, IngressStats,
    PlaybackState, TransportEvent, TransportSink,
};

const INGRESS_EVENT_CAPACITY: usize = 64;
const MARK_CAPACITY: usize = 32;

/// Creates sessions. Holds no per-session state.
#[derive(Clone)]
pub struct SessionManager {
    config: Arc<Config>,
    collaborators: Arc<dyn Collaborators>,
}

impl SessionManager {
    pub fn new(config: Config, collaborators: Arc<dyn Collaborators>) -> Self {
        Self {
            config: Arc::new(config),
            collaborators,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Allocate a session in `connecting`; nothing runs until [`SessionRun::run`]
    pub fn open(&self, transport: TransportKind) -> SessionRun {
        let session = Session::new(transport);
        let (status, _) = watch::channel(session.status());

        info!(session_id = %session.id, transport = transport.as_str(), "Session opened");

        SessionRun {
            settings: SessionConfig::for_transport(&self.config, transport),
            engine: self.config.engine.clone(),
            collaborators: Arc::clone(&self.collaborators),
            session,
            status,
        }
    }
}

/// A session ready to be driven over one caller transport
pub struct SessionRun {
    session: Session,
    settings: SessionConfig,
    engine: EngineConfig,
    collaborators: Arc<dyn Collaborators>,
    status: watch::Sender<SessionStatus>,
}

type BookingOutcome = (BookingAction, anyhow::Result<bool>);

/// Control-task state that only exists while the session is active
struct Conversation<'a> {
    egress: &'a EgressHandle,
    playback: watch::Receiver<PlaybackState>,
    engine: EngineSender,
    controller: InterruptionController,
    codec: FrameCodec,
    next_sequence: u64,
    /// Streamed assistant text of the current response
    transcript: String,
    /// Current response carries booking JSON and must not be voiced
    muted: bool,
}

impl SessionRun {
    pub fn id(&self) -> Uuid {
        self.session.id
    }

    pub fn transport(&self) -> TransportKind {
        self.session.transport
    }

    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Settings resolved for this session's transport
    pub fn settings(&self) -> &SessionConfig {
        &self.settings
    }

    /// Drive the session to `closed` and return the analytics record it emitted.
    ///
    /// `caller_ref` identifies the caller when the `start` message carries no
    /// hint of its own.
    pub async fn run(
        mut self,
        caller_ref: Option<String>,
        inbound: mpsc::Receiver<TransportEvent>,
        outbound: mpsc::Sender<BridgeMessage>,
    ) -> AnalyticsRecord {
        let (ingress_tx, mut ingress_rx) = mpsc::channel(INGRESS_EVENT_CAPACITY);
        let (marks_tx, marks_rx) = mpsc::channel(MARK_CAPACITY);
        let (bind_tx, bind_rx) = oneshot::channel();

        let ingress = IngressAdapter::new(self.settings.caller_format);
        let ingress_task = tokio::spawn(ingress.run(inbound, ingress_tx, marks_tx, bind_rx));

        let sink = TransportSink::new(outbound.clone(), marks_rx, self.settings.ack)
            .with_pacing_lead(self.settings.pacing_lead);
        let egress = EgressScheduler::spawn(sink, self.settings.egress_capacity);

        let mut analytics = AnalyticsAccumulator::default();
        let mut bookings: JoinSet<BookingOutcome> = JoinSet::new();

        let (reason, connector) = match self.establish(&mut ingress_rx, bind_tx, caller_ref).await {
            Ok((connector, engine_rx)) => {
                let conversation = Conversation {
                    egress: &egress,
                    playback: egress.playback(),
                    engine: connector.sender(),
                    controller: InterruptionController::new(&self.settings.barge_in),
                    codec: FrameCodec::new(self.settings.engine_format),
                    next_sequence: 1,
                    transcript: String::new(),
                    muted: false,
                };
                let reason = self
                    .converse(conversation, &mut ingress_rx, engine_rx, &mut analytics, &mut bookings)
                    .await;
                (reason, Some(connector))
            }
            Err(reason) => (reason, None),
        };

        self.close(
            reason,
            egress,
            ingress_task,
            connector,
            outbound,
            bookings,
            analytics,
        )
        .await
    }

    /// Wait for `start`, resolve the descriptor and bring the engine up
    async fn establish(
        &mut self,
        ingress_rx: &mut mpsc::Receiver<IngressEvent>,
        bind_tx: oneshot::Sender<EngineSender>,
        caller_ref: Option<String>,
    ) -> Result<(EngineConnector, mpsc::Receiver<EngineEvent>), EndReason> {
        let hint = match timeout(self.settings.setup_timeout, wait_for_start(ingress_rx)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    session_id = %self.session.id,
                    "No start message within {:?}", self.settings.setup_timeout
                );
                return Err(EndReason::SetupTimeout);
            }
        };

        let caller = hint.or(caller_ref);
        let descriptor = self
            .collaborators
            .lookup_descriptor(self.session.transport, caller.as_deref())
            .await
            .map_err(|e| {
                error!(session_id = %self.session.id, "Descriptor lookup failed: {:#}", e);
                EndReason::from_error(&BridgeError::Collaborator(e.to_string()))
            })?;

        self.bind(&descriptor);

        let setup = EngineSetup::new(&descriptor, &self.engine);
        let (connector, engine_rx) = EngineConnector::connect(&self.engine, setup)
            .await
            .map_err(|e| {
                error!(session_id = %self.session.id, "Engine connect failed: {}", e);
                EndReason::from_error(&e)
            })?;

        if let Err(e) = connector.wait_active().await {
            error!(session_id = %self.session.id, "Engine setup failed: {}", e);
            connector.close().await;
            return Err(EndReason::from_error(&e));
        }

        if bind_tx.send(connector.sender()).is_err() {
            connector.close().await;
            return Err(EndReason::Disconnected);
        }

        self.set_state(SessionState::Active(Floor::Listening));
        info!(
            session_id = %self.session.id,
            assistant = %descriptor.assistant_name,
            "Session active"
        );

        Ok((connector, engine_rx))
    }

    fn bind(&mut self, descriptor: &SessionDescriptor) {
        self.session.bind(SessionBinding {
            assistant_ref: descriptor.assistant_ref.clone(),
            conversation_ref: descriptor.conversation_ref.clone(),
        });
        self.status.send_replace(self.session.status());
    }

    /// Active-phase control loop; returns why the session is ending
    async fn converse(
        &mut self,
        mut conv: Conversation<'_>,
        ingress_rx: &mut mpsc::Receiver<IngressEvent>,
        mut engine_rx: mpsc::Receiver<EngineEvent>,
        analytics: &mut AnalyticsAccumulator,
        bookings: &mut JoinSet<BookingOutcome>,
    ) -> EndReason {
        let mut playback = conv.playback.clone();

        loop {
            tokio::select! {
                biased;
                event = ingress_rx.recv() => match event {
                    Some(IngressEvent::Activity(activity)) => {
                        let state = *conv.playback.borrow();
                        if conv.controller.on_inbound(&activity, state) {
                            if let Err(reason) = self.barge_in(&mut conv, analytics).await {
                                return reason;
                            }
                        }
                    }
                    Some(IngressEvent::Started { .. }) => debug!("Ignoring repeated start"),
                    Some(IngressEvent::Stopped) => return EndReason::Stopped,
                    Some(IngressEvent::Disconnected) | None => return EndReason::Disconnected,
                    Some(IngressEvent::Failed(e)) => return EndReason::from_error(&e),
                },
                changed = playback.changed() => {
                    if changed.is_err() {
                        return EndReason::Disconnected;
                    }
                    let floor = match *playback.borrow_and_update() {
                        PlaybackState::Speaking => Floor::Speaking,
                        PlaybackState::Idle => Floor::Listening,
                    };
                    self.set_floor(floor);
                },
                event = engine_rx.recv() => {
                    let Some(event) = event else {
                        return EndReason::EngineClosed("event stream ended".to_string());
                    };
                    if let Some(reason) = self.on_engine_event(&mut conv, event, analytics, bookings).await {
                        return reason;
                    }
                },
                Some(joined) = bookings.join_next(), if !bookings.is_empty() => {
                    record_booking_outcome(joined, analytics);
                },
            }
        }
    }

    async fn on_engine_event(
        &mut self,
        conv: &mut Conversation<'_>,
        event: EngineEvent,
        analytics: &mut AnalyticsAccumulator,
        bookings: &mut JoinSet<BookingOutcome>,
    ) -> Option<EndReason> {
        match event {
            EngineEvent::ResponseStarted { response_id } => {
                debug!(response_id = ?response_id, "Response started");
                conv.controller.on_response_started(response_id);
                conv.transcript.clear();
                conv.muted = false;
            }
            EngineEvent::AudioChunk {
                response_id,
                payload,
            } => {
                if !conv.controller.admit_chunk(&response_id) {
                    debug!(response_id = ?response_id, "Dropping audio of interrupted response");
                    return None;
                }
                let frame = match conv.codec.decode(&payload, Direction::Outbound, conv.next_sequence) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Dropping malformed engine audio: {}", e);
                        return None;
                    }
                };
                conv.next_sequence += 1;
                if conv.egress.enqueue(frame).await.is_err() {
                    return Some(EndReason::Disconnected);
                }
            }
            EngineEvent::TranscriptDelta { text, .. } => {
                conv.transcript.push_str(&text);
                if !conv.muted && mentions_booking_payload(&conv.transcript) {
                    conv.muted = true;
                    conv.controller.suppress_current();
                    match conv.egress.flush().await {
                        Ok(discarded) => debug!(discarded, "Muted booking payload"),
                        Err(_) => return Some(EndReason::Disconnected),
                    }
                }
            }
            EngineEvent::AssistantTranscript { text, .. } => {
                let (spoken, action) = extract_booking_action(&text, Local::now().date_naive());
                if !spoken.is_empty() {
                    self.remember(Role::Assistant, spoken);
                }
                if let Some(action) = action {
                    self.submit_booking(action, bookings);
                }
            }
            EngineEvent::UserTranscript(text) => {
                debug!("Caller said: {}", text);
                self.remember(Role::User, text);
            }
            EngineEvent::SpeechStarted => {
                let state = *conv.playback.borrow();
                if conv.controller.on_engine_speech_started(state) {
                    if let Err(reason) = self.barge_in(conv, analytics).await {
                        return Some(reason);
                    }
                }
            }
            EngineEvent::ResponseDone { response_id } => {
                analytics.record_turn();
                conv.controller.on_response_done(&response_id);
            }
            EngineEvent::Cleared { response_id } => {
                debug!(response_id = ?response_id, "Engine cleared response");
                conv.controller.on_cleared(&response_id);
            }
            EngineEvent::Error(message) => {
                debug!("Continuing after engine error: {}", message);
            }
            EngineEvent::Closed(reason) => return Some(EndReason::EngineClosed(reason)),
        }
        None
    }

    /// Stop the assistant and hand the floor back to the caller
    async fn barge_in(
        &mut self,
        conv: &mut Conversation<'_>,
        analytics: &mut AnalyticsAccumulator,
    ) -> Result<(), EndReason> {
        conv.controller.interrupt(analytics);

        if let Err(e) = conv.engine.abort_response() {
            warn!("Failed to abort engine response: {}", e);
        }

        match conv.egress.flush().await {
            Ok(discarded) => debug!(discarded, "Playback flushed on barge-in"),
            Err(_) => return Err(EndReason::Disconnected),
        }

        self.set_floor(Floor::Listening);
        Ok(())
    }

    fn remember(&self, role: Role, text: String) {
        let Some(binding) = &self.session.binding else {
            return;
        };
        let collaborators = Arc::clone(&self.collaborators);
        let conversation_ref = binding.conversation_ref.clone();
        tokio::spawn(async move {
            if let Err(e) = collaborators
                .append_message(&conversation_ref, role, &text)
                .await
            {
                warn!("Failed to store conversation message: {:#}", e);
            }
        });
    }

    fn submit_booking(&self, action: BookingAction, bookings: &mut JoinSet<BookingOutcome>) {
        let Some(binding) = &self.session.binding else {
            return;
        };
        info!(session_id = %self.session.id, "Booking intent detected: {:?}", action);

        let request = BookingRequest {
            session_id: self.session.id.to_string(),
            assistant_ref: binding.assistant_ref.clone(),
            conversation_ref: binding.conversation_ref.clone(),
            action: action.clone(),
        };
        let collaborators = Arc::clone(&self.collaborators);
        bookings.spawn(async move {
            let result = collaborators.submit_booking(request).await;
            (action, result)
        });
    }

    /// Tear down in reverse dependency order and emit analytics exactly once
    #[allow(clippy::too_many_arguments)]
    async fn close(
        mut self,
        reason: EndReason,
        egress: EgressHandle,
        ingress_task: JoinHandle<IngressStats>,
        connector: Option<EngineConnector>,
        outbound: mpsc::Sender<BridgeMessage>,
        mut bookings: JoinSet<BookingOutcome>,
        mut analytics: AnalyticsAccumulator,
    ) -> AnalyticsRecord {
        info!(session_id = %self.session.id, "Session closing: {}", reason.describe());
        self.set_state(SessionState::Closing);

        let report = egress.shutdown().await;

        ingress_task.abort();
        let ingress_stats = ingress_task.await.ok();

        if let Some(connector) = connector {
            connector.close().await;
        }

        if reason.is_fatal() {
            let message = BridgeMessage::Error {
                message: reason.describe(),
            };
            if outbound.send(message).await.is_err() {
                debug!("Caller gone before terminal error could be sent");
            }
        }
        drop(outbound);

        if !bookings.is_empty() {
            let drained = timeout(self.settings.booking_timeout, async {
                while let Some(joined) = bookings.join_next().await {
                    record_booking_outcome(joined, &mut analytics);
                }
            })
            .await;
            if drained.is_err() {
                warn!("Abandoning booking calls still pending at close");
                bookings.abort_all();
            }
        }

        self.set_state(SessionState::Closed);

        let record = analytics.finish(&self.session, reason);
        if let Err(e) = self.collaborators.record_analytics(&record).await {
            warn!(session_id = %self.session.id, "Failed to record analytics: {:#}", e);
        }

        info!(
            session_id = %self.session.id,
            "Session closed (turns={}, interruptions={}, played={}, discarded={}, forwarded={})",
            record.turn_count,
            record.interrupted_count,
            report.played,
            report.discarded,
            ingress_stats.map(|s| s.forwarded).unwrap_or_default()
        );

        record
    }

    fn set_state(&mut self, next: SessionState) {
        if let Err(e) = self.session.transition(next) {
            warn!(session_id = %self.session.id, "{}", e);
            return;
        }
        self.status.send_replace(self.session.status());
    }

    fn set_floor(&mut self, floor: Floor) {
        if self.session.state.is_active() && self.session.state != SessionState::Active(floor) {
            self.set_state(SessionState::Active(floor));
        }
    }
}

async fn wait_for_start(
    ingress_rx: &mut mpsc::Receiver<IngressEvent>,
) -> Result<Option<String>, EndReason> {
    loop {
        match ingress_rx.recv().await {
            Some(IngressEvent::Started { session_hint }) => return Ok(session_hint),
            Some(IngressEvent::Activity(_)) => {}
            Some(IngressEvent::Stopped) => return Err(EndReason::Stopped),
            Some(IngressEvent::Disconnected) | None => return Err(EndReason::Disconnected),
            Some(IngressEvent::Failed(e)) => return Err(EndReason::from_error(&e)),
        }
    }
}

fn record_booking_outcome(
    joined: Result<BookingOutcome, tokio::task::JoinError>,
    analytics: &mut AnalyticsAccumulator,
) {
    match joined {
        Ok((action, Ok(true))) => {
            info!("Booking accepted: {:?}", action);
            if action.is_confirmation() {
                analytics.record_booking();
            }
        }
        Ok((action, Ok(false))) => info!("Booking rejected: {:?}", action),
        Ok((_, Err(e))) => warn!("Booking submission failed: {:#}", e),
        Err(e) => warn!("Booking task failed: {}", e),
    }
}
