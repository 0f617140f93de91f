use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::protocol::{CallerMessage, TransportEvent};
use crate::audio::{AudioFormat, AudioFrame, Direction, FrameCodec};
use crate::engine::EngineSender;
use crate::error::{BridgeError, BridgeResult, DecodeError};

/// Result of admitting one caller message
#[derive(Debug, Clone, PartialEq)]
pub enum IngressOutcome {
    /// A fresh frame to push to the engine
    Forward(AudioFrame),
    /// `sequence <= last_seen`; already forwarded once
    Duplicate { sequence: u64, last_seen: u64 },
    /// Payload failed to decode; the session continues
    Rejected(DecodeError),
    /// Media arrived before `start`
    NotStarted,
    Started { session_hint: Option<String> },
    Mark(String),
    Stopped,
}

/// Summary of caller activity observed by the control task
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceActivity {
    pub sequence: u64,
    pub rms: f64,
    pub duration_ms: u64,
}

impl From<&AudioFrame> for VoiceActivity {
    fn from(frame: &AudioFrame) -> Self {
        Self {
            sequence: frame.sequence,
            rms: frame.rms(),
            duration_ms: frame.duration().as_millis() as u64,
        }
    }
}

/// Notifications from the ingress task to the session's control task
#[derive(Debug)]
pub enum IngressEvent {
    Started { session_hint: Option<String> },
    Activity(VoiceActivity),
    Stopped,
    Disconnected,
    Failed(BridgeError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngressStats {
    pub forwarded: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub backpressure_pauses: u64,
}

/// Admits caller frames in arrival order and forwards each one at most once
pub struct IngressAdapter {
    codec: FrameCodec,
    last_seen: Option<u64>,
    started: bool,
    stats: IngressStats,
}

impl IngressAdapter {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            codec: FrameCodec::new(format),
            last_seen: None,
            started: false,
            stats: IngressStats::default(),
        }
    }

    pub fn stats(&self) -> IngressStats {
        self.stats
    }

    pub fn last_seen(&self) -> Option<u64> {
        self.last_seen
    }

    /// Classify one caller message, updating sequence bookkeeping
    pub fn accept(&mut self, message: CallerMessage) -> IngressOutcome {
        match message {
            CallerMessage::Start { session_hint } => {
                self.started = true;
                IngressOutcome::Started { session_hint }
            }
            CallerMessage::Stop => IngressOutcome::Stopped,
            CallerMessage::Mark { name } => IngressOutcome::Mark(name),
            CallerMessage::Media {
                payload,
                sequence,
                sample_rate,
            } => {
                if !self.started {
                    return IngressOutcome::NotStarted;
                }

                let sequence = match (sequence, self.last_seen) {
                    (Some(seq), Some(last)) if seq <= last => {
                        self.stats.duplicates += 1;
                        return IngressOutcome::Duplicate {
                            sequence: seq,
                            last_seen: last,
                        };
                    }
                    (Some(seq), _) => seq,
                    (None, Some(last)) => last + 1,
                    (None, None) => 1,
                };

                match self
                    .codec
                    .decode_declared(&payload, sample_rate, Direction::Inbound, sequence)
                {
                    Ok(frame) => {
                        self.last_seen = Some(sequence);
                        self.stats.forwarded += 1;
                        IngressOutcome::Forward(frame)
                    }
                    Err(e) => {
                        self.stats.rejected += 1;
                        IngressOutcome::Rejected(e)
                    }
                }
            }
        }
    }

    /// Ingress task body.
    ///
    /// After reporting `start` it waits for the control task to hand over the
    /// engine sender; the transport is not read while the engine connects.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<TransportEvent>,
        events: mpsc::Sender<IngressEvent>,
        marks: mpsc::Sender<String>,
        binding: oneshot::Receiver<EngineSender>,
    ) -> IngressStats {
        let mut binding = Some(binding);
        let mut engine: Option<EngineSender> = None;

        info!("Ingress task started");

        loop {
            let event = inbound.recv().await.unwrap_or(TransportEvent::Disconnected);

            let message = match event {
                TransportEvent::Message(message) => message,
                TransportEvent::Invalid(raw) => {
                    warn!("Ignoring unparseable caller message: {}", truncate(&raw, 120));
                    continue;
                }
                TransportEvent::Disconnected => {
                    let _ = events.send(IngressEvent::Disconnected).await;
                    break;
                }
            };

            match self.accept(message) {
                IngressOutcome::Started { session_hint } => {
                    let Some(pending) = binding.take() else {
                        warn!("Duplicate start message ignored");
                        continue;
                    };
                    if events
                        .send(IngressEvent::Started { session_hint })
                        .await
                        .is_err()
                    {
                        break;
                    }
                    match pending.await {
                        Ok(sender) => engine = Some(sender),
                        Err(_) => {
                            debug!("Session setup abandoned before engine was bound");
                            break;
                        }
                    }
                }
                IngressOutcome::Forward(frame) => {
                    let Some(sender) = engine.as_ref() else {
                        continue;
                    };
                    let activity = VoiceActivity::from(&frame);
                    if let Err(e) = self.forward(sender, &frame).await {
                        if e.is_fatal() {
                            let _ = events.send(IngressEvent::Failed(e)).await;
                            break;
                        }
                        warn!(sequence = frame.sequence, "Frame not forwarded: {}", e);
                    }
                    if events.send(IngressEvent::Activity(activity)).await.is_err() {
                        break;
                    }
                }
                IngressOutcome::Duplicate {
                    sequence,
                    last_seen,
                } => {
                    warn!(sequence, last_seen, "Dropping duplicate inbound frame");
                }
                IngressOutcome::Rejected(e) => {
                    warn!("Dropping malformed inbound frame: {}", e);
                }
                IngressOutcome::NotStarted => {
                    warn!("Dropping media received before start");
                }
                IngressOutcome::Mark(name) => {
                    if marks.try_send(name).is_err() {
                        debug!("Mark acknowledgement not consumed");
                    }
                }
                IngressOutcome::Stopped => {
                    let _ = events.send(IngressEvent::Stopped).await;
                    break;
                }
            }
        }

        info!(
            "Ingress task stopped (forwarded={}, duplicates={}, rejected={})",
            self.stats.forwarded, self.stats.duplicates, self.stats.rejected
        );

        self.stats
    }

    async fn forward(&mut self, sender: &EngineSender, frame: &AudioFrame) -> BridgeResult<()> {
        match sender.send_audio(frame) {
            Err(BridgeError::Backpressure) => {
                self.stats.backpressure_pauses += 1;
                debug!(sequence = frame.sequence, "Engine buffer full, pausing ingress");
                sender.ready().await?;
                sender.send_audio(frame)
            }
            other => other,
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
