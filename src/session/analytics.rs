use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::{Session, TransportKind};
use crate::error::BridgeError;

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum EndReason {
    /// Caller sent `stop`
    Stopped,
    /// Transport dropped without `stop`
    Disconnected,
    EngineClosed(String),
    SetupTimeout,
    Failed(String),
}

impl EndReason {
    /// Fatal endings notify the caller with a terminal `error` message
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EndReason::Stopped | EndReason::Disconnected)
    }

    pub fn from_error(error: &BridgeError) -> Self {
        match error {
            BridgeError::TransportDisconnected => EndReason::Disconnected,
            BridgeError::SetupTimeout(_) => EndReason::SetupTimeout,
            BridgeError::EngineClosed(reason) => EndReason::EngineClosed(reason.clone()),
            other => EndReason::Failed(other.to_string()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            EndReason::Stopped => "caller stopped the session".to_string(),
            EndReason::Disconnected => "caller disconnected".to_string(),
            EndReason::EngineClosed(reason) => format!("speech engine closed: {}", reason),
            EndReason::SetupTimeout => "session setup timed out".to_string(),
            EndReason::Failed(reason) => reason.clone(),
        }
    }
}

/// Finished-call record handed to the analytics collaborator, once per session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub session_id: String,
    pub transport: TransportKind,
    pub assistant_ref: Option<String>,
    pub conversation_ref: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub turn_count: u32,
    pub interrupted_count: u32,
    pub booking_created: bool,
    pub end_reason: EndReason,
}

/// Counters gathered while the session runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalyticsAccumulator {
    turn_count: u32,
    interrupted_count: u32,
    booking_created: bool,
}

impl AnalyticsAccumulator {
    pub fn record_turn(&mut self) {
        self.turn_count += 1;
    }

    pub fn record_interruption(&mut self) {
        self.interrupted_count += 1;
    }

    pub fn record_booking(&mut self) {
        self.booking_created = true;
    }

    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    pub fn interrupted_count(&self) -> u32 {
        self.interrupted_count
    }

    pub fn booking_created(&self) -> bool {
        self.booking_created
    }

    /// Build the record for a session that has reached `closed`
    pub fn finish(self, session: &Session, end_reason: EndReason) -> AnalyticsRecord {
        let ended_at = session.ended_at.unwrap_or_else(Utc::now);
        let duration = ended_at.signed_duration_since(session.started_at);

        AnalyticsRecord {
            session_id: session.id.to_string(),
            transport: session.transport,
            assistant_ref: session.binding.as_ref().map(|b| b.assistant_ref.clone()),
            conversation_ref: session.binding.as_ref().map(|b| b.conversation_ref.clone()),
            started_at: session.started_at,
            ended_at,
            duration_seconds: duration.num_milliseconds().max(0) as f64 / 1000.0,
            turn_count: self.turn_count,
            interrupted_count: self.interrupted_count,
            booking_created: self.booking_created,
            end_reason,
        }
    }
}
