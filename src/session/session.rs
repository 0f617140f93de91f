use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BridgeError, BridgeResult};

/// Which caller transport a session serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Telephony media stream (8 kHz PCM16)
    Telephony,
    /// Browser test harness (engine-rate PCM16)
    BrowserTest,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Telephony => "telephony",
            TransportKind::BrowserTest => "browser_test",
        }
    }
}

/// Who holds the conversational floor while active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Floor {
    Listening,
    Speaking,
}

/// Session lifecycle. Transitions only move forward; `Active` toggles its floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active(Floor),
    Closing,
    Closed,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Active(Floor::Listening) => "listening",
            SessionState::Active(Floor::Speaking) => "speaking",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition(&self, next: SessionState) -> bool {
        match (self, next) {
            (SessionState::Active(_), SessionState::Active(_)) => true,
            (SessionState::Connecting, SessionState::Active(_))
            | (SessionState::Connecting, SessionState::Closing)
            | (SessionState::Active(_), SessionState::Closing)
            | (SessionState::Closing, SessionState::Closed) => true,
            _ => false,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active(_))
    }
}

/// Assistant and conversation a session is bound to after setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBinding {
    pub assistant_ref: String,
    pub conversation_ref: String,
}

/// One caller conversation
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub transport: TransportKind,
    pub binding: Option<SessionBinding>,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(transport: TransportKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            transport,
            binding: None,
            state: SessionState::Connecting,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn bind(&mut self, binding: SessionBinding) {
        self.binding = Some(binding);
    }

    /// Move to `next`, rejecting backward transitions
    pub fn transition(&mut self, next: SessionState) -> BridgeResult<()> {
        if !self.state.can_transition(next) {
            return Err(BridgeError::Protocol(format!(
                "illegal session transition {} -> {}",
                self.state.label(),
                next.label()
            )));
        }
        if next == SessionState::Closed {
            self.ended_at = Some(Utc::now());
        }
        self.state = next;
        Ok(())
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id.to_string(),
            transport: self.transport,
            state: self.state.label().to_string(),
            assistant_ref: self.binding.as_ref().map(|b| b.assistant_ref.clone()),
            conversation_ref: self.binding.as_ref().map(|b| b.conversation_ref.clone()),
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}

/// Read-only snapshot served by the HTTP API
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub transport: TransportKind,
    pub state: String,
    pub assistant_ref: Option<String>,
    pub conversation_ref: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}
