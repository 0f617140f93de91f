//! External systems the bridge talks to
//!
//! The bridge consumes a session descriptor, submits bookings detected in the
//! conversation, mirrors transcripts into conversation memory, and emits one
//! analytics record per session. Production deployments reach these over
//! NATS (`crate::nats`); `LocalCollaborators` serves them from config.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::AssistantConfig;
use crate::session::{AnalyticsRecord, BookingAction, TransportKind};

/// Assistant configuration and conversation binding for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub assistant_ref: String,
    pub conversation_ref: String,
    pub assistant_name: String,
    pub instructions: String,
    #[serde(default)]
    pub voice_type: String,
    #[serde(default)]
    pub greeting: Option<String>,
}

impl SessionDescriptor {
    pub fn fallback(assistant_ref: &str, assistant_name: &str) -> Self {
        Self {
            assistant_ref: assistant_ref.to_string(),
            conversation_ref: format!("conv-{}", uuid::Uuid::new_v4()),
            assistant_name: assistant_name.to_string(),
            instructions: String::new(),
            voice_type: String::new(),
            greeting: None,
        }
    }

    /// Opening line the engine is asked to speak
    pub fn greeting(&self) -> String {
        self.greeting.clone().unwrap_or_else(|| {
            format!(
                "Hello there! I'm {}. How can I help you today?",
                self.assistant_name
            )
        })
    }
}

/// Speaker of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// A booking change detected in the assistant's speech
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub session_id: String,
    pub assistant_ref: String,
    pub conversation_ref: String,
    pub action: BookingAction,
}

#[async_trait]
pub trait Collaborators: Send + Sync {
    /// Resolve the assistant and conversation for a caller's inbound identifier
    async fn lookup_descriptor(
        &self,
        transport: TransportKind,
        caller_ref: Option<&str>,
    ) -> Result<SessionDescriptor>;

    /// Returns whether the booking system accepted the change
    async fn submit_booking(&self, request: BookingRequest) -> Result<bool>;

    async fn append_message(&self, conversation_ref: &str, role: Role, text: &str) -> Result<()>;

    /// Called exactly once per session, at close
    async fn record_analytics(&self, record: &AnalyticsRecord) -> Result<()>;
}

/// Serves the configured fallback assistant and logs everything else
pub struct LocalCollaborators {
    assistant: AssistantConfig,
}

impl LocalCollaborators {
    pub fn new(assistant: AssistantConfig) -> Self {
        Self { assistant }
    }
}

#[async_trait]
impl Collaborators for LocalCollaborators {
    async fn lookup_descriptor(
        &self,
        transport: TransportKind,
        caller_ref: Option<&str>,
    ) -> Result<SessionDescriptor> {
        let conversation_ref = match caller_ref {
            Some(caller) if !caller.is_empty() => format!("conv-{}", caller),
            _ => format!("conv-{}", uuid::Uuid::new_v4()),
        };

        debug!(?transport, %conversation_ref, "Serving local session descriptor");

        Ok(SessionDescriptor {
            assistant_ref: self.assistant.assistant_ref.clone(),
            conversation_ref,
            assistant_name: self.assistant.name.clone(),
            instructions: self.assistant.instructions.clone(),
            voice_type: self.assistant.voice_type.clone(),
            greeting: self.assistant.greeting.clone(),
        })
    }

    async fn submit_booking(&self, request: BookingRequest) -> Result<bool> {
        info!(
            session_id = %request.session_id,
            conversation = %request.conversation_ref,
            "Booking action: {:?}",
            request.action
        );
        Ok(true)
    }

    async fn append_message(&self, conversation_ref: &str, role: Role, text: &str) -> Result<()> {
        debug!(conversation = %conversation_ref, ?role, "{}", text);
        Ok(())
    }

    async fn record_analytics(&self, record: &AnalyticsRecord) -> Result<()> {
        info!(
            "Session analytics: {}",
            serde_json::to_string(record).unwrap_or_default()
        );
        Ok(())
    }
}
