use serde::{Deserialize, Serialize};

use crate::collaborators::Role;
use crate::session::TransportKind;

/// Request published to the descriptor service
#[derive(Debug, Serialize, Deserialize)]
pub struct DescriptorLookup {
    pub transport: TransportKind,
    pub caller_ref: Option<String>,
}

/// Reply from the booking service
#[derive(Debug, Serialize, Deserialize)]
pub struct BookingReply {
    pub accepted: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Conversation memory entry
#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub conversation_ref: String,
    pub role: Role,
    pub text: String,
    pub timestamp: String, // RFC3339 timestamp
}
