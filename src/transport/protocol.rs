use serde::{Deserialize, Serialize};

/// Message received from the caller transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CallerMessage {
    /// Begin the session and bind the transport
    Start {
        #[serde(default)]
        session_hint: Option<String>,
    },
    /// One inbound audio frame
    Media {
        /// Base64 PCM16
        payload: String,
        #[serde(default)]
        sequence: Option<u64>,
        #[serde(default)]
        sample_rate: Option<u32>,
    },
    /// Playback acknowledgement echoed back for a previously sent mark
    Mark { name: String },
    /// Graceful session end
    Stop,
}

/// Message sent to the caller transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BridgeMessage {
    /// One outbound audio frame
    Media {
        payload: String,
        sequence: u64,
        sample_rate: u32,
    },
    /// Marker the caller echoes once everything before it has played
    Mark { name: String },
    /// Caller must flush any locally buffered audio
    Clear,
    /// Terminal message sent before the stream closes on a fatal error
    Error { message: String },
}

/// What the ingress side of a transport observed
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(CallerMessage),
    /// Text that did not parse as a caller message
    Invalid(String),
    Disconnected,
}

impl CallerMessage {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Mark name used to acknowledge playback of an outbound chunk
pub fn mark_name(sequence: u64) -> String {
    format!("chunk-{}", sequence)
}
