//! Caller-facing side of the bridge
//!
//! - `protocol`: JSON control/media messages exchanged with the caller
//! - `ingress`: admits inbound frames in sequence order and forwards them
//! - `egress`: single-owner playback queue with `enqueue` and `flush`
//! - `sink`: writes outbound chunks to the caller and awaits completion

pub mod egress;
pub mod ingress;
pub mod protocol;
pub mod sink;

pub use egress::{EgressHandle, EgressReport, EgressScheduler, PlaybackSink, PlaybackState};
pub use ingress::{IngressAdapter, IngressEvent, IngressOutcome, IngressStats, VoiceActivity};
pub use protocol::{mark_name, BridgeMessage, CallerMessage, TransportEvent};
pub use sink::TransportSink;
