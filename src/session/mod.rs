//! Session lifecycle
//!
//! - `session`: typed state machine `connecting → active → closing → closed`
//! - `manager`: spawns and supervises the per-session tasks
//! - `interruption`: barge-in detection and interrupted-response suppression
//! - `booking`: scheduling intent carried in assistant transcripts
//! - `analytics`: the per-session record emitted at close

mod analytics;
mod booking;
mod config;
mod interruption;
mod manager;
mod session;

pub use analytics::{AnalyticsAccumulator, AnalyticsRecord, EndReason};
pub use booking::{extract_booking_action, mentions_booking_payload, BookingAction};
pub use config::SessionConfig;
pub use interruption::{BargeInDetector, InterruptionController};
pub use manager::{SessionManager, SessionRun};
pub use session::{Floor, Session, SessionBinding, SessionState, SessionStatus, TransportKind};
