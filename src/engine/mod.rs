//! Connection to the remote realtime speech engine
//!
//! One connector per session. It forwards caller audio, relays the engine's
//! streamed audio, transcripts and control events, and never reconnects.

pub mod connector;
pub mod messages;
pub mod setup;

pub use connector::{ConnectionState, EngineConnector, EngineSender};
pub use messages::{ClientEvent, EngineEvent, ServerEvent};
pub use setup::{voice_for, EngineSetup};
