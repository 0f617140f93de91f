pub mod audio;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod nats;
pub mod session;
pub mod transport;

pub use audio::{AudioFormat, AudioFrame, Direction, FrameCodec};
pub use collaborators::{Collaborators, LocalCollaborators, SessionDescriptor};
pub use config::Config;
pub use engine::{EngineConnector, EngineEvent, EngineSender};
pub use error::{BridgeError, BridgeResult, DecodeError};
pub use http::{create_router, AppState};
pub use nats::NatsCollaborators;
pub use session::{AnalyticsRecord, EndReason, SessionManager, SessionRun, TransportKind};
pub use transport::{BridgeMessage, CallerMessage, EgressHandle, EgressScheduler, IngressAdapter};
