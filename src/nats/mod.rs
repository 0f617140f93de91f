pub mod client;
pub mod messages;

pub use client::NatsCollaborators;
pub use messages::{BookingReply, ConversationMessage, DescriptorLookup};
