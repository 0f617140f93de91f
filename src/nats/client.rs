use anyhow::{Context, Result};
use async_nats::Client;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use super::messages::{BookingReply, ConversationMessage, DescriptorLookup};
use crate::collaborators::{BookingRequest, Collaborators, Role, SessionDescriptor};
use crate::config::NatsConfig;
use crate::session::{AnalyticsRecord, TransportKind};

/// Collaborators reached over NATS: request/reply for lookups and bookings,
/// fire-and-forget publishes for memory and analytics
pub struct NatsCollaborators {
    client: Client,
    config: NatsConfig,
}

impl NatsCollaborators {
    /// Connect to NATS server
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .context("NATS url is not configured")?;

        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url.as_str())
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self { client, config })
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.request_timeout_ms)
    }

    async fn request<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        subject: &str,
        body: &Req,
    ) -> Result<Resp> {
        let payload = serde_json::to_vec(body)?;

        let reply = tokio::time::timeout(
            self.request_timeout(),
            self.client.request(subject.to_string(), payload.into()),
        )
        .await
        .with_context(|| format!("Request to {} timed out", subject))?
        .with_context(|| format!("Request to {} failed", subject))?;

        serde_json::from_slice(&reply.payload)
            .with_context(|| format!("Invalid reply on {}", subject))
    }

    async fn publish<T: Serialize>(&self, subject: &str, body: &T) -> Result<()> {
        let payload = serde_json::to_vec(body)?;

        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .with_context(|| format!("Failed to publish to {}", subject))?;

        debug!("Published to {}", subject);

        Ok(())
    }
}

#[async_trait]
impl Collaborators for NatsCollaborators {
    async fn lookup_descriptor(
        &self,
        transport: TransportKind,
        caller_ref: Option<&str>,
    ) -> Result<SessionDescriptor> {
        let lookup = DescriptorLookup {
            transport,
            caller_ref: caller_ref.map(str::to_string),
        };
        self.request(&self.config.descriptor_subject, &lookup).await
    }

    async fn submit_booking(&self, request: BookingRequest) -> Result<bool> {
        let reply: BookingReply = self.request(&self.config.booking_subject, &request).await?;
        if let Some(reason) = &reply.reason {
            info!(accepted = reply.accepted, "Booking service replied: {}", reason);
        }
        Ok(reply.accepted)
    }

    async fn append_message(&self, conversation_ref: &str, role: Role, text: &str) -> Result<()> {
        let message = ConversationMessage {
            conversation_ref: conversation_ref.to_string(),
            role,
            text: text.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        self.publish(&self.config.message_subject, &message).await
    }

    async fn record_analytics(&self, record: &AnalyticsRecord) -> Result<()> {
        self.publish(&self.config.analytics_subject, record).await?;
        self.client
            .flush()
            .await
            .context("Failed to flush analytics publish")?;
        Ok(())
    }
}
