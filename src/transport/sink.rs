use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use super::egress::PlaybackSink;
use super::protocol::{mark_name, BridgeMessage};
use crate::audio::{encode_samples, AudioFrame};
use crate::config::PlaybackAck;
use crate::error::{BridgeError, BridgeResult};

/// Plays chunks by writing `media` messages to the caller's outbound queue.
///
/// In [`PlaybackAck::Mark`] mode each chunk is followed by a `mark` and is
/// complete only when the caller echoes it back through `marks`.
///
/// In [`PlaybackAck::Paced`] mode the sink keeps an estimate of where the
/// caller's playhead is. A chunk completes `pacing_lead` before the caller
/// runs out of audio, so playback stays busy for as long as it is audible.
pub struct TransportSink {
    outbound: mpsc::Sender<BridgeMessage>,
    marks: mpsc::Receiver<String>,
    ack: PlaybackAck,
    pacing_lead: Duration,
    /// When the audio handed to the caller so far finishes playing
    playhead: Option<Instant>,
}

impl TransportSink {
    pub fn new(
        outbound: mpsc::Sender<BridgeMessage>,
        marks: mpsc::Receiver<String>,
        ack: PlaybackAck,
    ) -> Self {
        Self {
            outbound,
            marks,
            ack,
            pacing_lead: Duration::ZERO,
            playhead: None,
        }
    }

    pub fn with_pacing_lead(mut self, lead: Duration) -> Self {
        self.pacing_lead = lead;
        self
    }

    async fn send(&self, message: BridgeMessage) -> BridgeResult<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| BridgeError::TransportDisconnected)
    }
}

#[async_trait]
impl PlaybackSink for TransportSink {
    async fn play(&mut self, chunk: &AudioFrame) -> BridgeResult<()> {
        self.send(BridgeMessage::Media {
            payload: encode_samples(&chunk.samples),
            sequence: chunk.sequence,
            sample_rate: chunk.format.sample_rate,
        })
        .await?;

        if self.ack == PlaybackAck::Paced {
            let now = Instant::now();
            let start = self.playhead.filter(|t| *t > now).unwrap_or(now);
            let end = start + chunk.duration();
            self.playhead = Some(end);
            let due = end.checked_sub(self.pacing_lead).unwrap_or(now);
            tokio::time::sleep_until(due).await;
            return Ok(());
        }

        let name = mark_name(chunk.sequence);
        self.send(BridgeMessage::Mark { name: name.clone() }).await?;

        loop {
            match self.marks.recv().await {
                Some(echoed) if echoed == name => return Ok(()),
                Some(stale) => debug!(mark = %stale, expected = %name, "Ignoring stale mark"),
                None => return Err(BridgeError::TransportDisconnected),
            }
        }
    }

    async fn clear(&mut self) -> BridgeResult<()> {
        self.playhead = None;
        while self.marks.try_recv().is_ok() {}
        self.send(BridgeMessage::Clear).await
    }
}
