//! Gapless, in-order playback of engine audio to the caller.
//!
//! The queue lives inside one task. Other components reach it only through
//! [`EgressHandle::enqueue`] and [`EgressHandle::flush`], which travel over the
//! same channel, so their relative order is the order the task observes.

use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::AudioFrame;
use crate::error::{BridgeError, BridgeResult};

/// Whether assistant audio is currently queued or playing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Speaking,
}

/// Destination for outbound chunks.
///
/// `play` resolves once the transport reports the chunk fully delivered. It
/// may be dropped mid-flight when a flush arrives.
#[async_trait]
pub trait PlaybackSink: Send {
    async fn play(&mut self, chunk: &AudioFrame) -> BridgeResult<()>;

    /// Tell the caller to discard anything it buffered locally
    async fn clear(&mut self) -> BridgeResult<()>;
}

enum EgressCommand {
    Enqueue(AudioFrame),
    Flush(oneshot::Sender<usize>),
    Shutdown,
}

enum Outcome {
    Played(BridgeResult<()>),
    Flushed(oneshot::Sender<usize>),
    Closed,
}

/// Counters reported when the playback task exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EgressReport {
    pub played: u64,
    pub discarded: u64,
    pub flushes: u64,
}

/// Owner-side access to a running egress task
pub struct EgressHandle {
    commands: mpsc::Sender<EgressCommand>,
    playback: watch::Receiver<PlaybackState>,
    task: JoinHandle<EgressReport>,
}

impl EgressHandle {
    /// Append a chunk to the tail of the queue
    pub async fn enqueue(&self, chunk: AudioFrame) -> BridgeResult<()> {
        self.commands
            .send(EgressCommand::Enqueue(chunk))
            .await
            .map_err(|_| BridgeError::TransportDisconnected)
    }

    /// Discard every pending chunk and the one in flight.
    ///
    /// Returns once the queue is empty and idle, with the number of chunks
    /// discarded. Chunks enqueued after this returns are kept.
    pub async fn flush(&self) -> BridgeResult<usize> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(EgressCommand::Flush(ack_tx))
            .await
            .map_err(|_| BridgeError::TransportDisconnected)?;
        ack_rx.await.map_err(|_| BridgeError::TransportDisconnected)
    }

    pub fn playback(&self) -> watch::Receiver<PlaybackState> {
        self.playback.clone()
    }

    pub fn is_speaking(&self) -> bool {
        *self.playback.borrow() == PlaybackState::Speaking
    }

    /// Stop playback, discarding anything still queued
    pub async fn shutdown(self) -> EgressReport {
        let _ = self.commands.send(EgressCommand::Shutdown).await;
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                warn!("Egress task panicked: {}", e);
                EgressReport::default()
            }
        }
    }
}

/// The playback task body
pub struct EgressScheduler<S: PlaybackSink> {
    sink: S,
    commands: mpsc::Receiver<EgressCommand>,
    queue: VecDeque<AudioFrame>,
    state: watch::Sender<PlaybackState>,
    report: EgressReport,
}

impl<S: PlaybackSink + 'static> EgressScheduler<S> {
    /// Spawn the playback task and return its handle
    pub fn spawn(sink: S, capacity: usize) -> EgressHandle {
        let (commands_tx, commands_rx) = mpsc::channel(capacity.max(1));
        let (state_tx, state_rx) = watch::channel(PlaybackState::Idle);

        let scheduler = Self {
            sink,
            commands: commands_rx,
            queue: VecDeque::new(),
            state: state_tx,
            report: EgressReport::default(),
        };

        EgressHandle {
            commands: commands_tx,
            playback: state_rx,
            task: tokio::spawn(scheduler.run()),
        }
    }

    async fn run(mut self) -> EgressReport {
        debug!("Egress task started");

        loop {
            let Some(chunk) = self.queue.pop_front() else {
                self.set_state(PlaybackState::Idle);
                match self.commands.recv().await {
                    Some(EgressCommand::Enqueue(chunk)) => self.queue.push_back(chunk),
                    Some(EgressCommand::Flush(ack)) => self.finish_flush(0, ack).await,
                    Some(EgressCommand::Shutdown) | None => break,
                }
                continue;
            };

            self.set_state(PlaybackState::Speaking);

            let outcome = {
                let play = self.sink.play(&chunk);
                tokio::pin!(play);
                loop {
                    tokio::select! {
                        biased;
                        cmd = self.commands.recv() => match cmd {
                            Some(EgressCommand::Enqueue(next)) => self.queue.push_back(next),
                            Some(EgressCommand::Flush(ack)) => break Outcome::Flushed(ack),
                            Some(EgressCommand::Shutdown) | None => break Outcome::Closed,
                        },
                        result = &mut play => break Outcome::Played(result),
                    }
                }
            };

            match outcome {
                Outcome::Played(Ok(())) => {
                    self.report.played += 1;
                    debug!(sequence = chunk.sequence, "Chunk played");
                }
                Outcome::Played(Err(e)) => {
                    warn!(sequence = chunk.sequence, "Chunk delivery failed: {}", e);
                    self.report.discarded += 1 + self.queue.len() as u64;
                    self.queue.clear();
                    break;
                }
                Outcome::Flushed(ack) => {
                    let discarded = 1 + self.queue.len();
                    self.queue.clear();
                    self.finish_flush(discarded, ack).await;
                }
                Outcome::Closed => {
                    self.report.discarded += 1;
                    break;
                }
            }
        }

        self.report.discarded += self.queue.len() as u64;
        self.queue.clear();
        self.set_state(PlaybackState::Idle);

        info!(
            "Egress task stopped (played={}, discarded={}, flushes={})",
            self.report.played, self.report.discarded, self.report.flushes
        );

        self.report
    }

    async fn finish_flush(&mut self, discarded: usize, ack: oneshot::Sender<usize>) {
        self.report.flushes += 1;
        self.report.discarded += discarded as u64;

        if let Err(e) = self.sink.clear().await {
            warn!("Failed to send clear to caller: {}", e);
        }

        self.set_state(PlaybackState::Idle);
        debug!(discarded, "Egress flushed");

        let _ = ack.send(discarded);
    }

    fn set_state(&self, state: PlaybackState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}
