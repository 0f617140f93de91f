//! Barge-in detection and the interrupted-response guard.
//!
//! A barge-in is declared while the assistant is speaking, either when the
//! engine reports caller speech or when enough consecutive voiced audio
//! arrives locally. Once declared, audio belonging to the interrupted response
//! is refused until the engine confirms it cleared the response or starts a
//! new one.

use tracing::{debug, info};

use super::analytics::AnalyticsAccumulator;
use crate::config::BargeInConfig;
use crate::transport::{PlaybackState, VoiceActivity};

/// Energy gate over consecutive inbound frames
#[derive(Debug, Clone)]
pub struct BargeInDetector {
    energy_threshold: f64,
    min_speech_ms: u64,
    voiced_ms: u64,
}

impl BargeInDetector {
    pub fn new(config: &BargeInConfig) -> Self {
        Self {
            energy_threshold: config.energy_threshold,
            min_speech_ms: config.min_speech_ms,
            voiced_ms: 0,
        }
    }

    /// Feed one frame; true once the voiced run reaches the minimum length
    pub fn observe(&mut self, activity: &VoiceActivity) -> bool {
        if activity.rms >= self.energy_threshold {
            self.voiced_ms += activity.duration_ms;
        } else {
            self.voiced_ms = 0;
        }
        self.voiced_ms >= self.min_speech_ms
    }

    pub fn reset(&mut self) {
        self.voiced_ms = 0;
    }

    pub fn voiced_ms(&self) -> u64 {
        self.voiced_ms
    }
}

/// Decides when to interrupt and which engine audio to admit afterwards
#[derive(Debug)]
pub struct InterruptionController {
    enabled: bool,
    honor_engine_vad: bool,
    detector: BargeInDetector,
    current_response: Option<String>,
    /// Response whose remaining audio must not reach the queue
    suppressed: Option<Suppressed>,
}

#[derive(Debug, Clone, PartialEq)]
struct Suppressed {
    response_id: Option<String>,
}

impl InterruptionController {
    pub fn new(config: &BargeInConfig) -> Self {
        Self {
            enabled: config.enabled,
            honor_engine_vad: config.honor_engine_vad,
            detector: BargeInDetector::new(config),
            current_response: None,
            suppressed: None,
        }
    }

    /// Local energy check on a forwarded caller frame
    pub fn on_inbound(&mut self, activity: &VoiceActivity, playback: PlaybackState) -> bool {
        if !self.enabled || playback != PlaybackState::Speaking {
            self.detector.reset();
            return false;
        }

        if self.detector.observe(activity) {
            debug!(
                sequence = activity.sequence,
                voiced_ms = self.detector.voiced_ms(),
                "Caller speech over playback"
            );
            self.detector.reset();
            return true;
        }
        false
    }

    /// Engine-side VAD heard the caller
    pub fn on_engine_speech_started(&mut self, playback: PlaybackState) -> bool {
        self.enabled && self.honor_engine_vad && playback == PlaybackState::Speaking
    }

    /// Record the interruption and start refusing the current response's audio
    pub fn interrupt(&mut self, analytics: &mut AnalyticsAccumulator) {
        analytics.record_interruption();
        self.suppress_current();
        info!(response_id = ?self.current_response, "Barge-in: interrupting assistant");
    }

    pub fn suppress_current(&mut self) {
        self.suppressed = Some(Suppressed {
            response_id: self.current_response.clone(),
        });
    }

    pub fn on_response_started(&mut self, response_id: Option<String>) {
        if let Some(suppressed) = &self.suppressed {
            if response_id.is_some() && response_id != suppressed.response_id {
                self.suppressed = None;
            }
        }
        self.current_response = response_id;
    }

    /// Whether an engine audio chunk may be enqueued
    pub fn admit_chunk(&self, response_id: &Option<String>) -> bool {
        match &self.suppressed {
            None => true,
            Some(suppressed) => match (&suppressed.response_id, response_id) {
                (Some(blocked), Some(id)) => blocked != id,
                _ => false,
            },
        }
    }

    /// The engine confirmed an interrupted response is gone
    pub fn on_cleared(&mut self, response_id: &Option<String>) {
        let matches = match &self.suppressed {
            Some(suppressed) => {
                response_id.is_none()
                    || suppressed.response_id.is_none()
                    || suppressed.response_id == *response_id
            }
            None => false,
        };
        if matches {
            self.suppressed = None;
        }
        if self.current_response == *response_id {
            self.current_response = None;
        }
    }

    pub fn on_response_done(&mut self, response_id: &Option<String>) {
        if self.current_response == *response_id {
            self.current_response = None;
        }
    }

    pub fn is_suppressing(&self) -> bool {
        self.suppressed.is_some()
    }
}
