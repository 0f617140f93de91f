use std::time::Duration;

use super::session::TransportKind;
use crate::audio::AudioFormat;
use crate::config::{BargeInConfig, Config, PlaybackAck};

/// Per-session settings resolved from the service config for one transport
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub transport: TransportKind,
    /// Format the caller sends and expects back
    pub caller_format: AudioFormat,
    /// Format the speech engine consumes and produces
    pub engine_format: AudioFormat,
    pub ack: PlaybackAck,
    /// Lead applied to [`PlaybackAck::Paced`] completion
    pub pacing_lead: Duration,
    pub setup_timeout: Duration,
    pub egress_capacity: usize,
    pub outbound_capacity: usize,
    pub barge_in: BargeInConfig,
    pub booking_timeout: Duration,
}

impl SessionConfig {
    pub fn for_transport(config: &Config, transport: TransportKind) -> Self {
        let session = &config.session;
        let engine_format = AudioFormat::pcm16_mono(config.audio.engine_sample_rate);

        let (caller_format, ack) = match transport {
            TransportKind::Telephony => (
                AudioFormat::pcm16_mono(config.audio.telephony_sample_rate),
                session.telephony_ack,
            ),
            TransportKind::BrowserTest => (engine_format, session.browser_ack),
        };

        Self {
            transport,
            caller_format,
            engine_format,
            ack,
            pacing_lead: session.pacing_lead(),
            setup_timeout: session.setup_timeout(),
            egress_capacity: session.egress_capacity,
            outbound_capacity: session.outbound_capacity,
            barge_in: session.barge_in.clone(),
            booking_timeout: session.booking_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telephony_defaults() {
        let config = SessionConfig::for_transport(&Config::default(), TransportKind::Telephony);
        assert_eq!(config.caller_format.sample_rate, 8000);
        assert_eq!(config.engine_format.sample_rate, 24000);
        assert_eq!(config.ack, PlaybackAck::Mark);
    }

    #[test]
    fn test_browser_uses_engine_rate() {
        let config = SessionConfig::for_transport(&Config::default(), TransportKind::BrowserTest);
        assert_eq!(config.caller_format, config.engine_format);
        assert_eq!(config.ack, PlaybackAck::Paced);
        assert_eq!(config.pacing_lead, Duration::from_millis(40));
        assert_eq!(config.outbound_capacity, 256);
    }
}
