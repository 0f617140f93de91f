use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which way a frame travels through the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Caller → speech engine
    Inbound,
    /// Speech engine → caller
    Outbound,
}

/// PCM layout of a frame payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
    /// Bits per sample
    pub sample_width: u16,
}

impl AudioFormat {
    /// Caller-side telephony audio: 8 kHz mono PCM16
    pub const TELEPHONY: AudioFormat = AudioFormat::pcm16_mono(8000);

    /// Speech engine audio: 24 kHz mono PCM16
    pub const ENGINE: AudioFormat = AudioFormat::pcm16_mono(24000);

    pub const fn pcm16_mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            sample_width: 16,
        }
    }

    /// Bytes occupied by one sample of one channel
    pub fn bytes_per_sample(&self) -> usize {
        (self.sample_width as usize).div_ceil(8)
    }

    /// Bytes occupied by one sample across all channels
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels.max(1) as usize
    }
}

/// A bounded unit of PCM16 audio carried in one protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub direction: Direction,
    /// Monotonic per direction, assigned at arrival
    pub sequence: u64,
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    pub format: AudioFormat,
}

impl AudioFrame {
    pub fn new(direction: Direction, sequence: u64, samples: Vec<i16>, format: AudioFormat) -> Self {
        Self {
            direction,
            sequence,
            samples,
            format,
        }
    }

    /// Playback duration of the frame
    pub fn duration(&self) -> Duration {
        let per_channel = self.samples.len() as u64 / self.format.channels.max(1) as u64;
        if self.format.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(per_channel * 1_000_000 / self.format.sample_rate as u64)
    }

    /// Root-mean-square energy on the i16 scale
    pub fn rms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .samples
            .iter()
            .map(|&s| {
                let v = s as f64;
                v * v
            })
            .sum();
        (sum / self.samples.len() as f64).sqrt()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
