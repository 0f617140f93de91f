use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::frame::{AudioFormat, AudioFrame, Direction};
use crate::error::DecodeError;

/// Converts between base64-wrapped little-endian PCM16 and sample buffers.
///
/// A codec is bound to the format its owner expects; it never resamples.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    format: AudioFormat,
}

impl FrameCodec {
    pub fn new(format: AudioFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Decode a wire payload into a frame of this codec's format
    pub fn decode(
        &self,
        wire: &str,
        direction: Direction,
        sequence: u64,
    ) -> Result<AudioFrame, DecodeError> {
        if self.format.sample_width != 16 {
            return Err(DecodeError::Malformed(format!(
                "unsupported sample width {} bits",
                self.format.sample_width
            )));
        }

        let bytes = STANDARD
            .decode(wire.as_bytes())
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let frame_bytes = self.format.bytes_per_frame();
        if bytes.len() % frame_bytes != 0 {
            return Err(DecodeError::Malformed(format!(
                "payload of {} bytes is not aligned to {}-byte sample frames",
                bytes.len(),
                frame_bytes
            )));
        }

        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Ok(AudioFrame::new(direction, sequence, samples, self.format))
    }

    /// Decode a payload whose sender declared its own sample rate
    pub fn decode_declared(
        &self,
        wire: &str,
        declared_rate: Option<u32>,
        direction: Direction,
        sequence: u64,
    ) -> Result<AudioFrame, DecodeError> {
        if let Some(declared) = declared_rate {
            if declared != self.format.sample_rate {
                return Err(DecodeError::FormatMismatch {
                    expected: self.format.sample_rate,
                    declared,
                });
            }
        }
        self.decode(wire, direction, sequence)
    }

    /// Encode a frame's samples for the wire
    pub fn encode(&self, frame: &AudioFrame) -> String {
        encode_samples(&frame.samples)
    }
}

/// Base64 of the little-endian sample bytes
pub fn encode_samples(samples: &[i16]) -> String {
    let pcm_bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    STANDARD.encode(pcm_bytes)
}
