//! PCM audio frames and their wire encoding
//!
//! Frames travel as base64-wrapped little-endian PCM16. The codec is pure and
//! bound to the sample rate its owner expects.

pub mod codec;
pub mod frame;

pub use codec::{encode_samples, FrameCodec};
pub use frame::{AudioFormat, AudioFrame, Direction};
