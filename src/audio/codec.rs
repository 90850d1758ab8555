//! Pure codec functions for the wire audio format.
//!
//! The remote session speaks base64-encoded PCM16 mono, little-endian:
//! 16 kHz on the way up, 24 kHz on the way down. Everything in this module
//! is deterministic and side-effect free so audio correctness can be tested
//! without a live device.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;

use crate::error::{Error, Result};

/// A decoded sample buffer ready for the playback device.
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    /// Interleaved normalized samples in [-1, 1].
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PlaybackBuffer {
    /// Buffer duration in seconds.
    pub fn duration(&self) -> f64 {
        let frames = self.samples.len() / self.channels as usize;
        frames as f64 / self.sample_rate as f64
    }
}

/// Quantize normalized float samples to PCM16 little-endian bytes.
/// Out-of-range input is clamped, never rejected.
pub fn encode_samples(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Base64-encode raw bytes for the wire.
pub fn encode_base64(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

/// Decode a base64 wire payload into raw bytes.
pub fn decode_wire_audio(text: &str) -> Result<Vec<u8>> {
    B64.decode(text)
        .map_err(|e| Error::Decode(format!("invalid base64 payload: {}", e)))
}

/// Reconstruct a playable buffer from PCM16 little-endian bytes.
///
/// Fails when the byte length is not a multiple of the sample frame size
/// (2 bytes per sample times the channel count).
pub fn decode_to_playback_buffer(
    bytes: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<PlaybackBuffer> {
    let frame_size = 2 * channels as usize;
    if frame_size == 0 || bytes.len() % frame_size != 0 {
        return Err(Error::Decode(format!(
            "payload length {} is not a multiple of the frame size {}",
            bytes.len(),
            frame_size,
        )));
    }

    let mut samples = Vec::with_capacity(bytes.len() / 2);
    for chunk in bytes.chunks_exact(2) {
        let v = i16::from_le_bytes([chunk[0], chunk[1]]);
        samples.push(v as f32 / 32768.0);
    }

    Ok(PlaybackBuffer {
        samples,
        sample_rate,
        channels,
    })
}
