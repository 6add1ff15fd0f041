//! PCM sample conversion and transport encoding.
//!
//! The live endpoint exchanges raw 16-bit little-endian PCM as base64 text.
//! Capture runs at 16 kHz, playback at 24 kHz; this module is rate-agnostic
//! and only converts between f32 samples, i16 PCM, and base64.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// MIME type carried by outbound capture frames.
pub const CAPTURE_MIME: &str = "audio/pcm;rate=16000";

/// MIME type of inbound synthesized speech.
pub const PLAYBACK_MIME: &str = "audio/pcm;rate=24000";

/// Wire representation of one audio or image frame.
///
/// Owned by the transport call that carries it; nothing retains these after
/// send/receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedChunk {
    pub mime_type: String,
    pub data: String,
}

/// Convert f32 samples to 16-bit PCM.
///
/// Samples are clamped to [-1, 1]. The i16 range is asymmetric, so each
/// sign scales to its own extreme: -32768 for the negative branch, 32767
/// for the positive. Downstream decoding divides by 32768 and assumes
/// exactly this scaling; do not symmetrize it.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = s.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Convert little-endian 16-bit PCM bytes back to f32 samples.
///
/// A trailing odd byte is a partial frame and is dropped.
pub fn pcm16_to_float(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect()
}

/// Binary-to-text transport encoding.
pub fn to_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Inverse of [`to_base64`]. Malformed input is a decode error the caller
/// treats as a per-chunk drop, never a session failure.
pub fn from_base64(text: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(text)
        .map_err(|e| Error::Parse(format!("bad base64 chunk: {e}")))
}

/// Encode one captured frame for the live transport.
pub fn encode_frame(samples: &[f32]) -> EncodedChunk {
    let pcm = float_to_pcm16(samples);
    let mut bytes = Vec::with_capacity(pcm.len() * 2);
    for s in &pcm {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    EncodedChunk {
        mime_type: CAPTURE_MIME.to_string(),
        data: to_base64(&bytes),
    }
}

/// Decode an inbound audio chunk to f32 samples.
pub fn decode_frame(chunk: &EncodedChunk) -> Result<Vec<f32>> {
    let bytes = from_base64(&chunk.data)?;
    Ok(pcm16_to_float(&bytes))
}
