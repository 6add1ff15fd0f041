//! Audio pipeline: PCM codec, capture, level metering, playback scheduling,
//! and 1 Hz camera-frame sampling for the live session.

pub mod capture;
pub mod level;
pub mod pcm;
pub mod playback;
pub mod ring_buffer;
pub mod video;

/// Sample rate of captured microphone audio sent to the live endpoint.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of synthesized speech received from the live endpoint.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Outbound frame size in samples (256 ms at 16 kHz).
pub const FRAME_SAMPLES: usize = 4096;
