//! Microphone capture via cpal.
//!
//! Opens the default (or named) input device, captures at its native sample
//! rate, resamples to 16 kHz mono f32, and pushes samples into a ring
//! buffer. A dedicated capture thread (cpal streams are not `Send`, so the
//! stream lives and dies on that thread) pops 4096-sample frames, meters
//! the signal level, PCM-encodes each frame, and forwards the encoded
//! chunks to the live session over a channel. The session recording
//! accumulates alongside for a post-session deep-analysis voice note.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::pcm::{self, EncodedChunk};
use super::ring_buffer::{sample_ring_buffer, SampleConsumer, SampleProducer};
use super::video::FrameSource;
use super::{level::LevelMeter, CAPTURE_SAMPLE_RATE, FRAME_SAMPLES};
use crate::error::{Error, Result};

/// What the caller wants captured.
#[derive(Debug, Clone, Default)]
pub struct CaptureConstraints {
    /// Input device name; `None` uses the system default.
    pub device: Option<String>,
    /// Ring buffer capacity override in samples.
    pub buffer_capacity: Option<usize>,
}

/// List available input device names.
pub fn list_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.input_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

/// Simple linear resampler from `from_rate` to `to_rate`, mono f32.
fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).floor() as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_idx = i as f64 * ratio;
        let idx0 = src_idx.floor() as usize;
        let frac = (src_idx - idx0 as f64) as f32;
        let s0 = input.get(idx0).copied().unwrap_or(0.0);
        let s1 = input.get(idx0 + 1).copied().unwrap_or(s0);
        output.push(s0 + frac * (s1 - s0));
    }
    output
}

/// Down-mix multi-channel audio to mono by averaging channels.
fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Running capture pipeline. Dropping it (or calling [`stop`]) releases the
/// hardware.
///
/// [`stop`]: CapturePipeline::stop
pub struct CapturePipeline {
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
    video_pump: Option<tokio::task::JoinHandle<()>>,
    level_bits: Arc<AtomicU32>,
    recording: Arc<Mutex<Vec<f32>>>,
    chunk_tx: mpsc::UnboundedSender<EncodedChunk>,
}

impl CapturePipeline {
    /// Request microphone access and start capturing.
    ///
    /// Returns the pipeline handle plus the receiving end of the encoded
    /// frame stream; the caller feeds those frames to the live session.
    /// Fails with [`Error::PermissionDenied`] when no usable input device
    /// is available — surfaced to the UI, no retry.
    pub fn start(
        constraints: CaptureConstraints,
    ) -> Result<(CapturePipeline, mpsc::UnboundedReceiver<EncodedChunk>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let chunk_tx = tx.clone();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let level_bits = Arc::new(AtomicU32::new(0));
        let recording = Arc::new(Mutex::new(Vec::new()));

        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let thread = {
            let stop_flag = Arc::clone(&stop_flag);
            let level_bits = Arc::clone(&level_bits);
            let recording = Arc::clone(&recording);
            std::thread::Builder::new()
                .name("phenograph-capture".into())
                .spawn(move || {
                    capture_thread(constraints, stop_flag, level_bits, recording, tx, ready_tx)
                })
                .map_err(|e| Error::PermissionDenied(format!("failed to spawn capture: {e}")))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(Error::PermissionDenied(
                    "capture thread died during startup".into(),
                ))
            }
        }

        Ok((
            CapturePipeline {
                stop_flag,
                thread: Some(thread),
                video_pump: None,
                level_bits,
                recording,
                chunk_tx,
            },
            rx,
        ))
    }

    /// Attach a camera frame source: one quarter-resolution JPEG per second
    /// is interleaved into the outbound chunk stream.
    pub fn attach_video<S: FrameSource + 'static>(&mut self, source: S) {
        self.video_pump = Some(super::video::spawn_frame_pump(
            source,
            self.chunk_tx.clone(),
        ));
    }

    /// Smoothed input level for UI feedback.
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Relaxed))
    }

    /// Take the accumulated session recording (16 kHz mono). Leaves an
    /// empty buffer behind; used to build a voice-note attachment for the
    /// follow-up deep analysis.
    pub fn take_recording(&self) -> Vec<f32> {
        std::mem::take(&mut *self.recording.lock().unwrap())
    }

    /// Disconnect and release the hardware. Idempotent.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(pump) = self.video_pump.take() {
            pump.abort();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Capture thread panicked during shutdown");
            }
            info!("Audio capture stopped");
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of the capture thread: owns the cpal stream, frames and encodes.
fn capture_thread(
    constraints: CaptureConstraints,
    stop_flag: Arc<AtomicBool>,
    level_bits: Arc<AtomicU32>,
    recording: Arc<Mutex<Vec<f32>>>,
    tx: mpsc::UnboundedSender<EncodedChunk>,
    ready_tx: std::sync::mpsc::Sender<Result<()>>,
) {
    let (producer, mut consumer) = sample_ring_buffer(constraints.buffer_capacity);

    let stream = match build_stream(constraints.device.as_deref(), producer) {
        Ok(s) => {
            let _ = ready_tx.send(Ok(()));
            s
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let mut meter = LevelMeter::new();
    loop {
        if stop_flag.load(Ordering::SeqCst) {
            break;
        }
        match consumer.pop_frame(FRAME_SAMPLES) {
            Some(frame) => {
                level_bits.store(meter.update(&frame).to_bits(), Ordering::Relaxed);
                recording.lock().unwrap().extend_from_slice(&frame);
                if tx.send(pcm::encode_frame(&frame)).is_err() {
                    // Receiver gone: the session ended before we did.
                    debug!("Frame receiver closed, stopping capture");
                    break;
                }
            }
            None => std::thread::sleep(Duration::from_millis(10)),
        }
    }
    drop(stream);
}

/// Find the input device, configure it, and start the cpal stream. The
/// callback only down-mixes, resamples, and pushes into the ring buffer.
fn build_stream(
    device_name: Option<&str>,
    mut producer: SampleProducer,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()
            .map_err(|e| Error::PermissionDenied(format!("failed to enumerate input devices: {e}")))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| Error::PermissionDenied(format!("input device not found: {name}")))?
    } else {
        host.default_input_device()
            .ok_or_else(|| Error::PermissionDenied("no default input device available".into()))?
    };

    let dev_name = device.name().unwrap_or_else(|_| "unknown".into());
    info!(device = %dev_name, "Selected input device");

    let default_config = device
        .default_input_config()
        .map_err(|e| Error::PermissionDenied(format!("failed to get input config: {e}")))?;

    let native_rate = default_config.sample_rate().0;
    let channels = default_config.channels();
    let stream_config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(native_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    info!(
        native_rate,
        channels,
        "Input device config (will resample to {}Hz mono if needed)",
        CAPTURE_SAMPLE_RATE,
    );

    let needs_resample = native_rate != CAPTURE_SAMPLE_RATE;
    let needs_downmix = channels > 1;

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = if needs_downmix {
                    to_mono(data, channels)
                } else {
                    data.to_vec()
                };
                let resampled = if needs_resample {
                    resample_linear(&mono, native_rate, CAPTURE_SAMPLE_RATE)
                } else {
                    mono
                };
                let written = producer.push_slice(&resampled);
                if written < resampled.len() {
                    // Ring buffer full; the oldest unread audio wins and
                    // this overflow is dropped. The consumer will catch up.
                }
            },
            move |err| {
                error!("Audio input stream error: {}", err);
            },
            None,
        )
        .map_err(|e| Error::PermissionDenied(format!("failed to build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| Error::PermissionDenied(format!("failed to start input stream: {e}")))?;

    info!("Audio capture started");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_halves_and_keeps_shape() {
        let input: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let out = resample_linear(&input, 32_000, 16_000);
        assert_eq!(out.len(), 50);
        // A linear ramp stays a ramp.
        assert!((out[10] - 20.0).abs() < 1.0);
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let input = vec![0.1f32, 0.2, 0.3];
        assert_eq!(resample_linear(&input, 16_000, 16_000), input);
    }

    #[test]
    fn downmix_averages_channels() {
        let stereo = vec![1.0f32, 0.0, 0.5, 0.5];
        assert_eq!(to_mono(&stereo, 2), vec![0.5, 0.5]);
        assert_eq!(to_mono(&stereo, 1), stereo);
    }
}
