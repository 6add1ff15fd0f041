//! Camera frame sampling for the live session.
//!
//! Once per second the latest camera frame is downsampled to quarter
//! resolution, JPEG-encoded, and interleaved into the outbound chunk
//! stream as an `image/jpeg` attachment. Frame acquisition itself is a
//! platform concern, kept behind [`FrameSource`].

use std::io::Cursor;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::RgbImage;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::pcm::{self, EncodedChunk};
use crate::error::{Error, Result};

/// Interval between sampled camera frames.
pub const FRAME_INTERVAL: Duration = Duration::from_secs(1);

/// JPEG quality for downsampled frames (0-100).
const JPEG_QUALITY: u8 = 60;

/// Supplies the most recent camera frame, if one is available.
pub trait FrameSource: Send {
    fn latest_frame(&mut self) -> Option<RgbImage>;
}

/// Downsample a frame to quarter resolution and encode it for transport.
pub fn encode_camera_frame(frame: &RgbImage) -> Result<EncodedChunk> {
    let (w, h) = frame.dimensions();
    let small = image::imageops::resize(
        frame,
        (w / 4).max(1),
        (h / 4).max(1),
        FilterType::Triangle,
    );

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut Cursor::new(&mut jpeg), JPEG_QUALITY)
        .encode_image(&small)
        .map_err(|e| Error::Parse(format!("jpeg encode failed: {e}")))?;

    Ok(EncodedChunk {
        mime_type: "image/jpeg".to_string(),
        data: pcm::to_base64(&jpeg),
    })
}

/// Spawn the 1 Hz frame pump. Encoding failures are logged and skipped;
/// the pump exits when the receiver side of `tx` is gone.
pub fn spawn_frame_pump<S: FrameSource + 'static>(
    mut source: S,
    tx: mpsc::UnboundedSender<EncodedChunk>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(FRAME_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            let Some(frame) = source.latest_frame() else {
                continue;
            };
            match encode_camera_frame(&frame) {
                Ok(chunk) => {
                    if tx.send(chunk).is_err() {
                        debug!("Frame receiver closed, stopping video pump");
                        break;
                    }
                }
                Err(e) => warn!("Skipping camera frame: {e}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_frame_is_quarter_resolution_jpeg() {
        let frame = RgbImage::from_fn(64, 48, |x, y| {
            image::Rgb([(x * 4) as u8, (y * 5) as u8, 128])
        });
        let chunk = encode_camera_frame(&frame).unwrap();
        assert_eq!(chunk.mime_type, "image/jpeg");

        let bytes = pcm::from_base64(&chunk.data).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width(), 16);
        assert_eq!(decoded.height(), 12);
    }

    #[test]
    fn tiny_frames_do_not_collapse_to_zero() {
        let frame = RgbImage::new(2, 2);
        let chunk = encode_camera_frame(&frame).unwrap();
        let bytes = pcm::from_base64(&chunk.data).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width(), 1);
        assert_eq!(decoded.height(), 1);
    }
}
