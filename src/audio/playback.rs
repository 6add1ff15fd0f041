//! Gapless playback scheduling for inbound synthesized speech.
//!
//! The live endpoint delivers speech as a burst of short PCM chunks. Each
//! chunk is decoded into a [`PlaybackItem`] and queued; items are scheduled
//! strictly in arrival order against a monotonic cursor so playback is
//! gapless and never overlapping, however bursty the arrival. A barge-in
//! signal from the remote peer cancels everything and restarts the timeline
//! from "now".

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use tracing::{debug, warn};

use super::{pcm, PLAYBACK_SAMPLE_RATE};
use crate::error::{Error, Result};

/// A decoded chunk waiting its turn. Played exactly once, then discarded.
#[derive(Debug, Clone)]
pub struct PlaybackItem {
    pub samples: Vec<f32>,
    pub duration: Duration,
}

/// Monotonic audio clock. Abstracted so tests can drive time by hand.
pub trait AudioClock: Send {
    fn now(&self) -> Duration;
}

/// Output device. The production implementation appends to a rodio sink,
/// which plays appended buffers back to back; the scheduler's cursor math
/// decides *when* each item is handed over.
pub trait AudioSink: Send {
    fn play(&mut self, item: PlaybackItem, at: Duration);
    fn stop(&mut self);
}

/// FIFO playback scheduler.
pub struct PlaybackScheduler {
    clock: Box<dyn AudioClock>,
    sink: Box<dyn AudioSink>,
    queue: VecDeque<PlaybackItem>,
    /// End time of the most recently scheduled item.
    cursor: Duration,
    playing: bool,
}

impl PlaybackScheduler {
    pub fn new(clock: impl AudioClock + 'static, sink: impl AudioSink + 'static) -> Self {
        Self {
            clock: Box::new(clock),
            sink: Box::new(sink),
            queue: VecDeque::new(),
            cursor: Duration::ZERO,
            playing: false,
        }
    }

    /// Open the default output device. The returned scheduler plays through
    /// rodio and clocks against process-monotonic time.
    pub fn open() -> Result<Self> {
        Ok(Self::new(StreamClock::new(), RodioSink::open()?))
    }

    /// Decode an inbound chunk and queue it; starts playback immediately if
    /// the player is idle. A decode failure is returned so the caller can
    /// drop the chunk, but the scheduler state is untouched either way.
    pub fn enqueue(&mut self, chunk: &pcm::EncodedChunk) -> Result<()> {
        let samples = pcm::decode_frame(chunk)?;
        if samples.is_empty() {
            return Err(Error::Parse("empty audio chunk".into()));
        }
        let duration =
            Duration::from_secs_f64(samples.len() as f64 / f64::from(PLAYBACK_SAMPLE_RATE));
        self.queue.push_back(PlaybackItem { samples, duration });
        if !self.playing {
            self.play_next();
        }
        Ok(())
    }

    /// Pop the queue head and schedule it at `max(now, cursor)`. With an
    /// empty queue, marks the player idle instead.
    fn play_next(&mut self) {
        match self.queue.pop_front() {
            None => {
                self.playing = false;
            }
            Some(item) => {
                let start = self.clock.now().max(self.cursor);
                self.cursor = start + item.duration;
                debug!(start_ms = start.as_millis() as u64, dur_ms = item.duration.as_millis() as u64, "Scheduling playback item");
                self.sink.play(item, start);
                self.playing = true;
            }
        }
    }

    /// Time-driven pump: hands the next queued item to the sink once the
    /// previous one has run its course. Call this on a periodic tick.
    pub fn tick(&mut self) {
        while self.playing && self.clock.now() >= self.cursor {
            self.play_next();
            if !self.playing {
                break;
            }
        }
    }

    /// Stop the in-flight item, empty the queue, and restart the timeline
    /// from the current clock time. Used on remote barge-in.
    pub fn cancel_all(&mut self) {
        let dropped = self.queue.len();
        if dropped > 0 {
            debug!(dropped, "Cancelling queued playback");
        }
        self.queue.clear();
        self.sink.stop();
        self.playing = false;
        self.cursor = self.clock.now();
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

// ---------------------------------------------------------------------------
// Production clock and sink
// ---------------------------------------------------------------------------

/// Process-monotonic clock; a stand-in for the output device's own clock.
pub struct StreamClock {
    origin: Instant,
}

impl StreamClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for StreamClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for StreamClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// rodio-backed output sink.
///
/// `rodio::OutputStream` is not `Send`, so a dedicated thread owns it for
/// the life of the sink; the `Sink` handle itself is shareable and appends
/// buffers gaplessly in FIFO order.
pub struct RodioSink {
    sink: Arc<Sink>,
    shutdown: std::sync::mpsc::Sender<()>,
}

impl RodioSink {
    pub fn open() -> Result<Self> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("phenograph-playback".into())
            .spawn(move || match OutputStream::try_default() {
                Ok((stream, handle)) => match Sink::try_new(&handle) {
                    Ok(sink) => {
                        let sink = Arc::new(sink);
                        let _ = ready_tx.send(Ok(Arc::clone(&sink)));
                        // Keep the stream alive until the sink is dropped.
                        let _ = shutdown_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(Error::Transport(format!(
                            "failed to create audio sink: {e}"
                        ))));
                    }
                },
                Err(e) => {
                    let _ = ready_tx.send(Err(Error::PermissionDenied(format!(
                        "failed to open audio output: {e}"
                    ))));
                }
            })
            .map_err(|e| Error::Transport(format!("failed to spawn playback thread: {e}")))?;

        let sink = ready_rx
            .recv()
            .map_err(|_| Error::Transport("playback thread died during startup".into()))??;

        Ok(Self {
            sink,
            shutdown: shutdown_tx,
        })
    }
}

impl AudioSink for RodioSink {
    fn play(&mut self, item: PlaybackItem, _at: Duration) {
        // The sink plays appended buffers consecutively; the scheduler only
        // hands an item over once its start time is due.
        let source = SamplesBuffer::new(1, PLAYBACK_SAMPLE_RATE, item.samples);
        self.sink.append(source);
        if self.sink.is_paused() {
            self.sink.play();
        }
    }

    fn stop(&mut self) {
        self.sink.stop();
    }
}

impl Drop for RodioSink {
    fn drop(&mut self) {
        if self.shutdown.send(()).is_err() {
            warn!("Playback thread already gone");
        }
    }
}
