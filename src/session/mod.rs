//! Live co-pilot session: connection lifecycle, event dispatch, and
//! interruption handling.
//!
//! One [`LiveSession`] owns the whole streaming exchange: outbound encoded
//! frames from the capture pipeline, inbound audio routed to the playback
//! scheduler, transcript fragments folded into discrete utterances, and an
//! emergency-keyword alert. All state lives in a single value and is only
//! mutated by the control and dispatch methods here.
//!
//! Exactly one session may be active at a time; callers close the previous
//! session before connecting a new one.

pub mod risk;
pub mod transcript;
pub mod transport;

use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::capture::CapturePipeline;
use crate::audio::pcm::EncodedChunk;
use crate::audio::playback::PlaybackScheduler;
use crate::error::{Error, Result};
use risk::RiskScanner;
use transcript::TranscriptBuffer;

/// Instruction given to the live model. The urgent suffix is appended when
/// a session starts with the risk alert already raised.
pub const LIVE_SYSTEM_INSTRUCTION: &str = "\
SYSTEM: You are a live clinical instructor and screener guiding a user \
through capturing a medical video for deep analysis.

1. INSTRUCT first: if the view is poor, command the user to adjust \
(\"Move closer to the face.\", \"Hold the camera steady.\", \"Show me the \
hands.\").
2. IDENTIFY second: if you see clear clinical signs, name them and suggest \
a hypothesis.
3. FORMAT: short, directive sentences. No long lectures.

Ignore background noise (TV, music, chatter). Focus only on the patient. \
Your goal is a capture of high enough quality for the subsequent deep \
analysis.";

/// Suffix applied to the instruction in urgent mode.
pub const URGENT_SUFFIX: &str = " URGENT MODE: BE BRIEF AND DIRECT.";

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Streaming,
    /// Transient: the remote peer signalled barge-in. The next outbound or
    /// inbound activity returns the session to `Streaming`.
    Interrupted,
    Closing,
    Closed,
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Streaming => "streaming",
            Self::Interrupted => "interrupted",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Inbound events multiplexed off the live transport.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Synthesized speech payload.
    Audio(EncodedChunk),
    /// Output transcription fragment.
    Transcript(String),
    /// The model finished its turn.
    TurnComplete,
    /// The user spoke over the model; queued playback is stale.
    Interrupted,
    /// Remote closed the stream.
    Closed,
    /// Transport-level failure.
    Error(String),
}

/// Outbound half of a live transport.
#[allow(async_fn_in_trait)]
pub trait LiveSender: Send {
    async fn send_chunk(&mut self, chunk: &EncodedChunk) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// Inbound half of a live transport. `None` means the remote end is gone.
#[allow(async_fn_in_trait)]
pub trait LiveReceiver: Send {
    async fn next_event(&mut self) -> Option<ServerEvent>;
}

/// Session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Quiet period after which a running utterance is flushed.
    pub debounce: Duration,
    /// How many completed utterances to keep as rolling observations.
    pub max_observations: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            debounce: transcript::DEFAULT_DEBOUNCE,
            max_observations: 5,
        }
    }
}

/// The live streaming session.
pub struct LiveSession<W: LiveSender, R: LiveReceiver> {
    state: SessionState,
    tx: Option<W>,
    rx: Option<R>,
    player: PlaybackScheduler,
    transcript: TranscriptBuffer,
    risk: RiskScanner,
    observations: VecDeque<String>,
    max_observations: usize,
    capture: Option<CapturePipeline>,
    interrupts: u32,
}

enum Step {
    Frame(Option<EncodedChunk>),
    Event(Option<ServerEvent>),
    Tick,
}

impl<W: LiveSender, R: LiveReceiver> LiveSession<W, R> {
    /// A fresh, unconnected session.
    pub fn new(player: PlaybackScheduler, options: SessionOptions) -> Self {
        Self {
            state: SessionState::Idle,
            tx: None,
            rx: None,
            player,
            transcript: TranscriptBuffer::new(options.debounce),
            risk: RiskScanner::new(),
            observations: VecDeque::new(),
            max_observations: options.max_observations,
            capture: None,
            interrupts: 0,
        }
    }

    /// Drive the transport handshake: `Idle → Connecting → Open`.
    ///
    /// Connecting twice is a precondition violation; close the previous
    /// session first.
    pub async fn connect<F>(&mut self, connecting: F) -> Result<()>
    where
        F: Future<Output = Result<(W, R)>>,
    {
        if self.state != SessionState::Idle {
            return Err(Error::Transport(format!(
                "cannot connect from state {}; close the active session first",
                self.state
            )));
        }
        self.state = SessionState::Connecting;
        match connecting.await {
            Ok((tx, rx)) => {
                self.tx = Some(tx);
                self.rx = Some(rx);
                self.state = SessionState::Open;
                info!("Live session open");
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Error;
                Err(e)
            }
        }
    }

    /// Hand over the capture pipeline so `close()` can release the
    /// hardware in the required order.
    pub fn attach_capture(&mut self, capture: CapturePipeline) {
        self.capture = Some(capture);
    }

    /// Forward one encoded frame to the transport.
    ///
    /// The first send moves `Open → Streaming`. Frames produced while the
    /// session is not open are dropped, never buffered: stale audio must
    /// not play catch-up once the stream does open.
    pub async fn send_chunk(&mut self, chunk: EncodedChunk) -> Result<()> {
        match self.state {
            SessionState::Open | SessionState::Interrupted => {
                self.state = SessionState::Streaming;
            }
            SessionState::Streaming => {}
            _ => {
                debug!(state = %self.state, "Dropping outbound chunk outside open session");
                return Ok(());
            }
        }
        let Some(tx) = self.tx.as_mut() else {
            return Ok(());
        };
        if let Err(e) = tx.send_chunk(&chunk).await {
            warn!("Live send failed: {e}");
            self.state = SessionState::Error;
            return Err(e);
        }
        Ok(())
    }

    /// Dispatch one inbound event. Events arriving after close (or before
    /// open) are ignored.
    pub fn dispatch(&mut self, event: ServerEvent) -> Result<()> {
        match self.state {
            SessionState::Open
            | SessionState::Streaming
            | SessionState::Interrupted => {}
            _ => {
                debug!(state = %self.state, "Ignoring inbound event outside active session");
                return Ok(());
            }
        }

        // Any activity after a barge-in returns the session to streaming.
        if self.state == SessionState::Interrupted
            && !matches!(event, ServerEvent::Interrupted)
        {
            self.state = SessionState::Streaming;
        }

        match event {
            ServerEvent::Audio(chunk) => {
                if let Err(e) = self.player.enqueue(&chunk) {
                    warn!("Skipping undecodable audio chunk: {e}");
                }
            }
            ServerEvent::Transcript(fragment) => {
                self.transcript.push(&fragment, Instant::now());
                if self.risk.scan(self.transcript.current()) {
                    warn!("Emergency keyword detected in live transcript");
                }
            }
            ServerEvent::TurnComplete => {
                if let Some(utterance) = self.transcript.flush() {
                    self.push_observation(utterance);
                }
            }
            ServerEvent::Interrupted => {
                debug!("Remote barge-in: cancelling queued playback");
                self.player.cancel_all();
                self.interrupts += 1;
                if self.state == SessionState::Streaming {
                    self.state = SessionState::Interrupted;
                }
            }
            ServerEvent::Closed => {
                self.state = SessionState::Closed;
            }
            ServerEvent::Error(msg) => {
                self.state = SessionState::Error;
                return Err(Error::Transport(msg));
            }
        }
        Ok(())
    }

    /// Periodic housekeeping: pump the playback scheduler and flush the
    /// utterance buffer after a quiet period.
    pub fn poll(&mut self) {
        self.player.tick();
        if let Some(utterance) = self.transcript.flush_if_quiet(Instant::now()) {
            self.push_observation(utterance);
        }
    }

    /// Run the session until it closes or fails: multiplexes outbound
    /// frames, inbound events, and the housekeeping tick.
    pub async fn run(
        &mut self,
        frames: &mut mpsc::UnboundedReceiver<EncodedChunk>,
    ) -> Result<()> {
        let mut tick = tokio::time::interval(Duration::from_millis(100));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            if matches!(self.state, SessionState::Closed | SessionState::Error) {
                break;
            }
            let step = {
                let Some(rx) = self.rx.as_mut() else { break };
                tokio::select! {
                    frame = frames.recv() => Step::Frame(frame),
                    event = rx.next_event() => Step::Event(event),
                    _ = tick.tick() => Step::Tick,
                }
            };
            match step {
                Step::Frame(Some(chunk)) => self.send_chunk(chunk).await?,
                Step::Frame(None) => {
                    // Capture ended; nothing more to stream.
                    self.close().await;
                    break;
                }
                Step::Event(Some(event)) => self.dispatch(event)?,
                Step::Event(None) => {
                    info!("Live transport closed by remote");
                    self.state = SessionState::Closed;
                    break;
                }
                Step::Tick => self.poll(),
            }
        }
        Ok(())
    }

    /// Tear the session down: stop hardware capture, cancel pending
    /// playback, terminate the transport — in that order. Safe to call
    /// from any state and repeatedly.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closing;
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        self.player.cancel_all();
        if let Some(mut tx) = self.tx.take() {
            if let Err(e) = tx.close().await {
                debug!("Transport close failed (already gone?): {e}");
            }
        }
        self.rx = None;
        self.state = SessionState::Closed;
        info!("Live session closed");
    }

    fn push_observation(&mut self, utterance: String) {
        self.observations.push_front(utterance);
        self.observations.truncate(self.max_observations);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the emergency alert has been raised this session.
    pub fn risk_alert(&self) -> bool {
        self.risk.is_raised()
    }

    pub fn clear_risk_alert(&mut self) {
        self.risk.clear();
    }

    /// Most recent completed utterances, newest first.
    pub fn observations(&self) -> impl Iterator<Item = &str> {
        self.observations.iter().map(String::as_str)
    }

    /// The utterance currently accumulating.
    pub fn current_utterance(&self) -> &str {
        self.transcript.current()
    }

    pub fn interrupt_count(&self) -> u32 {
        self.interrupts
    }
}
