//! Live session lifecycle tests against a mock transport.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use phenograph_core::audio::pcm::{self, EncodedChunk};
use phenograph_core::audio::playback::{AudioClock, AudioSink, PlaybackItem, PlaybackScheduler};
use phenograph_core::session::{
    LiveReceiver, LiveSender, LiveSession, ServerEvent, SessionOptions, SessionState,
};
use phenograph_core::Result;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct ManualClock(Arc<AtomicU64>);

impl AudioClock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.0.load(Ordering::SeqCst))
    }
}

#[derive(Clone, Default)]
struct CountingSink {
    played: Arc<AtomicU64>,
    stopped: Arc<AtomicU64>,
}

impl AudioSink for CountingSink {
    fn play(&mut self, _item: PlaybackItem, _at: Duration) {
        self.played.fetch_add(1, Ordering::SeqCst);
    }
    fn stop(&mut self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
struct MockSender {
    sent: Arc<Mutex<Vec<EncodedChunk>>>,
    closed: Arc<AtomicU64>,
}

impl LiveSender for MockSender {
    async fn send_chunk(&mut self, chunk: &EncodedChunk) -> Result<()> {
        self.sent.lock().unwrap().push(chunk.clone());
        Ok(())
    }
    async fn close(&mut self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockReceiver {
    events: VecDeque<ServerEvent>,
}

impl LiveReceiver for MockReceiver {
    async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.pop_front()
    }
}

fn scheduler(sink: CountingSink) -> PlaybackScheduler {
    PlaybackScheduler::new(ManualClock::default(), sink)
}

fn session_with(
    sink: CountingSink,
) -> LiveSession<MockSender, MockReceiver> {
    LiveSession::new(scheduler(sink), SessionOptions::default())
}

async fn open_session(
    sink: CountingSink,
    sender: MockSender,
) -> LiveSession<MockSender, MockReceiver> {
    let mut session = session_with(sink);
    let receiver = MockReceiver {
        events: VecDeque::new(),
    };
    session
        .connect(async { Ok((sender, receiver)) })
        .await
        .unwrap();
    session
}

fn audio_chunk() -> EncodedChunk {
    pcm::encode_frame(&vec![0.2f32; 2400])
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn close_is_idempotent_from_every_state() {
    init_tracing();
    // Idle
    let mut session = session_with(CountingSink::default());
    assert_eq!(session.state(), SessionState::Idle);
    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);
    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);

    // Open
    let sender = MockSender::default();
    let mut session = open_session(CountingSink::default(), sender.clone()).await;
    assert_eq!(session.state(), SessionState::Open);
    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(sender.closed.load(Ordering::SeqCst), 1);
    session.close().await;
    assert_eq!(sender.closed.load(Ordering::SeqCst), 1);

    // Streaming
    let sender = MockSender::default();
    let mut session = open_session(CountingSink::default(), sender.clone()).await;
    session.send_chunk(audio_chunk()).await.unwrap();
    assert_eq!(session.state(), SessionState::Streaming);
    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);

    // Error
    let mut session = open_session(CountingSink::default(), MockSender::default()).await;
    assert!(session
        .dispatch(ServerEvent::Error("socket reset".into()))
        .is_err());
    assert_eq!(session.state(), SessionState::Error);
    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn no_events_are_dispatched_after_close() {
    let mut session = open_session(CountingSink::default(), MockSender::default()).await;
    session.close().await;

    session
        .dispatch(ServerEvent::Transcript("patient having a seizure".into()))
        .unwrap();
    session.dispatch(ServerEvent::TurnComplete).unwrap();

    assert_eq!(session.current_utterance(), "");
    assert_eq!(session.observations().count(), 0);
    assert!(!session.risk_alert());
}

#[tokio::test]
async fn connecting_twice_is_a_precondition_violation() {
    let mut session = open_session(CountingSink::default(), MockSender::default()).await;
    let err = session
        .connect(async {
            Ok((
                MockSender::default(),
                MockReceiver {
                    events: VecDeque::new(),
                },
            ))
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("close the active session"));
}

// ---------------------------------------------------------------------------
// Outbound gating
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chunks_outside_an_open_session_are_dropped_not_buffered() {
    let sender = MockSender::default();
    let mut session = session_with(CountingSink::default());

    // Idle: dropped silently.
    session.send_chunk(audio_chunk()).await.unwrap();

    let receiver = MockReceiver {
        events: VecDeque::new(),
    };
    session
        .connect(async { Ok((sender.clone(), receiver)) })
        .await
        .unwrap();

    // Nothing buffered from before the connection.
    assert!(sender.sent.lock().unwrap().is_empty());

    // First send transitions Open -> Streaming and goes out.
    session.send_chunk(audio_chunk()).await.unwrap();
    assert_eq!(session.state(), SessionState::Streaming);
    assert_eq!(sender.sent.lock().unwrap().len(), 1);

    // After close: dropped again.
    session.close().await;
    session.send_chunk(audio_chunk()).await.unwrap();
    assert_eq!(sender.sent.lock().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Inbound dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn barge_in_cancels_queued_playback_and_streaming_resumes() {
    let sink = CountingSink::default();
    let stopped = sink.stopped.clone();
    let mut session = open_session(sink, MockSender::default()).await;
    session.send_chunk(audio_chunk()).await.unwrap();

    session.dispatch(ServerEvent::Audio(audio_chunk())).unwrap();
    session.dispatch(ServerEvent::Audio(audio_chunk())).unwrap();

    session.dispatch(ServerEvent::Interrupted).unwrap();
    assert_eq!(session.state(), SessionState::Interrupted);
    assert_eq!(session.interrupt_count(), 1);
    assert_eq!(stopped.load(Ordering::SeqCst), 1);

    // Any further activity returns the session to streaming.
    session.dispatch(ServerEvent::Audio(audio_chunk())).unwrap();
    assert_eq!(session.state(), SessionState::Streaming);
}

#[tokio::test]
async fn undecodable_audio_is_skipped_not_fatal() {
    let mut session = open_session(CountingSink::default(), MockSender::default()).await;
    session
        .dispatch(ServerEvent::Audio(EncodedChunk {
            mime_type: "audio/pcm;rate=24000".into(),
            data: "@@@".into(),
        }))
        .unwrap();
    assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn risk_alert_raises_exactly_once_across_fragments() {
    let mut session = open_session(CountingSink::default(), MockSender::default()).await;

    session
        .dispatch(ServerEvent::Transcript("I think this is a sei".into()))
        .unwrap();
    assert!(!session.risk_alert());

    // The keyword straddles two fragments before any turn boundary.
    session
        .dispatch(ServerEvent::Transcript("zure, call for help".into()))
        .unwrap();
    assert!(session.risk_alert());

    // Repeating the keyword in later fragments does not re-raise.
    session
        .dispatch(ServerEvent::Transcript(" the seizure continues".into()))
        .unwrap();
    assert!(session.risk_alert());

    session.clear_risk_alert();
    assert!(!session.risk_alert());
}

#[tokio::test]
async fn turn_complete_folds_fragments_into_observations_newest_first() {
    let mut session = open_session(CountingSink::default(), MockSender::default()).await;

    for i in 0..7 {
        session
            .dispatch(ServerEvent::Transcript(format!("observation {i}, ")))
            .unwrap();
        session
            .dispatch(ServerEvent::Transcript("capture looks good.".into()))
            .unwrap();
        session.dispatch(ServerEvent::TurnComplete).unwrap();
    }

    let observations: Vec<&str> = session.observations().collect();
    assert_eq!(observations.len(), 5);
    assert_eq!(observations[0], "observation 6, capture looks good.");
    assert_eq!(session.current_utterance(), "");
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_drains_inbound_events_until_remote_close() {
    let sender = MockSender::default();
    let mut session = session_with(CountingSink::default());
    let receiver = MockReceiver {
        events: VecDeque::from(vec![
            ServerEvent::Transcript("Hold the camera steady.".into()),
            ServerEvent::TurnComplete,
            ServerEvent::Closed,
        ]),
    };
    session
        .connect(async { Ok((sender, receiver)) })
        .await
        .unwrap();

    let (_tx, mut frames) = tokio::sync::mpsc::unbounded_channel();
    session.run(&mut frames).await.unwrap();

    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(
        session.observations().next(),
        Some("Hold the camera steady.")
    );
}
