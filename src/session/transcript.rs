//! Running utterance buffer for inbound transcript fragments.
//!
//! The live endpoint streams transcription in small fragments. Fragments
//! accumulate until either an explicit turn-complete signal arrives or the
//! stream goes quiet for the debounce window, whichever comes first; the
//! accumulated text then becomes one discrete utterance.

use std::time::{Duration, Instant};

/// Default quiet period before a running utterance is flushed.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(2500);

#[derive(Debug)]
pub struct TranscriptBuffer {
    buf: String,
    last_push: Option<Instant>,
    debounce: Duration,
}

impl TranscriptBuffer {
    pub fn new(debounce: Duration) -> Self {
        Self {
            buf: String::new(),
            last_push: None,
            debounce,
        }
    }

    /// Append a fragment in receipt order.
    pub fn push(&mut self, fragment: &str, now: Instant) {
        self.buf.push_str(fragment);
        self.last_push = Some(now);
    }

    /// Current accumulated text (the utterance in progress).
    pub fn current(&self) -> &str {
        &self.buf
    }

    /// Force a flush (turn-complete signal). Returns the utterance, or
    /// `None` when nothing has accumulated.
    pub fn flush(&mut self) -> Option<String> {
        self.last_push = None;
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }

    /// Flush only if the stream has been quiet for the debounce window.
    pub fn flush_if_quiet(&mut self, now: Instant) -> Option<String> {
        match self.last_push {
            Some(t) if now.duration_since(t) >= self.debounce => self.flush(),
            _ => None,
        }
    }
}

impl Default for TranscriptBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_complete_flushes_immediately() {
        let mut buf = TranscriptBuffer::default();
        let t0 = Instant::now();
        buf.push("Hold the camera ", t0);
        buf.push("steady.", t0);
        assert_eq!(buf.flush().as_deref(), Some("Hold the camera steady."));
        assert_eq!(buf.flush(), None);
        assert_eq!(buf.current(), "");
    }

    #[test]
    fn quiet_period_flushes_after_debounce_only() {
        let mut buf = TranscriptBuffer::new(Duration::from_millis(100));
        let t0 = Instant::now();
        buf.push("Move closer.", t0);

        assert_eq!(buf.flush_if_quiet(t0 + Duration::from_millis(50)), None);
        assert_eq!(
            buf.flush_if_quiet(t0 + Duration::from_millis(150)).as_deref(),
            Some("Move closer.")
        );
        // Nothing pending: the quiet check stays silent.
        assert_eq!(buf.flush_if_quiet(t0 + Duration::from_secs(10)), None);
    }

    #[test]
    fn new_fragment_restarts_the_quiet_window() {
        let mut buf = TranscriptBuffer::new(Duration::from_millis(100));
        let t0 = Instant::now();
        buf.push("Show me ", t0);
        buf.push("the hands.", t0 + Duration::from_millis(90));
        assert_eq!(buf.flush_if_quiet(t0 + Duration::from_millis(150)), None);
        assert_eq!(
            buf.flush_if_quiet(t0 + Duration::from_millis(200)).as_deref(),
            Some("Show me the hands.")
        );
    }
}
