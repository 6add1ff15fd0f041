//! Error taxonomy for the screening core.
//!
//! Per-frame problems (a bad base64 chunk, one undecodable audio payload)
//! are logged and skipped by their call sites and never reach this type.
//! Everything request- or session-level funnels into [`Error`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Media hardware access was refused or is unavailable. Fatal to the
    /// capture feature; callers surface it and do not retry.
    #[error("media permission denied: {0}")]
    PermissionDenied(String),

    /// Network or streaming failure. The live session moves to
    /// `SessionState::Error` when this surfaces from the transport.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The model reply could not be decoded. Terminal for that single
    /// invocation; no partial result is synthesized.
    #[error("unparseable model response: {0}")]
    Parse(String),

    /// The inference service rate-limited us. Recorded with a cooldown
    /// timestamp so background work stays quiet for a while.
    #[error("inference quota exceeded")]
    QuotaExceeded,

    /// A caller-supplied instruction override caused the failure. The
    /// assembler retries once with the default instruction before
    /// surfacing this.
    #[error("override configuration rejected: {0}")]
    RecoverableConfig(String),

    /// Local persistence failure.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Classify a failed inference-service reply.
    ///
    /// 429s (and the service's RESOURCE_EXHAUSTED marker, which sometimes
    /// arrives on a 400) become [`Error::QuotaExceeded`]; everything else
    /// is a transport failure carrying the status and body.
    pub(crate) fn from_api_failure(status: u16, body: &str) -> Self {
        if status == 429 || body.contains("RESOURCE_EXHAUSTED") {
            Error::QuotaExceeded
        } else {
            Error::Transport(format!("inference API error {status}: {body}"))
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}
