//! PhenoGraph core — clinical screening orchestration library.
//!
//! The thin layer between a patient-facing UI and a generative inference
//! service:
//!
//! - assembles multipart analysis requests (structured fields + inline
//!   attachments), parses and repairs the JSON reply, and merges extracted
//!   fields back for refinement ([`analysis`]);
//! - runs the live audio/video co-pilot session: capture, PCM transport
//!   encoding, gapless playback of synthesized speech, barge-in handling,
//!   transcript folding, and emergency-keyword alerting ([`session`],
//!   [`audio`]);
//! - persists a capped analysis history and the self-training knowledge
//!   state in the local data directory ([`store`]).
//!
//! The UI, the inference service, and the platform media stack are all
//! collaborators behind seams (`LiveSender`/`LiveReceiver`, `FrameSource`,
//! `InferenceClient`); this crate owns the orchestration only.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod session;
pub mod store;

pub use config::{ReasoningDepth, Settings, SettingsUpdate};
pub use error::{Error, Result};
