//! Extraction and repair of the model's JSON reply.
//!
//! The model is told to return bare JSON, but replies regularly arrive
//! wrapped in prose or markdown code fences. Recovery: take the outermost
//! `{...}` region, strip any fence markers, then parse. Parse failure is
//! terminal for the invocation; nothing partial is synthesized.

use tracing::error;

use super::types::ScreeningReport;
use crate::error::{Error, Result};

/// Strip markdown code-fence markers and trim whitespace.
pub fn clean_json(text: &str) -> String {
    text.replace("```json", "").replace("```", "").trim().to_string()
}

/// The outermost `{...}` region of `text`: from the first `{` to the last
/// `}`. `None` when no braces are present.
pub fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Parse a raw model reply into a report.
pub fn parse_report(text: &str) -> Result<ScreeningReport> {
    let candidate = extract_object(text).unwrap_or(text);
    let cleaned = clean_json(candidate);
    serde_json::from_str(&cleaned).map_err(|e| {
        error!("Failed to parse model reply: {e}");
        Error::Parse(e.to_string())
    })
}
