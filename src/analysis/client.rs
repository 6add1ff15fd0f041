//! HTTP client for the one-shot inference endpoint.

use serde_json::json;
use tracing::{debug, info};

use super::{AnalysisPayload, Part};
use crate::error::{Error, Result};
use crate::analysis::types::WebSource;

/// Default analysis model.
pub const DEFAULT_MODEL: &str = "gemini-3-pro-preview";

/// Default REST endpoint base.
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Sampling temperature for clinical analysis; kept low and fixed.
const TEMPERATURE: f64 = 0.2;

/// Raw reply: concatenated text plus any grounding sources, before JSON
/// extraction.
#[derive(Debug, Clone)]
pub struct RawReply {
    pub text: String,
    pub sources: Vec<WebSource>,
}

/// Inference service client.
pub struct InferenceClient {
    endpoint: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl InferenceClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point at a different endpoint/model (self-hosted proxies, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self.model = model.into();
        self
    }

    /// Issue a multipart generate call: one text part plus inline binary
    /// parts, web-grounding enabled. Returns the raw reply text and its
    /// deduplicated-at-source grounding chunks.
    pub async fn generate(&self, payload: &AnalysisPayload) -> Result<RawReply> {
        let parts: Vec<serde_json::Value> = payload
            .parts
            .iter()
            .map(|p| match p {
                Part::Text(text) => json!({ "text": text }),
                Part::Inline { mime_type, data } => json!({
                    "inlineData": { "mimeType": mime_type, "data": data }
                }),
            })
            .collect();

        let body = json!({
            "contents": [{ "parts": parts }],
            "systemInstruction": { "parts": [{ "text": payload.instruction }] },
            "generationConfig": { "temperature": TEMPERATURE },
            "tools": [{ "googleSearch": {} }]
        });

        debug!(parts = payload.parts.len(), model = %self.model, "Issuing analysis request");
        let value = self.post(&body).await?;

        let candidate = &value["candidates"][0];
        let mut text = String::new();
        if let Some(parts) = candidate["content"]["parts"].as_array() {
            for part in parts {
                if let Some(t) = part["text"].as_str() {
                    text.push_str(t);
                }
            }
        }
        if text.is_empty() {
            return Err(Error::Parse("no response received".into()));
        }

        let mut sources = Vec::new();
        if let Some(chunks) = candidate["groundingMetadata"]["groundingChunks"].as_array() {
            for chunk in chunks {
                if let Some(uri) = chunk["web"]["uri"].as_str() {
                    sources.push(WebSource {
                        title: chunk["web"]["title"]
                            .as_str()
                            .unwrap_or("Web Source")
                            .to_string(),
                        uri: uri.to_string(),
                    });
                }
            }
        }

        info!(
            reply_len = text.len(),
            sources = sources.len(),
            "Analysis reply received"
        );
        Ok(RawReply { text, sources })
    }

    /// Plain text-in/text-out call (report chat, help desk, self-training).
    /// `grounded` enables the web-search tool.
    pub async fn generate_text(&self, prompt: &str, grounded: bool) -> Result<String> {
        let mut body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
        });
        if grounded {
            body["tools"] = json!([{ "googleSearch": {} }]);
        }

        let value = self.post(&body).await?;
        let mut text = String::new();
        if let Some(parts) = value["candidates"][0]["content"]["parts"].as_array() {
            for part in parts {
                if let Some(t) = part["text"].as_str() {
                    text.push_str(t);
                }
            }
        }
        Ok(text)
    }

    async fn post(&self, body: &serde_json::Value) -> Result<serde_json::Value> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.endpoint, self.model
        );
        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::from_api_failure(status, &body));
        }

        Ok(resp.json().await?)
    }
}
