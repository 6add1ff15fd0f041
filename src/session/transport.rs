//! Websocket transport for the live inference endpoint.
//!
//! Speaks the bidirectional JSON protocol: a setup message on connect,
//! `realtimeInput` media chunks outbound, `serverContent` messages inbound.
//! One server message may carry several events (audio, transcription, turn
//! markers); they are queued and handed out one at a time.

use std::collections::VecDeque;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{LiveReceiver, LiveSender, ServerEvent, LIVE_SYSTEM_INSTRUCTION, URGENT_SUFFIX};
use crate::audio::pcm::{EncodedChunk, PLAYBACK_MIME};
use crate::error::{Error, Result};

/// Default live endpoint.
pub const DEFAULT_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default native-audio model.
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Live connection parameters.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub instruction: String,
    /// Append the urgent-mode directive (set when a previous session
    /// already raised the emergency alert).
    pub urgent: bool,
}

impl LiveConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_LIVE_ENDPOINT.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_LIVE_MODEL.to_string(),
            voice: "Kore".to_string(),
            instruction: LIVE_SYSTEM_INSTRUCTION.to_string(),
            urgent: false,
        }
    }

    /// The effective system instruction for this session.
    pub fn system_instruction(&self) -> String {
        if self.urgent {
            format!("{}{}", self.instruction, URGENT_SUFFIX)
        } else {
            self.instruction.clone()
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound half of the websocket.
pub struct WsSender {
    sink: SplitSink<WsStream, Message>,
}

/// Inbound half of the websocket.
pub struct WsReceiver {
    stream: SplitStream<WsStream>,
    pending: VecDeque<ServerEvent>,
}

/// Connect, perform the setup handshake, and split into halves for the
/// session's send/receive paths.
pub async fn connect(config: &LiveConfig) -> Result<(WsSender, WsReceiver)> {
    let mut request = config.endpoint.as_str().into_client_request()?;
    request.headers_mut().insert(
        "x-goog-api-key",
        http::HeaderValue::from_str(&config.api_key)
            .map_err(|e| Error::Transport(format!("invalid API key header: {e}")))?,
    );

    let (ws, _response) = connect_async(request).await?;
    let (mut sink, mut stream) = ws.split();

    let setup = json!({
        "setup": {
            "model": format!("models/{}", config.model),
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": config.voice } }
                }
            },
            "systemInstruction": { "parts": [{ "text": config.system_instruction() }] },
            "outputAudioTranscription": {}
        }
    });
    sink.send(Message::Text(setup.to_string())).await?;

    // Wait for the setup acknowledgement before letting audio flow.
    loop {
        match stream.next().await {
            None => return Err(Error::Transport("stream closed during setup".into())),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(msg)) => {
                let text = message_text(&msg);
                if let Some(text) = text {
                    let value: serde_json::Value = serde_json::from_str(&text)
                        .map_err(|e| Error::Transport(format!("bad setup reply: {e}")))?;
                    if value.get("setupComplete").is_some() {
                        info!(model = %config.model, "Live endpoint ready");
                        break;
                    }
                }
            }
        }
    }

    Ok((
        WsSender { sink },
        WsReceiver {
            stream,
            pending: VecDeque::new(),
        },
    ))
}

impl LiveSender for WsSender {
    async fn send_chunk(&mut self, chunk: &EncodedChunk) -> Result<()> {
        let msg = json!({
            "realtimeInput": {
                "mediaChunks": [{ "mimeType": chunk.mime_type, "data": chunk.data }]
            }
        });
        self.sink.send(Message::Text(msg.to_string())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.send(Message::Close(None)).await?;
        Ok(())
    }
}

impl LiveReceiver for WsReceiver {
    async fn next_event(&mut self) -> Option<ServerEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            match self.stream.next().await {
                None => return None,
                Some(Err(e)) => return Some(ServerEvent::Error(e.to_string())),
                Some(Ok(Message::Close(_))) => return Some(ServerEvent::Closed),
                Some(Ok(msg)) => {
                    if let Some(text) = message_text(&msg) {
                        self.pending.extend(parse_server_message(&text));
                    }
                }
            }
        }
    }
}

/// Text payload of a websocket message, if it has one. The endpoint sends
/// JSON either as text or as binary frames.
fn message_text(msg: &Message) -> Option<String> {
    match msg {
        Message::Text(text) => Some(text.clone()),
        Message::Binary(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

/// Decode one `serverContent` message into its events, in the order the
/// session should see them. A malformed message is logged and skipped.
fn parse_server_message(text: &str) -> Vec<ServerEvent> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!("Skipping unparseable server message: {e}");
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    let content = &value["serverContent"];
    if content.is_null() {
        debug!("Server message without content");
        return events;
    }

    if let Some(parts) = content["modelTurn"]["parts"].as_array() {
        for part in parts {
            if let Some(data) = part["inlineData"]["data"].as_str() {
                let mime = part["inlineData"]["mimeType"]
                    .as_str()
                    .unwrap_or(PLAYBACK_MIME);
                events.push(ServerEvent::Audio(EncodedChunk {
                    mime_type: mime.to_string(),
                    data: data.to_string(),
                }));
            }
        }
    }

    if content["interrupted"].as_bool() == Some(true) {
        events.push(ServerEvent::Interrupted);
    }

    if let Some(fragment) = content["outputTranscription"]["text"].as_str() {
        if !fragment.is_empty() {
            events.push(ServerEvent::Transcript(fragment.to_string()));
        }
    }

    if content["turnComplete"].as_bool() == Some(true) {
        events.push(ServerEvent::TurnComplete);
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_and_transcription_split_into_ordered_events() {
        let msg = r#"{
            "serverContent": {
                "modelTurn": { "parts": [
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAAA" } }
                ]},
                "outputTranscription": { "text": "Hold steady." },
                "turnComplete": true
            }
        }"#;
        let events = parse_server_message(msg);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], ServerEvent::Audio(_)));
        assert_eq!(events[1], ServerEvent::Transcript("Hold steady.".into()));
        assert_eq!(events[2], ServerEvent::TurnComplete);
    }

    #[test]
    fn interruption_flag_becomes_an_event() {
        let msg = r#"{ "serverContent": { "interrupted": true } }"#;
        assert_eq!(parse_server_message(msg), vec![ServerEvent::Interrupted]);
    }

    #[test]
    fn malformed_message_is_skipped() {
        assert!(parse_server_message("not json at all").is_empty());
        assert!(parse_server_message(r#"{"unrelated": 1}"#).is_empty());
    }

    #[test]
    fn urgent_mode_appends_suffix() {
        let mut cfg = LiveConfig::new("k");
        assert!(!cfg.system_instruction().contains("URGENT"));
        cfg.urgent = true;
        assert!(cfg.system_instruction().ends_with(URGENT_SUFFIX));
    }
}
