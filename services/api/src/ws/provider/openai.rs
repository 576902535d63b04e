//! Handles the realtime WebSocket connection to OpenAI for a bridged call.

use super::{RealtimeChannel, RealtimeCommand, RealtimeConnector, RealtimeEvent};
use crate::ws::protocol::ProtocolError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{Instrument, debug, error, info, warn};

pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";

const CHANNEL_CAPACITY: usize = 256;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Inbound event types logged in full when no allow-list is configured.
pub const DEFAULT_LOG_EVENT_TYPES: &[&str] = &[
    "response.content.done",
    "rate_limits.updated",
    "response.done",
    "input_audio_buffer.committed",
    "input_audio_buffer.speech_stopped",
    "input_audio_buffer.speech_started",
    "session.created",
    "function_call",
    "response.output_item.done",
];

// --- Local OpenAI Realtime wire types ---
pub(crate) mod realtime_types {
    use callbridge_core::session_config::{AudioFormat, SessionConfig, TurnDetection};
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    #[derive(Serialize, Debug)]
    #[serde(tag = "type")]
    pub(crate) enum ClientEvent {
        #[serde(rename = "session.update")]
        SessionUpdate { session: SessionPayload },
        #[serde(rename = "input_audio_buffer.append")]
        InputAudioBufferAppend { audio: String },
        #[serde(rename = "conversation.item.create")]
        ConversationItemCreate { item: FunctionCallOutput },
        #[serde(rename = "response.create")]
        ResponseCreate,
        #[serde(rename = "response.cancel")]
        ResponseCancel,
    }

    #[derive(Serialize, Debug)]
    pub(crate) struct SessionPayload {
        pub turn_detection: Option<TurnDetectionPayload>,
        pub input_audio_format: AudioFormat,
        pub output_audio_format: AudioFormat,
        pub voice: String,
        pub instructions: String,
        pub modalities: Vec<String>,
        pub temperature: f32,
        pub tools: Vec<FunctionTool>,
    }

    #[derive(Serialize, Debug)]
    pub(crate) struct TurnDetectionPayload {
        #[serde(rename = "type")]
        pub kind: TurnDetection,
    }

    #[derive(Serialize, Debug)]
    pub(crate) struct FunctionTool {
        #[serde(rename = "type")]
        pub kind: &'static str,
        pub name: String,
        pub description: String,
        pub parameters: Value,
    }

    #[derive(Serialize, Debug)]
    pub(crate) struct FunctionCallOutput {
        #[serde(rename = "type")]
        pub kind: &'static str,
        pub call_id: String,
        pub output: String,
    }

    impl From<SessionConfig> for SessionPayload {
        fn from(config: SessionConfig) -> Self {
            Self {
                turn_detection: match config.turn_detection {
                    TurnDetection::Disabled => None,
                    kind => Some(TurnDetectionPayload { kind }),
                },
                input_audio_format: config.input_audio_format,
                output_audio_format: config.output_audio_format,
                voice: config.voice,
                instructions: config.instructions,
                modalities: config.modalities,
                temperature: config.temperature,
                tools: config
                    .tools
                    .into_iter()
                    .map(|tool| FunctionTool {
                        kind: "function",
                        name: tool.name,
                        description: tool.description,
                        parameters: tool.parameters,
                    })
                    .collect(),
            }
        }
    }

    #[derive(Deserialize, Debug)]
    pub(crate) struct ServerEnvelope {
        #[serde(rename = "type")]
        pub kind: String,
        pub delta: Option<String>,
        pub item: Option<OutputItem>,
    }

    #[derive(Deserialize, Debug)]
    pub(crate) struct OutputItem {
        #[serde(rename = "type")]
        pub kind: Option<String>,
        pub name: Option<String>,
        pub call_id: Option<String>,
        pub arguments: Option<String>,
    }
}

use realtime_types::{ClientEvent, FunctionCallOutput, ServerEnvelope};

impl ClientEvent {
    /// Maps a channel command to its wire event. `Close` has none.
    fn from_command(command: RealtimeCommand) -> Option<Self> {
        let event = match command {
            RealtimeCommand::Configure(config) => ClientEvent::SessionUpdate {
                session: config.into(),
            },
            RealtimeCommand::AppendAudio(audio) => ClientEvent::InputAudioBufferAppend { audio },
            RealtimeCommand::ToolResult {
                invocation_id,
                output,
            } => ClientEvent::ConversationItemCreate {
                item: FunctionCallOutput {
                    kind: "function_call_output",
                    call_id: invocation_id,
                    output,
                },
            },
            RealtimeCommand::Continue => ClientEvent::ResponseCreate,
            RealtimeCommand::CancelResponse => ClientEvent::ResponseCancel,
            RealtimeCommand::Close => return None,
        };
        Some(event)
    }
}

/// Parses one text frame from the realtime service.
pub(crate) fn parse_server_event(text: &str) -> Result<RealtimeEvent, ProtocolError> {
    let raw: Value = serde_json::from_str(text)?;
    let envelope = ServerEnvelope::deserialize(&raw)?;

    let event = match envelope.kind.as_str() {
        "response.audio.delta" => match envelope.delta.filter(|delta| !delta.is_empty()) {
            Some(delta) => RealtimeEvent::AudioDelta(delta),
            None => {
                return Err(ProtocolError::MissingField {
                    event: envelope.kind,
                    field: "delta",
                });
            }
        },
        "input_audio_buffer.speech_started" => RealtimeEvent::SpeechStarted,
        "input_audio_buffer.speech_stopped" => RealtimeEvent::SpeechStopped,
        "session.updated" => RealtimeEvent::SessionUpdated,
        "response.output_item.done" => match envelope.item {
            Some(item) if item.kind.as_deref() == Some("function_call") => {
                let (Some(call_id), Some(name)) = (item.call_id, item.name) else {
                    return Err(ProtocolError::MissingField {
                        event: envelope.kind,
                        field: "item.call_id",
                    });
                };
                RealtimeEvent::FunctionCallCompleted {
                    invocation_id: call_id,
                    name,
                    arguments: item.arguments.unwrap_or_else(|| "{}".to_string()),
                }
            }
            _ => RealtimeEvent::Other {
                tag: envelope.kind,
                raw,
            },
        },
        _ => RealtimeEvent::Other {
            tag: envelope.kind,
            raw,
        },
    };
    Ok(event)
}

/// Connects bridge sessions to the OpenAI Realtime API.
pub struct OpenAiConnector {
    url: String,
    model: String,
    api_key: SecretString,
    log_event_types: Arc<HashSet<String>>,
    connect_timeout: Duration,
}

impl OpenAiConnector {
    pub fn new(
        url: impl Into<String>,
        model: impl Into<String>,
        api_key: SecretString,
        log_event_types: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            url: url.into(),
            model: model.into(),
            api_key,
            log_event_types: Arc::new(log_event_types.into_iter().collect()),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Bounds the WebSocket handshake.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl RealtimeConnector for OpenAiConnector {
    async fn connect(&self) -> Result<(RealtimeChannel, mpsc::Receiver<RealtimeEvent>)> {
        let url = format!("{}?model={}", self.url, self.model);
        let mut request = url.into_client_request()?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", self.api_key.expose_secret()).parse()?,
        );
        request
            .headers_mut()
            .insert("OpenAI-Beta", "realtime=v1".parse()?);

        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .context("Timed out connecting to OpenAI Realtime WebSocket")?
            .context("Failed to connect to OpenAI Realtime WebSocket")?;
        let (mut openai_tx, mut openai_rx) = ws_stream.split();
        info!("Connected to the OpenAI Realtime API");

        let (command_tx, mut command_rx) = mpsc::channel::<RealtimeCommand>(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(
            async move {
                while let Some(command) = command_rx.recv().await {
                    let Some(event) = ClientEvent::from_command(command) else {
                        debug!("Closing OpenAI Realtime socket");
                        let _ = openai_tx.close().await;
                        break;
                    };
                    if let ClientEvent::SessionUpdate { session } = &event {
                        info!(voice = %session.voice, tools = session.tools.len(), "Sending session update");
                    }
                    let serialized = match serde_json::to_string(&event) {
                        Ok(serialized) => serialized,
                        Err(e) => {
                            warn!(error = %e, "Failed to serialize realtime event");
                            continue;
                        }
                    };
                    if let Err(e) = openai_tx.send(WsMessage::Text(serialized.into())).await {
                        warn!(error = %e, "OpenAI Realtime socket write failed");
                        break;
                    }
                }
            }
            .in_current_span(),
        );

        let log_event_types = self.log_event_types.clone();
        tokio::spawn(
            async move {
                while let Some(message) = openai_rx.next().await {
                    let text = match message {
                        Ok(WsMessage::Text(text)) => text,
                        Ok(WsMessage::Close(_)) => break,
                        Ok(_) => continue,
                        Err(e) => {
                            error!(error = %e, "Error in the OpenAI Realtime WebSocket");
                            break;
                        }
                    };
                    let event = match parse_server_event(text.as_str()) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(error = %e, raw = %text.as_str(), "Dropping malformed realtime event");
                            continue;
                        }
                    };
                    match &event {
                        RealtimeEvent::SessionUpdated => info!("Session updated successfully"),
                        RealtimeEvent::Other { tag, raw } if tag == "error" => {
                            error!(error = %raw, "Realtime service reported an error")
                        }
                        _ => {}
                    }
                    if let Some(tag) = event_type(&event) {
                        if log_event_types.contains(tag) {
                            info!(event_type = tag, raw = %text.as_str(), "Received realtime event");
                        }
                    }
                    if event_tx.send(event).await.is_err() {
                        return;
                    }
                }
                info!("Disconnected from the OpenAI Realtime API");
                let _ = event_tx.send(RealtimeEvent::Closed).await;
            }
            .in_current_span(),
        );

        Ok((RealtimeChannel::from_sender(command_tx), event_rx))
    }
}

/// The wire `type` of an inbound event, used for allow-list logging.
fn event_type(event: &RealtimeEvent) -> Option<&str> {
    Some(match event {
        RealtimeEvent::AudioDelta(_) => "response.audio.delta",
        RealtimeEvent::SpeechStarted => "input_audio_buffer.speech_started",
        RealtimeEvent::SpeechStopped => "input_audio_buffer.speech_stopped",
        RealtimeEvent::FunctionCallCompleted { .. } => "response.output_item.done",
        RealtimeEvent::SessionUpdated => "session.updated",
        RealtimeEvent::Other { tag, .. } => tag.as_str(),
        RealtimeEvent::Closed => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use callbridge_core::{
        call::CallIdentity,
        session_config::{SessionConfigBuilder, SessionProfile},
    };
    use serde_json::json;

    fn wire(command: RealtimeCommand) -> Value {
        serde_json::to_value(ClientEvent::from_command(command).unwrap()).unwrap()
    }

    #[test]
    fn session_update_matches_wire_shape() {
        let config = SessionConfigBuilder::new(SessionProfile::Assistant)
            .instructions("Be brief.")
            .build(&CallIdentity::new("S1", Some("C1".into())));

        let value = wire(RealtimeCommand::Configure(config));
        assert_eq!(value["type"], "session.update");
        let session = &value["session"];
        assert_eq!(session["turn_detection"], json!({"type": "server_vad"}));
        assert_eq!(session["input_audio_format"], "g711_ulaw");
        assert_eq!(session["output_audio_format"], "g711_ulaw");
        assert_eq!(session["voice"], "shimmer");
        assert_eq!(session["instructions"], "Be brief.");
        assert_eq!(session["modalities"], json!(["text", "audio"]));
        assert_eq!(session["tools"][0]["type"], "function");
        assert_eq!(session["tools"][0]["name"], "search");
        assert_eq!(session["tools"][0]["parameters"]["required"], json!(["query"]));
    }

    #[test]
    fn commands_serialize_to_client_events() {
        assert_eq!(
            wire(RealtimeCommand::AppendAudio("AAAA".into())),
            json!({"type": "input_audio_buffer.append", "audio": "AAAA"})
        );
        assert_eq!(
            wire(RealtimeCommand::ToolResult {
                invocation_id: "T1".into(),
                output: "[]".into()
            }),
            json!({
                "type": "conversation.item.create",
                "item": {"type": "function_call_output", "call_id": "T1", "output": "[]"}
            })
        );
        assert_eq!(wire(RealtimeCommand::Continue), json!({"type": "response.create"}));
        assert_eq!(wire(RealtimeCommand::CancelResponse), json!({"type": "response.cancel"}));
        assert!(ClientEvent::from_command(RealtimeCommand::Close).is_none());
    }

    #[test]
    fn parses_audio_and_speech_events() {
        assert_eq!(
            parse_server_event(r#"{"type":"response.audio.delta","response_id":"r","item_id":"i","output_index":0,"content_index":0,"delta":"BBBB"}"#).unwrap(),
            RealtimeEvent::AudioDelta("BBBB".into())
        );
        assert_eq!(
            parse_server_event(r#"{"type":"input_audio_buffer.speech_started","audio_start_ms":10,"item_id":"i"}"#).unwrap(),
            RealtimeEvent::SpeechStarted
        );
        assert_eq!(
            parse_server_event(r#"{"type":"session.updated","session":{}}"#).unwrap(),
            RealtimeEvent::SessionUpdated
        );
    }

    #[test]
    fn parses_completed_function_call() {
        let frame = json!({
            "type": "response.output_item.done",
            "item": {
                "type": "function_call",
                "name": "search",
                "call_id": "T1",
                "arguments": "{\"query\":\"sam pullara\"}"
            }
        })
        .to_string();

        assert_eq!(
            parse_server_event(&frame).unwrap(),
            RealtimeEvent::FunctionCallCompleted {
                invocation_id: "T1".into(),
                name: "search".into(),
                arguments: r#"{"query":"sam pullara"}"#.into(),
            }
        );
    }

    #[test]
    fn non_function_items_and_unknown_types_are_other() {
        let message_item = r#"{"type":"response.output_item.done","item":{"type":"message","role":"assistant"}}"#;
        assert!(matches!(
            parse_server_event(message_item).unwrap(),
            RealtimeEvent::Other { ref tag, .. } if tag == "response.output_item.done"
        ));

        let event = parse_server_event(r#"{"type":"rate_limits.updated","rate_limits":[]}"#).unwrap();
        match event {
            RealtimeEvent::Other { tag, raw } => {
                assert_eq!(tag, "rate_limits.updated");
                assert_eq!(raw["rate_limits"], json!([]));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn malformed_events_are_errors() {
        assert!(parse_server_event("{").is_err());
        assert!(parse_server_event(r#"{"delta":"x"}"#).is_err());
        assert!(matches!(
            parse_server_event(r#"{"type":"response.audio.delta"}"#),
            Err(ProtocolError::MissingField { field: "delta", .. })
        ));
        assert!(matches!(
            parse_server_event(r#"{"type":"response.audio.delta","delta":""}"#),
            Err(ProtocolError::MissingField { field: "delta", .. })
        ));
    }

    #[tokio::test]
    async fn silent_handshake_times_out() {
        // Accepts the TCP connection but never answers the upgrade.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connector = OpenAiConnector::new(
            format!("ws://{addr}/v1/realtime"),
            DEFAULT_REALTIME_MODEL,
            SecretString::from("test-key".to_string()),
            Vec::new(),
        )
        .with_connect_timeout(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let err = connector.connect().await.unwrap_err();
        assert!(format!("{err:#}").contains("Timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(listener);
    }
}
