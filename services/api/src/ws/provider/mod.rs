//! The realtime AI side of a bridge.
//!
//! A bridge session talks to the voice agent through a [`RealtimeChannel`]
//! (commands out) and a stream of [`RealtimeEvent`]s (events in), both
//! obtained from a [`RealtimeConnector`]. The OpenAI implementation lives in
//! [`openai`].

pub mod openai;

use anyhow::Result;
use async_trait::async_trait;
use callbridge_core::session_config::SessionConfig;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

/// Events received from the realtime service.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// A chunk of agent speech (base64, in the session's output format).
    AudioDelta(String),
    /// The service detected the caller starting to speak.
    SpeechStarted,
    SpeechStopped,
    /// The agent finished emitting a function call.
    FunctionCallCompleted {
        invocation_id: String,
        name: String,
        arguments: String,
    },
    /// The service accepted the session configuration.
    SessionUpdated,
    /// Any other event, by its `type` tag, with the raw frame.
    Other { tag: String, raw: Value },
    /// The connection is gone. Always the last event.
    Closed,
}

/// Commands accepted by the realtime writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeCommand {
    Configure(SessionConfig),
    AppendAudio(String),
    ToolResult { invocation_id: String, output: String },
    /// Ask the agent to produce its next response.
    Continue,
    /// Abort the response currently being generated.
    CancelResponse,
    Close,
}

/// Handle for sending to the realtime service.
///
/// As with the telephony side, a send after the connection is gone is logged
/// and dropped rather than surfaced as an error.
#[derive(Clone, Debug)]
pub struct RealtimeChannel {
    tx: mpsc::Sender<RealtimeCommand>,
}

impl RealtimeChannel {
    pub fn from_sender(tx: mpsc::Sender<RealtimeCommand>) -> Self {
        Self { tx }
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    pub async fn send_config(&self, config: SessionConfig) {
        self.send(RealtimeCommand::Configure(config)).await;
    }

    pub async fn send_audio_append(&self, payload: String) {
        self.send(RealtimeCommand::AppendAudio(payload)).await;
    }

    pub async fn send_tool_result(&self, invocation_id: String, output: String) {
        self.send(RealtimeCommand::ToolResult {
            invocation_id,
            output,
        })
        .await;
    }

    pub async fn send_continue(&self) {
        self.send(RealtimeCommand::Continue).await;
    }

    pub async fn cancel_response(&self) {
        self.send(RealtimeCommand::CancelResponse).await;
    }

    pub async fn close(&self) {
        self.send(RealtimeCommand::Close).await;
    }

    async fn send(&self, command: RealtimeCommand) {
        if let Err(e) = self.tx.send(command).await {
            warn!(command = ?e.0, "Realtime channel unavailable; dropping command");
        }
    }
}

/// Opens a connection to a realtime voice service.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    async fn connect(&self) -> Result<(RealtimeChannel, mpsc::Receiver<RealtimeEvent>)>;
}
