//! The telephony side of a bridge: the media-stream WebSocket accepted from the edge.

use super::protocol::{self, MediaPayload, OutboundFrame, TelephonyEvent};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, warn};

const CHANNEL_CAPACITY: usize = 256;

/// Commands accepted by the telephony writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelephonyCommand {
    Media { stream_id: String, payload: String },
    Clear { stream_id: String },
    Close,
}

/// Handle for sending to the telephony edge.
///
/// Sends never fail loudly: once the writer is gone the command is logged and
/// dropped.
#[derive(Clone)]
pub struct TelephonyChannel {
    tx: mpsc::Sender<TelephonyCommand>,
}

impl TelephonyChannel {
    pub fn from_sender(tx: mpsc::Sender<TelephonyCommand>) -> Self {
        Self { tx }
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    pub async fn send_media(&self, stream_id: &str, payload: String) {
        self.send(TelephonyCommand::Media {
            stream_id: stream_id.to_string(),
            payload,
        })
        .await;
    }

    /// Tells the edge to drop audio it has buffered but not yet played.
    pub async fn send_clear(&self, stream_id: &str) {
        self.send(TelephonyCommand::Clear {
            stream_id: stream_id.to_string(),
        })
        .await;
    }

    pub async fn close(&self) {
        self.send(TelephonyCommand::Close).await;
    }

    async fn send(&self, command: TelephonyCommand) {
        if let Err(e) = self.tx.send(command).await {
            warn!(command = ?e.0, "Telephony channel unavailable; dropping command");
        }
    }
}

/// Splits an accepted media-stream socket into a command handle and an event stream.
///
/// A reader task parses inbound frames (dropping malformed ones) and always
/// finishes with [`TelephonyEvent::Closed`]. A writer task serializes
/// commands onto the socket until told to close or the socket fails.
pub fn split_socket(socket: WebSocket) -> (TelephonyChannel, mpsc::Receiver<TelephonyEvent>) {
    let (mut sink, mut stream) = socket.split();
    let (command_tx, mut command_rx) = mpsc::channel::<TelephonyCommand>(CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(
        async move {
            while let Some(message) = stream.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "Telephony socket read failed");
                        break;
                    }
                };
                match protocol::parse_frame(text.as_str()) {
                    Ok(event) => {
                        if event_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(error = %e, frame = %text.as_str(), "Dropping malformed telephony frame"),
                }
            }
            let _ = event_tx.send(TelephonyEvent::Closed).await;
        }
        .in_current_span(),
    );

    tokio::spawn(
        async move {
            while let Some(command) = command_rx.recv().await {
                let frame = match command {
                    TelephonyCommand::Media { stream_id, payload } => OutboundFrame::Media {
                        stream_sid: stream_id,
                        media: MediaPayload { payload },
                    },
                    TelephonyCommand::Clear { stream_id } => OutboundFrame::Clear {
                        stream_sid: stream_id,
                    },
                    TelephonyCommand::Close => {
                        debug!("Closing telephony socket");
                        let _ = sink.close().await;
                        break;
                    }
                };
                let serialized = match serde_json::to_string(&frame) {
                    Ok(serialized) => serialized,
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize telephony frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(serialized.into())).await {
                    warn!(error = %e, "Telephony socket write failed");
                    break;
                }
            }
        }
        .in_current_span(),
    );

    (TelephonyChannel::from_sender(command_tx), event_rx)
}
