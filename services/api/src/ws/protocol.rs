//! Defines the JSON frame protocol spoken by the telephony edge on the media stream.
//!
//! Inbound frames carry an `event` discriminator (`connected`, `start`,
//! `media`, `mark`, `stop`, ...). Only `start`, `media` and `stop` drive the
//! bridge; everything else is surfaced as [`TelephonyEvent::Other`].

use serde::{Deserialize, Serialize};

/// A malformed frame from either side of the bridge.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("'{event}' frame is missing '{field}'")]
    MissingField { event: String, field: &'static str },
}

/// Events received from the telephony edge, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelephonyEvent {
    /// The media stream for a call has started.
    Start {
        stream_id: String,
        call_id: Option<String>,
    },
    /// One chunk of caller audio (base64 ulaw, passed through untouched).
    Media { payload: String },
    /// The edge has stopped streaming.
    Stop,
    /// Any other frame, by its `event` tag.
    Other(String),
    /// The connection is gone. Always the last event.
    Closed,
}

#[derive(Deserialize)]
struct InboundEnvelope {
    event: String,
    start: Option<StartMetadata>,
    media: Option<MediaPayload>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartMetadata {
    stream_sid: String,
    call_sid: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaPayload {
    pub payload: String,
}

/// Parses one text frame from the telephony edge.
pub fn parse_frame(text: &str) -> Result<TelephonyEvent, ProtocolError> {
    let envelope: InboundEnvelope = serde_json::from_str(text)?;
    let missing = |field| ProtocolError::MissingField {
        event: envelope.event.clone(),
        field,
    };

    let event = match envelope.event.as_str() {
        "start" => {
            let start = envelope.start.ok_or_else(|| missing("start"))?;
            TelephonyEvent::Start {
                stream_id: start.stream_sid,
                call_id: start.call_sid,
            }
        }
        "media" => {
            let media = envelope.media.ok_or_else(|| missing("media"))?;
            TelephonyEvent::Media {
                payload: media.payload,
            }
        }
        "stop" => TelephonyEvent::Stop,
        _ => TelephonyEvent::Other(envelope.event.clone()),
    };
    Ok(event)
}

/// Frames sent to the telephony edge.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundFrame {
    /// Audio to play to the caller.
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    /// Discard any audio queued for playback.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn parses_start_frame() {
        let frame = r#"{"event":"start","sequenceNumber":"1","start":{"streamSid":"S1","callSid":"C1","accountSid":"AC1","tracks":["inbound"]},"streamSid":"S1"}"#;
        assert_eq!(
            parse_frame(frame).unwrap(),
            TelephonyEvent::Start {
                stream_id: "S1".into(),
                call_id: Some("C1".into())
            }
        );
    }

    #[test]
    fn parses_media_frame_without_touching_payload() {
        let frame = r#"{"event":"media","streamSid":"S1","media":{"track":"inbound","chunk":"2","timestamp":"5","payload":"AAAA/+8="}}"#;
        assert_eq!(
            parse_frame(frame).unwrap(),
            TelephonyEvent::Media {
                payload: "AAAA/+8=".into()
            }
        );
    }

    #[test]
    fn unknown_events_pass_through_by_tag() {
        assert_eq!(parse_frame(r#"{"event":"stop"}"#).unwrap(), TelephonyEvent::Stop);
        assert_eq!(
            parse_frame(r#"{"event":"mark","mark":{"name":"x"}}"#).unwrap(),
            TelephonyEvent::Other("mark".into())
        );
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(parse_frame("not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(
            parse_frame(r#"{"event":"media"}"#),
            Err(ProtocolError::MissingField { field: "media", .. })
        ));
        assert!(matches!(parse_frame(r#"{"streamSid":"S1"}"#), Err(ProtocolError::Json(_))));
    }

    #[test]
    fn serializes_outbound_frames() {
        let media = OutboundFrame::Media {
            stream_sid: "S1".into(),
            media: MediaPayload {
                payload: "BBBB".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(&media).unwrap(),
            json!({"event": "media", "streamSid": "S1", "media": {"payload": "BBBB"}})
        );

        let clear: Value = serde_json::to_value(OutboundFrame::Clear {
            stream_sid: "S1".into(),
        })
        .unwrap();
        assert_eq!(clear, json!({"event": "clear", "streamSid": "S1"}));
    }
}
