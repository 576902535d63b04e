use serde::{Deserialize, Serialize};

/// Identifies the phone call a bridge session is serving.
///
/// Created when the telephony edge announces the start of its media stream.
/// The caller's number is not part of that announcement and is resolved later
/// from the telephony control plane, if at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallIdentity {
    /// The media stream identifier, required on every outbound audio frame.
    pub stream_id: String,
    /// The telephony provider's identifier for the call itself.
    pub call_id: Option<String>,
    /// The caller's phone number, once looked up.
    pub caller_number: Option<String>,
}

impl CallIdentity {
    /// Creates an identity for a freshly started stream.
    pub fn new(stream_id: impl Into<String>, call_id: Option<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            call_id: call_id.filter(|id| !id.is_empty()),
            caller_number: None,
        }
    }

    /// Returns the call id only when the telephony edge supplied one.
    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }
}
