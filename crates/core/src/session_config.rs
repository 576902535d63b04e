//! Realtime Session Configuration
//!
//! Everything the voice agent is told when its session opens: who it is, how
//! it sounds, which audio encoding the call uses, and which tools it may call.
//! Deployments differ by [`SessionProfile`]; the values themselves are built
//! per call by [`SessionConfigBuilder`].

use crate::{
    call::CallIdentity,
    call_control::CallControl,
    tools::{ToolKind, ToolSchema},
};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, sync::Arc};
use tracing::{info, warn};

pub const DEFAULT_VOICE: &str = "shimmer";
pub const DEFAULT_TEMPERATURE: f32 = 0.8;

const ASSISTANT_INSTRUCTIONS: &str = "You have the personality of Marvin the paranoid robot from \
The Hitchhiker's Guide to the Galaxy. You are answering a phone call. Help the caller with \
whatever they ask, however beneath you it may be, and keep your answers short enough to be \
spoken aloud. When you need current information, use the search tool.";

const SCREENING_INSTRUCTIONS: &str = "You screen incoming phone calls for the person you work \
for. Greet the caller, find out who they are and why they are calling. If the call is urgent \
or the caller asks for a person, use the transfer_call tool. Otherwise take a short message \
and let them know it will be passed on. Use the search tool when you need to look something \
up. Keep your answers short enough to be spoken aloud.";

/// Audio encodings understood by the realtime service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Pcm16,
    G711Ulaw,
    G711Alaw,
}

/// How the realtime service decides the caller has finished a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnDetection {
    /// Voice activity detection on the service side.
    ServerVad,
    Disabled,
}

/// The configuration sent once at the start of each realtime session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub voice: String,
    pub instructions: String,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    pub turn_detection: TurnDetection,
    pub temperature: f32,
    pub modalities: Vec<String>,
    pub tools: Vec<ToolSchema>,
}

/// A deployment variant of the voice agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionProfile {
    /// A general assistant that can search the web.
    Assistant,
    /// A call screener that knows the caller's number and can transfer the call.
    Screening,
}

impl SessionProfile {
    pub fn tools(self) -> &'static [ToolKind] {
        match self {
            SessionProfile::Assistant => &[ToolKind::Search],
            SessionProfile::Screening => &[ToolKind::Search, ToolKind::TransferCall],
        }
    }

    pub fn default_instructions(self) -> &'static str {
        match self {
            SessionProfile::Assistant => ASSISTANT_INSTRUCTIONS,
            SessionProfile::Screening => SCREENING_INSTRUCTIONS,
        }
    }

    /// Whether the caller's number is looked up and given to the agent.
    pub fn enriches_caller(self) -> bool {
        matches!(self, SessionProfile::Screening)
    }
}

impl FromStr for SessionProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "assistant" => Ok(SessionProfile::Assistant),
            "screening" => Ok(SessionProfile::Screening),
            other => Err(format!("unknown session profile '{other}'")),
        }
    }
}

/// Builds per-call [`SessionConfig`] values from deployment settings.
pub struct SessionConfigBuilder {
    profile: SessionProfile,
    voice: String,
    instructions: String,
    temperature: f32,
    call_control: Option<Arc<dyn CallControl>>,
}

impl SessionConfigBuilder {
    /// Starts from the profile's defaults: `shimmer` voice, its own
    /// instructions, and a temperature of 0.8.
    pub fn new(profile: SessionProfile) -> Self {
        Self {
            profile,
            voice: DEFAULT_VOICE.to_string(),
            instructions: profile.default_instructions().to_string(),
            temperature: DEFAULT_TEMPERATURE,
            call_control: None,
        }
    }

    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Provider used to look up the caller's number for enriching profiles.
    pub fn call_control(mut self, call_control: Arc<dyn CallControl>) -> Self {
        self.call_control = Some(call_control);
        self
    }

    pub fn profile(&self) -> SessionProfile {
        self.profile
    }

    /// Looks up the caller's number when the profile asks for it.
    ///
    /// Every failure is logged and yields `None`; the session proceeds with
    /// an unenriched configuration.
    pub async fn resolve_caller_number(&self, identity: &CallIdentity) -> Option<String> {
        if !self.profile.enriches_caller() {
            return None;
        }
        let Some(call_control) = &self.call_control else {
            warn!("Caller lookup requested but no call control provider is configured");
            return None;
        };
        let Some(call_id) = identity.call_id() else {
            warn!("Caller lookup skipped: stream started without a call id");
            return None;
        };

        match call_control.lookup_caller_number(call_id).await {
            Ok(number) => {
                info!(%call_id, caller_number = %number, "Resolved caller number");
                Some(number)
            }
            Err(e) => {
                warn!(%call_id, error = %e, "Caller lookup failed; continuing without it");
                None
            }
        }
    }

    /// Produces the configuration for `identity`'s call.
    pub fn build(&self, identity: &CallIdentity) -> SessionConfig {
        let instructions = match &identity.caller_number {
            Some(number) => format!(
                "{}\n\nThe caller's phone number is {number}.",
                self.instructions
            ),
            None => self.instructions.clone(),
        };

        SessionConfig {
            voice: self.voice.clone(),
            instructions,
            input_audio_format: AudioFormat::G711Ulaw,
            output_audio_format: AudioFormat::G711Ulaw,
            turn_detection: TurnDetection::ServerVad,
            temperature: self.temperature,
            modalities: vec!["text".to_string(), "audio".to_string()],
            tools: self.profile.tools().iter().map(|tool| tool.schema()).collect(),
        }
    }
}
