//! Error types shared by the tool layer and the providers behind it.

use std::time::Duration;

/// A failure talking to an external provider (web search, telephony control).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

/// Why a tool invocation did not produce a result.
///
/// Every variant is reported back to the voice agent as a function-call
/// output; none of them ends the call.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    NotFound(String),
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("provider failure: {0}")]
    ProviderFailure(#[from] ProviderError),
    #[error("tool did not finish within {0:?}")]
    TimedOut(Duration),
}
