//! Axum Handlers for the HTTP Front Door
//!
//! The telephony edge calls `/incoming-call` when a call arrives and is told,
//! in TwiML, to open a media stream back to `/media-stream`. It uses `utoipa`
//! doc comments to generate OpenAPI documentation.

use axum::{
    extract::State,
    http::{HeaderMap, header},
    response::{IntoResponse, Json},
};
use callbridge_core::call_control::xml_escape;
use std::sync::Arc;
use tracing::info;

use crate::{models::StatusMessage, state::AppState};

/// Liveness check.
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "The server is running", body = StatusMessage)
    )
)]
pub async fn root() -> Json<StatusMessage> {
    Json(StatusMessage {
        message: "Twilio Media Stream Server is running!".to_string(),
    })
}

/// Answer an inbound call by connecting it to the media stream.
#[utoipa::path(
    method(get, post),
    path = "/incoming-call",
    responses(
        (status = 200, description = "TwiML connecting the call to /media-stream", body = String, content_type = "text/xml")
    )
)]
pub async fn incoming_call(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let host = stream_host(state.config.public_host.as_deref(), &headers)
        .unwrap_or_else(|| state.config.bind_address.to_string());
    info!(%host, "Answering incoming call");
    ([(header::CONTENT_TYPE, "text/xml")], stream_twiml(&host))
}

/// Picks the host the edge should connect back to: the configured public
/// host, else the `Host` the request was addressed to.
fn stream_host(public_host: Option<&str>, headers: &HeaderMap) -> Option<String> {
    public_host
        .or_else(|| headers.get(header::HOST).and_then(|value| value.to_str().ok()))
        .map(str::to_string)
}

/// TwiML that greets the caller and streams the call to `wss://{host}/media-stream`.
pub fn stream_twiml(host: &str) -> String {
    let host = xml_escape(host);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Response><Say>Connecting.</Say><Connect><Stream url="wss://{host}/media-stream" /></Connect></Response>"#
    )
}
