//! Manages the lifecycle of one bridged phone call.
//!
//! Each media-stream connection from the telephony edge gets a
//! [`BridgeSession`]. The session owns both sides of the call, consumes their
//! events one at a time, and is the only place that sends on either channel,
//! so audio relay, barge-in and tool results never interleave.

use super::{
    protocol::TelephonyEvent,
    provider::{RealtimeChannel, RealtimeConnector, RealtimeEvent},
    telephony::{self, TelephonyChannel},
};
use crate::state::AppState;
use anyhow::anyhow;
use axum::{
    extract::{State, ws::WebSocket, ws::WebSocketUpgrade},
    response::Response,
};
use callbridge_core::{
    call::CallIdentity,
    error::ToolError,
    registry::SessionRegistry,
    session_config::{SessionConfig, SessionConfigBuilder},
    tools::{PendingToolCall, ToolContext, ToolInvoker, tool_output},
};
use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio::sync::mpsc::{self, error::SendError};
use tracing::{Instrument, debug, error, field::Empty, info, instrument, warn};
use uuid::Uuid;

/// Axum handler to upgrade the telephony edge's media-stream request.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

#[instrument(
    name = "bridge_session",
    skip_all,
    fields(session_id = %Uuid::new_v4(), stream_sid = Empty, call_sid = Empty)
)]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("Client connected");
    let (telephony, telephony_events) = telephony::split_socket(socket);
    BridgeSession::new(state.session_deps(), telephony)
        .run(telephony_events)
        .await;
    info!("Client disconnected");
}

/// Lifecycle of a bridge session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the stream to start and the realtime service to accept the connection.
    Connecting,
    /// Connected; the session configuration is pending or awaiting acknowledgement.
    Configuring,
    /// Audio and tool calls are flowing.
    Active,
    Closing,
    Closed,
}

/// Timing knobs for a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Pause between connecting and sending the configuration.
    pub config_delay: Duration,
    /// How long to wait for `session.updated` before going active anyway.
    pub activation_timeout: Duration,
    /// Upper bound on a single tool invocation.
    pub tool_timeout: Duration,
    /// Upper bound on connecting to the realtime service and on the caller lookup.
    pub setup_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            config_delay: Duration::from_millis(250),
            activation_timeout: Duration::from_secs(1),
            tool_timeout: Duration::from_secs(15),
            setup_timeout: Duration::from_secs(10),
        }
    }
}

/// Shared collaborators handed to every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub connector: Arc<dyn RealtimeConnector>,
    pub config_builder: Arc<SessionConfigBuilder>,
    pub tools: Arc<ToolInvoker>,
    pub registry: Arc<SessionRegistry>,
    pub settings: SessionSettings,
}

/// Which side of the bridge an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Telephony,
    Realtime,
}

type Connection = (RealtimeChannel, mpsc::Receiver<RealtimeEvent>);

/// Work scheduled by the session for itself.
#[derive(Debug)]
enum Signal {
    /// Background setup after the stream started has finished.
    Connected {
        connection: anyhow::Result<Connection>,
        caller_number: Option<String>,
    },
    SendConfig,
    ActivationTimeout,
    ToolFinished { invocation_id: String, output: String },
}

/// The per-call bridge between the telephony edge and the realtime service.
pub struct BridgeSession {
    deps: SessionDeps,
    state: SessionState,
    identity: Option<CallIdentity>,
    telephony: TelephonyChannel,
    realtime: Option<RealtimeChannel>,
    realtime_events: Option<mpsc::Receiver<RealtimeEvent>>,
    pending_config: Option<SessionConfig>,
    config_sent: bool,
    registered: bool,
    dispatched: HashSet<String>,
    signal_tx: mpsc::Sender<Signal>,
    signals: mpsc::Receiver<Signal>,
}

impl BridgeSession {
    pub fn new(deps: SessionDeps, telephony: TelephonyChannel) -> Self {
        let (signal_tx, signals) = mpsc::channel(32);
        Self {
            deps,
            state: SessionState::Connecting,
            identity: None,
            telephony,
            realtime: None,
            realtime_events: None,
            pending_config: None,
            config_sent: false,
            registered: false,
            dispatched: HashSet::new(),
            signal_tx,
            signals,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drives the session until either side goes away.
    pub async fn run(mut self, mut telephony_events: mpsc::Receiver<TelephonyEvent>) {
        loop {
            tokio::select! {
                event = telephony_events.recv() => {
                    self.handle_telephony(event.unwrap_or(TelephonyEvent::Closed)).await;
                }
                Some(event) = next_event(&mut self.realtime_events) => {
                    self.handle_realtime(event).await;
                }
                Some(signal) = self.signals.recv() => {
                    self.handle_signal(signal).await;
                }
            }
            if self.state == SessionState::Closed {
                break;
            }
        }
    }

    async fn handle_telephony(&mut self, event: TelephonyEvent) {
        match event {
            TelephonyEvent::Start { stream_id, call_id } => self.on_start(stream_id, call_id).await,
            TelephonyEvent::Media { payload } => {
                match (&self.realtime, self.state) {
                    (Some(realtime), SessionState::Active) => realtime.send_audio_append(payload).await,
                    _ => debug!(state = ?self.state, "Dropping caller audio; session not active"),
                }
            }
            TelephonyEvent::Stop => {
                info!("Incoming stream has stopped");
                self.close(Side::Telephony).await;
            }
            TelephonyEvent::Other(tag) => info!(event = %tag, "Received non-media event"),
            TelephonyEvent::Closed => self.close(Side::Telephony).await,
        }
    }

    async fn handle_realtime(&mut self, event: RealtimeEvent) {
        if matches!(event, RealtimeEvent::Closed) {
            self.close(Side::Realtime).await;
            return;
        }
        if event == RealtimeEvent::SessionUpdated {
            if self.state == SessionState::Configuring && self.config_sent {
                self.activate();
            }
            return;
        }
        if self.state != SessionState::Active {
            debug!(state = ?self.state, event = ?event, "Ignoring realtime event; session not active");
            return;
        }
        let (Some(realtime), Some(identity)) = (&self.realtime, &self.identity) else {
            return;
        };

        match event {
            RealtimeEvent::AudioDelta(payload) => {
                self.telephony.send_media(&identity.stream_id, payload).await;
            }
            RealtimeEvent::SpeechStarted => {
                info!("Caller started speaking; interrupting response");
                self.telephony.send_clear(&identity.stream_id).await;
                realtime.cancel_response().await;
            }
            RealtimeEvent::SpeechStopped => debug!("Caller stopped speaking"),
            RealtimeEvent::FunctionCallCompleted {
                invocation_id,
                name,
                arguments,
            } => {
                self.dispatch(PendingToolCall {
                    invocation_id,
                    name,
                    arguments,
                });
            }
            RealtimeEvent::Other { tag, .. } => debug!(event = %tag, "Unhandled realtime event"),
            RealtimeEvent::SessionUpdated | RealtimeEvent::Closed => {}
        }
    }

    async fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Connected {
                connection,
                caller_number,
            } => self.on_connected(connection, caller_number).await,
            Signal::SendConfig => {
                if self.state != SessionState::Configuring {
                    return;
                }
                let (Some(realtime), Some(config)) = (&self.realtime, self.pending_config.take())
                else {
                    return;
                };
                realtime.send_config(config).await;
                self.config_sent = true;
                self.schedule(Signal::ActivationTimeout, self.deps.settings.activation_timeout);
            }
            Signal::ActivationTimeout => {
                if self.state == SessionState::Configuring && self.config_sent {
                    warn!("No session update acknowledgement; activating anyway");
                    self.activate();
                }
            }
            Signal::ToolFinished {
                invocation_id,
                output,
            } => {
                let Some(realtime) = self.realtime.as_ref().filter(|_| {
                    matches!(self.state, SessionState::Configuring | SessionState::Active)
                }) else {
                    debug!(%invocation_id, "Discarding tool result for a closed session");
                    return;
                };
                realtime.send_tool_result(invocation_id, output).await;
                realtime.send_continue().await;
            }
        }
    }

    async fn on_start(&mut self, stream_id: String, call_id: Option<String>) {
        if self.identity.is_some() {
            warn!(%stream_id, "Ignoring repeated stream start");
            return;
        }
        let span = tracing::Span::current();
        span.record("stream_sid", stream_id.as_str());
        if let Some(call_id) = &call_id {
            span.record("call_sid", call_id.as_str());
        }
        info!("Incoming stream has started");

        let identity = CallIdentity::new(stream_id, call_id);
        self.registered = self.deps.registry.register(identity.clone());
        if identity.call_id.is_some() && !self.registered {
            warn!("Call is served by another stream; transfers will target that session");
        }
        self.identity = Some(identity.clone());

        // Runs off the event loop so a hangup is still seen while it waits.
        let connector = self.deps.connector.clone();
        let config_builder = self.deps.config_builder.clone();
        let timeout = self.deps.settings.setup_timeout;
        let signal_tx = self.signal_tx.clone();
        tokio::spawn(
            async move {
                let (connection, caller_number) = tokio::join!(
                    async {
                        tokio::time::timeout(timeout, connector.connect())
                            .await
                            .unwrap_or_else(|_| {
                                Err(anyhow!("realtime connect did not finish within {timeout:?}"))
                            })
                    },
                    async {
                        tokio::time::timeout(
                            timeout,
                            config_builder.resolve_caller_number(&identity),
                        )
                        .await
                        .unwrap_or_else(|_| {
                            warn!(?timeout, "Caller lookup timed out; continuing without it");
                            None
                        })
                    },
                );

                let connected = Signal::Connected {
                    connection,
                    caller_number,
                };
                if let Err(SendError(Signal::Connected {
                    connection: Ok((realtime, _)),
                    ..
                })) = signal_tx.send(connected).await
                {
                    debug!("Session ended during setup; closing realtime connection");
                    realtime.close().await;
                }
            }
            .in_current_span(),
        );
    }

    async fn on_connected(
        &mut self,
        connection: anyhow::Result<Connection>,
        caller_number: Option<String>,
    ) {
        if self.state != SessionState::Connecting {
            if let Ok((realtime, _)) = connection {
                debug!(state = ?self.state, "Session no longer connecting; closing realtime connection");
                realtime.close().await;
            }
            return;
        }
        let (realtime, events) = match connection {
            Ok(connection) => connection,
            Err(e) => {
                error!(error = ?e, "Could not reach the realtime service; ending call");
                self.close(Side::Realtime).await;
                return;
            }
        };
        self.realtime = Some(realtime);
        self.realtime_events = Some(events);

        let Some(mut identity) = self.identity.take() else {
            return;
        };
        identity.caller_number = caller_number;
        if identity.caller_number.is_some() && self.registered {
            self.deps.registry.register(identity.clone());
        }
        self.pending_config = Some(self.deps.config_builder.build(&identity));
        self.identity = Some(identity);

        self.state = SessionState::Configuring;
        self.schedule(Signal::SendConfig, self.deps.settings.config_delay);
    }

    fn activate(&mut self) {
        info!("Session active");
        self.state = SessionState::Active;
    }

    fn dispatch(&mut self, call: PendingToolCall) {
        if !self.dispatched.insert(call.invocation_id.clone()) {
            warn!(invocation_id = %call.invocation_id, "Ignoring repeated function call");
            return;
        }
        info!(invocation_id = %call.invocation_id, tool = %call.name, "Dispatching tool call");

        let tools = self.deps.tools.clone();
        let context = ToolContext {
            call_id: self.identity.as_ref().and_then(|id| id.call_id.clone()),
            registry: self.deps.registry.clone(),
        };
        let timeout = self.deps.settings.tool_timeout;
        let signal_tx = self.signal_tx.clone();

        tokio::spawn(
            async move {
                let result = tokio::time::timeout(
                    timeout,
                    tools.invoke(&call.name, &call.arguments, &context),
                )
                .await
                .unwrap_or(Err(ToolError::TimedOut(timeout)));
                let output = tool_output(&result);
                debug!(invocation_id = %call.invocation_id, %output, "Tool call finished");

                let finished = Signal::ToolFinished {
                    invocation_id: call.invocation_id,
                    output,
                };
                if signal_tx.send(finished).await.is_err() {
                    debug!("Session ended before the tool call finished");
                }
            }
            .in_current_span(),
        );
    }

    fn schedule(&self, signal: Signal, delay: Duration) {
        let signal_tx = self.signal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = signal_tx.send(signal).await;
        });
    }

    /// Tears the session down after `origin` stopped or disconnected.
    ///
    /// Closes the other side if it is still open and removes the call from
    /// the registry. Later calls are no-ops.
    async fn close(&mut self, origin: Side) {
        if matches!(self.state, SessionState::Closing | SessionState::Closed) {
            return;
        }
        self.state = SessionState::Closing;
        info!(?origin, "Closing bridge session");

        match origin {
            Side::Telephony => {
                if let Some(realtime) = self.realtime.as_ref().filter(|r| r.is_open()) {
                    realtime.close().await;
                }
            }
            Side::Realtime => {
                if self.telephony.is_open() {
                    self.telephony.close().await;
                }
            }
        }

        if self.registered {
            if let Some(call_id) = self.identity.as_ref().and_then(CallIdentity::call_id) {
                self.deps.registry.deregister(call_id);
            }
            self.registered = false;
        }
        self.realtime_events = None;
        self.state = SessionState::Closed;
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<RealtimeEvent>>) -> Option<RealtimeEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
