//! Call Bridge API Library Crate
//!
//! This library contains the web service that connects phone calls to a
//! realtime voice agent: configuration, application state, HTTP handlers,
//! routing, and the WebSocket bridge. The `api` binary is a thin wrapper
//! around it.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
