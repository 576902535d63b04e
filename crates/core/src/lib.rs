//! Callbridge Core
//!
//! Transport-free building blocks for bridging a phone call with a realtime
//! voice agent: the identity of a call, the process-wide registry of active
//! calls, the per-call session configuration, and the tools the agent may
//! invoke mid-conversation together with the providers backing them.

pub mod call;
pub mod call_control;
pub mod error;
pub mod registry;
pub mod search;
pub mod session_config;
pub mod tools;
