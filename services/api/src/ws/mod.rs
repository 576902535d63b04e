//! WebSocket Call Bridging
//!
//! Everything that happens on the `/media-stream` socket lives here:
//!
//! - `protocol`: the telephony edge's JSON frame format.
//! - `telephony`: reader/writer tasks for the accepted media-stream socket.
//! - `provider`: the realtime AI connection (OpenAI).
//! - `session`: the per-call state machine that bridges the two.

pub mod protocol;
pub mod provider;
pub mod session;
pub mod telephony;

pub use session::ws_handler;
