//! Session Registry
//!
//! A process-wide index of the calls currently being bridged, keyed by the
//! telephony provider's call id. Tools that act on the live call (such as a
//! transfer) consult it through their invocation context instead of reaching
//! for global state.

use crate::call::CallIdentity;
use dashmap::{DashMap, mapref::entry::Entry};
use tracing::{debug, warn};

/// Concurrent map from call id to the identity of the session serving it.
///
/// Sessions insert themselves once the call id is known and remove themselves
/// when they terminate. Lookups may come from any task.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    calls: DashMap<String, CallIdentity>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records (or refreshes) the identity of an active call.
    ///
    /// Returns `false` without storing anything when the identity carries no
    /// call id, since such a session cannot be looked up, or when the call id
    /// is already held by a session on a different stream.
    pub fn register(&self, identity: CallIdentity) -> bool {
        let Some(call_id) = identity.call_id.clone() else {
            return false;
        };
        match self.calls.entry(call_id) {
            Entry::Occupied(mut entry) => {
                if entry.get().stream_id != identity.stream_id {
                    warn!(
                        call_id = %entry.key(),
                        active_stream = %entry.get().stream_id,
                        stream_id = %identity.stream_id,
                        "Call is already registered to another stream"
                    );
                    return false;
                }
                debug!(call_id = %entry.key(), stream_id = %identity.stream_id, "Refreshing call");
                entry.insert(identity);
            }
            Entry::Vacant(entry) => {
                debug!(call_id = %entry.key(), stream_id = %identity.stream_id, "Registering call");
                entry.insert(identity);
            }
        }
        true
    }

    /// Removes a call, returning its last known identity if it was present.
    pub fn deregister(&self, call_id: &str) -> Option<CallIdentity> {
        let removed = self.calls.remove(call_id).map(|(_, identity)| identity);
        if removed.is_some() {
            debug!(%call_id, "Deregistered call");
        }
        removed
    }

    /// Returns a snapshot of the identity registered under `call_id`.
    pub fn lookup(&self, call_id: &str) -> Option<CallIdentity> {
        self.calls.get(call_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.calls.contains_key(call_id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
