// Caches owned exclusively by the Client Session's application activity.
// The Router never touches these; every mutation happens synchronously
// inside `process_messages`, so no locking is needed.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

/// Server-reported status of one stream, keyed by its upper-cased name.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct StreamDescriptor {
    pub last_update: Option<Instant>,
    pub listener_count: u32,
    pub writer: String,
}

/// The permissions a subscription was confirmed with, plus the receive
/// buffer fed by `data` frames for that stream.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub streams: HashMap<String, StreamDescriptor>,
    pub subscribed: HashMap<String, String>,
    pub buffers: HashMap<String, String>,
    pub errors: VecDeque<String>,
    pub last_general_status: Option<Instant>,
    pub uptime: Option<f64>,
    pub client_count: Option<u32>,
}

impl SessionState {
    pub fn clear(&mut self) {
        self.streams.clear();
        self.subscribed.clear();
        self.buffers.clear();
        self.last_general_status = None;
        self.uptime = None;
        self.client_count = None;
        // Errors intentionally survive a disconnect/clear so the caller can
        // still retrieve the reason via `get_error` afterwards.
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push_back(message.into());
    }

    /// Drain the queued error/`fail` strings, concatenated and cleared.
    pub fn take_errors(&mut self) -> String {
        self.errors.drain(..).collect::<Vec<_>>().join("; ")
    }

    /// Parses a server-confirmed `mode` string (whitespace/comma/hyphen
    /// separated) into the set of permission words it grants.
    pub fn mode_grants(mode: &str, permission: &str) -> bool {
        mode.split(|c: char| c.is_whitespace() || c == ',' || c == '-')
            .filter(|s| !s.is_empty())
            .any(|word| word.eq_ignore_ascii_case(permission))
    }
}
