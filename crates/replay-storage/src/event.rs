//! Inbound session-end trigger.

use serde::Deserialize;

/// Notification that a session finished recording and can be stored.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct SessionEnd {
    /// Session identifier; also the capture file name and object key prefix.
    pub session_id: u64,
    /// Per-session encryption secret; empty means store unencrypted.
    #[serde(default)]
    pub encryption_key: String,
}

impl SessionEnd {
    /// Parse one newline-delimited JSON event.
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

impl std::fmt::Debug for SessionEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEnd")
            .field("session_id", &self.session_id)
            .field("encryption_key", &"[REDACTED]")
            .finish()
    }
}
