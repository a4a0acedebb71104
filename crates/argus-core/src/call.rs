use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a tracked call. Never reused within one tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a call.
///
/// A call starts `Active` and makes exactly one transition to a terminal
/// state. `Disconnected` is kept distinct from `Error` so observers can tell
/// client-initiated abandonment from upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Active,
    Done,
    Error,
    Disconnected,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CallStatus::Active)
    }
}

/// One observed request/response exchange through the proxy.
///
/// This is a point-in-time snapshot; the tracker owns the mutable state and
/// hands out independent copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub id: CallId,
    pub method: String,
    pub endpoint: String,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub request: String,
    pub response: String,
}
