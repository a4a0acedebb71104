use crate::call::CallId;
use serde::{Deserialize, Serialize};

/// A notification of an incremental or terminal change to a call.
///
/// Events carry no identity beyond delivery order. For a single call they are
/// delivered in the order the corresponding mutations occurred; across calls
/// only tracker enqueue order is promised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEvent {
    pub call_id: CallId,
    /// Response text appended by this change; empty for creation and
    /// terminal events.
    #[serde(default)]
    pub data: String,
    /// True once the call has reached a terminal state.
    pub done: bool,
}

impl CallEvent {
    pub fn created(call_id: CallId) -> Self {
        Self {
            call_id,
            data: String::new(),
            done: false,
        }
    }

    pub fn delta(call_id: CallId, data: impl Into<String>) -> Self {
        Self {
            call_id,
            data: data.into(),
            done: false,
        }
    }

    pub fn terminal(call_id: CallId) -> Self {
        Self {
            call_id,
            data: String::new(),
            done: true,
        }
    }
}
