mod call;
mod event;

pub use call::{Call, CallId, CallStatus};
pub use event::CallEvent;
