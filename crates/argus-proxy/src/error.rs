use thiserror::Error;

/// Failures local to one proxied exchange.
///
/// Only failures that abort the exchange surface here. Upstream error
/// statuses, client disconnects, and malformed stream chunks are not errors
/// at this level: they are recorded on the call's state and the relay keeps
/// forwarding bytes.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The inbound request body could not be drained; no call is created and
    /// the client receives a local 500.
    #[error("failed to read request body: {0}")]
    BodyRead(String),

    /// The upstream could not be reached at all; the client receives a 502.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// The client-bound sink is gone; nothing more can be delivered.
    #[error("client connection closed")]
    ClientGone,

    /// The configured upstream target is not a valid URL.
    #[error("invalid upstream target {url:?}: {reason}")]
    InvalidTarget { url: String, reason: String },
}
