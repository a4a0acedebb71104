//! Response forwarding with whole-value reassembly.
//!
//! Upstream transports chunk responses at arbitrary byte boundaries that do
//! not align with semantic value boundaries. The forwarder buffers bytes
//! until they decode as exactly one JSON value, records the complete value on
//! the tracked call, and passes the bytes to the client unchanged. The client
//! always receives every byte it would have received without interception;
//! the tracked transcript only ever records whole, well-formed values.

use crate::error::ProxyError;
use actix_web::web::{Bytes, BytesMut};
use argus_core::CallId;
use argus_tracker::CallTracker;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

/// The client-bound side of a forwarded response.
#[async_trait]
pub trait ClientSink: Send + Sync {
    /// Deliver one chunk toward the client. Fails once the client is gone.
    async fn write(&mut self, chunk: Bytes) -> Result<(), ProxyError>;

    /// Push transport-buffered data toward the client if supported.
    fn flush(&mut self) {}
}

/// Narrow call-awareness contract of a decorated response sink: the
/// capabilities a collaborator may need beyond plain byte writing.
#[async_trait]
pub trait CallAware: Send + Sync {
    fn call_id(&self) -> CallId;
    async fn mark_error(&self);
    fn errored(&self) -> bool;
}

/// Attempt to view an arbitrary sink as call-aware. Applied only at the
/// boundary that needs the capability; sinks without it stay opaque.
pub fn as_call_aware(sink: &(dyn Any + Send + Sync)) -> Option<&dyn CallAware> {
    sink.downcast_ref::<ResponseForwarder>()
        .map(|f| f as &dyn CallAware)
}

/// Channel-backed [`ClientSink`] feeding a streaming response body. The
/// receiving half lives inside the client response; when the client
/// disconnects the response body is dropped and `closed_signal` resolves.
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// A future resolving once the receiving half has been dropped, i.e. the
    /// client connection's lifetime has ended.
    pub fn closed_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let tx = self.tx.clone();
        async move { tx.closed().await }
    }
}

#[async_trait]
impl ClientSink for ChannelSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), ProxyError> {
        self.tx
            .send(chunk)
            .await
            .map_err(|_| ProxyError::ClientGone)
    }
}

#[derive(Default)]
struct ForwardFlags {
    errored: bool,
    done: bool,
}

/// Streaming pass-through wrapping the client-facing response sink for one
/// tracked call.
///
/// Single producer by construction: only the relay pump writes and drives
/// terminal transitions, so the flags lock exists solely for the race with
/// the disconnect watcher.
pub struct ResponseForwarder {
    call_id: CallId,
    tracker: Arc<CallTracker>,
    sink: Box<dyn ClientSink>,
    buffer: BytesMut,
    flags: Arc<Mutex<ForwardFlags>>,
    done_signal: Arc<Notify>,
}

impl ResponseForwarder {
    pub fn new(call_id: CallId, tracker: Arc<CallTracker>, sink: impl ClientSink + 'static) -> Self {
        Self {
            call_id,
            tracker,
            sink: Box::new(sink),
            buffer: BytesMut::new(),
            flags: Arc::new(Mutex::new(ForwardFlags::default())),
            done_signal: Arc::new(Notify::new()),
        }
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn errored(&self) -> bool {
        self.flags.lock().errored
    }

    /// Mark the call as errored, once. Later invocations are no-ops and the
    /// flag is never cleared by subsequent successful data.
    pub async fn mark_error(&self) {
        let claimed = {
            let mut flags = self.flags.lock();
            if flags.errored {
                false
            } else {
                flags.errored = true;
                true
            }
        };
        if claimed {
            self.tracker.fail(self.call_id).await;
        }
    }

    /// Observe the upstream status before it is forwarded. Error statuses
    /// mark the call irreversibly.
    pub async fn write_status(&self, status: u16) {
        if status >= 400 {
            self.mark_error().await;
        }
    }

    /// Accept one relayed chunk.
    ///
    /// The accumulated buffer either decodes as one complete JSON value
    /// (record it, forward it, start fresh), is a prefix of one (keep
    /// buffering, forward nothing yet), or is unrecoverable (fail open:
    /// forward the incoming chunk untouched and drop the accumulation).
    pub async fn write(&mut self, chunk: Bytes) -> Result<(), ProxyError> {
        self.buffer.extend_from_slice(&chunk);

        match serde_json::from_slice::<serde_json::Value>(&self.buffer) {
            Ok(_) => {
                let complete = self.buffer.split().freeze();
                let text = String::from_utf8_lossy(&complete).into_owned();
                self.tracker.append_response(self.call_id, &text).await;
                self.sink.write(complete).await
            }
            Err(e) if e.is_eof() => Ok(()),
            Err(e) => {
                tracing::debug!(
                    call_id = %self.call_id,
                    error = %e,
                    "unparseable stream chunk, forwarding raw"
                );
                self.buffer.clear();
                self.sink.write(chunk).await
            }
        }
    }

    /// Forward any residual buffered bytes, then flush the underlying sink.
    /// A transport-forced flush may emit a value still mid-assembly.
    pub async fn flush(&mut self) -> Result<(), ProxyError> {
        if !self.buffer.is_empty() {
            let residual = self.buffer.split().freeze();
            self.sink.write(residual).await?;
        }
        self.sink.flush();
        Ok(())
    }

    /// Watch a signal derived from the client connection's lifetime. If it
    /// fires before normal completion, the call transitions to Disconnected
    /// exactly once; the done marker is checked under the flags lock so the
    /// loser of the race backs off.
    pub fn spawn_disconnect_watch(
        &self,
        client_closed: impl Future<Output = ()> + Send + 'static,
    ) {
        let flags = Arc::clone(&self.flags);
        let done_signal = Arc::clone(&self.done_signal);
        let tracker = Arc::clone(&self.tracker);
        let call_id = self.call_id;

        tokio::spawn(async move {
            tokio::select! {
                _ = client_closed => {
                    let claimed = {
                        let mut flags = flags.lock();
                        if flags.done || flags.errored {
                            false
                        } else {
                            flags.errored = true;
                            true
                        }
                    };
                    if claimed {
                        tracker.disconnect(call_id).await;
                    }
                }
                _ = done_signal.notified() => {}
            }
        });
    }

    /// Record normal end-of-request and release the disconnect watcher.
    /// The forwarder never declares completion on the tracker itself; that
    /// belongs to the owning request handler.
    pub fn close(&self) {
        self.flags.lock().done = true;
        self.done_signal.notify_one();
    }
}

#[async_trait]
impl CallAware for ResponseForwarder {
    fn call_id(&self) -> CallId {
        self.call_id
    }

    async fn mark_error(&self) {
        ResponseForwarder::mark_error(self).await;
    }

    fn errored(&self) -> bool {
        ResponseForwarder::errored(self)
    }
}
