//! The capture decision and request boundary.
//!
//! Requests whose path ends with one of the configured suffixes are
//! intercepted: the body is drained once, kept for the call record, and
//! re-presented intact to the relay. Everything else bypasses tracking.

use crate::error::ProxyError;
use crate::forward::{ClientSink, ResponseForwarder};
use actix_web::web::{Bytes, BytesMut};
use argus_core::CallId;
use argus_tracker::CallTracker;
use futures::{Stream, StreamExt};
use std::sync::Arc;

/// Generation endpoints captured by default.
pub const DEFAULT_CAPTURE_SUFFIXES: [&str; 2] = ["/api/chat", "/api/generate"];

/// Outcome of a successful interception: the captured body, replay-ready for
/// the relay, and the forwarder wired to the opened call.
pub struct Intercepted {
    pub body: Bytes,
    pub forwarder: ResponseForwarder,
}

pub struct Interceptor {
    tracker: Arc<CallTracker>,
    capture_suffixes: Vec<String>,
}

impl Interceptor {
    pub fn new(tracker: Arc<CallTracker>) -> Self {
        Self::with_suffixes(
            tracker,
            DEFAULT_CAPTURE_SUFFIXES.iter().map(|s| s.to_string()),
        )
    }

    pub fn with_suffixes(
        tracker: Arc<CallTracker>,
        suffixes: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            tracker,
            capture_suffixes: suffixes.into_iter().collect(),
        }
    }

    pub fn should_intercept(&self, path: &str) -> bool {
        self.capture_suffixes.iter().any(|s| path.ends_with(s))
    }

    /// Drain the request body and open a call.
    ///
    /// The inbound body stream can only be consumed once, so the captured
    /// bytes double as the replay body for the relay. A failed read aborts
    /// before any call exists.
    pub async fn intercept_request<S, E>(
        &self,
        method: &str,
        path: &str,
        mut payload: S,
        sink: impl ClientSink + 'static,
    ) -> Result<Intercepted, ProxyError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let mut body = BytesMut::new();
        while let Some(chunk) = payload.next().await {
            let chunk = chunk.map_err(|e| ProxyError::BodyRead(e.to_string()))?;
            body.extend_from_slice(&chunk);
        }
        let body = body.freeze();

        let call = self
            .tracker
            .create_call(method, path, String::from_utf8_lossy(&body).into_owned())
            .await;
        let forwarder = ResponseForwarder::new(call.id, Arc::clone(&self.tracker), sink);

        Ok(Intercepted { body, forwarder })
    }

    /// Mark a call as normally completed. Invoked by the owning request
    /// handler once the relay has returned control; races any earlier
    /// disconnect or error transition, which the tracker resolves to exactly
    /// one winner.
    pub async fn complete_call(&self, id: CallId) {
        self.tracker.complete(id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_core::CallStatus;
    use async_trait::async_trait;
    use futures::stream;

    struct NullSink;

    #[async_trait]
    impl ClientSink for NullSink {
        async fn write(&mut self, _chunk: Bytes) -> Result<(), ProxyError> {
            Ok(())
        }
    }

    fn interceptor() -> (Interceptor, Arc<CallTracker>) {
        let (tracker, _events) = CallTracker::with_feed_capacity(10, 64);
        let tracker = Arc::new(tracker);
        (Interceptor::new(Arc::clone(&tracker)), tracker)
    }

    #[test]
    fn test_should_intercept_default_suffixes() {
        let (interceptor, _tracker) = interceptor();

        assert!(interceptor.should_intercept("/api/chat"));
        assert!(interceptor.should_intercept("/api/generate"));
        assert!(interceptor.should_intercept("/ollama/api/chat"));

        assert!(!interceptor.should_intercept("/api/tags"));
        assert!(!interceptor.should_intercept("/api/chat/extra"));
        assert!(!interceptor.should_intercept("/"));
    }

    #[test]
    fn test_should_intercept_custom_suffixes() {
        let (tracker, _events) = CallTracker::with_feed_capacity(10, 64);
        let interceptor =
            Interceptor::with_suffixes(Arc::new(tracker), vec!["/v1/completions".to_string()]);

        assert!(interceptor.should_intercept("/v1/completions"));
        assert!(!interceptor.should_intercept("/api/chat"));
    }

    #[tokio::test]
    async fn test_intercept_captures_body_and_opens_call() {
        let (interceptor, tracker) = interceptor();
        let payload = stream::iter(vec![
            Ok::<_, String>(Bytes::from_static(b"{\"model\":")),
            Ok(Bytes::from_static(b"\"llama3\"}")),
        ]);

        let intercepted = interceptor
            .intercept_request("POST", "/api/chat", payload, NullSink)
            .await
            .unwrap();

        assert_eq!(&intercepted.body[..], b"{\"model\":\"llama3\"}");

        let call = tracker.lookup(intercepted.forwarder.call_id()).unwrap();
        assert_eq!(call.method, "POST");
        assert_eq!(call.endpoint, "/api/chat");
        assert_eq!(call.request, "{\"model\":\"llama3\"}");
        assert_eq!(call.status, CallStatus::Active);
    }

    #[tokio::test]
    async fn test_body_read_failure_creates_no_call() {
        let (interceptor, tracker) = interceptor();
        let payload = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err("connection reset".to_string()),
        ]);

        let result = interceptor
            .intercept_request("POST", "/api/chat", payload, NullSink)
            .await;

        assert!(matches!(result, Err(ProxyError::BodyRead(_))));
        assert!(tracker.list().is_empty());
    }

    #[tokio::test]
    async fn test_complete_call_marks_done() {
        let (interceptor, tracker) = interceptor();
        let payload = stream::iter(vec![Ok::<_, String>(Bytes::from_static(b"{}"))]);

        let intercepted = interceptor
            .intercept_request("POST", "/api/generate", payload, NullSink)
            .await
            .unwrap();
        let id = intercepted.forwarder.call_id();

        interceptor.complete_call(id).await;
        assert_eq!(tracker.lookup(id).unwrap().status, CallStatus::Done);
    }
}
