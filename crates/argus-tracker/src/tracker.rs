use crate::feed::EventFeed;
use argus_core::{Call, CallEvent, CallId, CallStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Default bound of the live event queue, sized generously relative to the
/// expected number of concurrently streaming calls.
pub const DEFAULT_FEED_CAPACITY: usize = 100;

/// Mutable fields of a call, guarded by that call's own lock.
struct CallState {
    status: CallStatus,
    ended_at: Option<DateTime<Utc>>,
    response: String,
}

/// A live call entry. Identity fields are immutable; `state` is the only
/// mutable part and is never locked while the tracker's map lock is held.
struct TrackedCall {
    id: CallId,
    method: String,
    endpoint: String,
    started_at: DateTime<Utc>,
    request: String,
    state: Mutex<CallState>,
}

impl TrackedCall {
    fn snapshot(&self) -> Call {
        let state = self.state.lock();
        Call {
            id: self.id,
            method: self.method.clone(),
            endpoint: self.endpoint.clone(),
            status: state.status,
            started_at: self.started_at,
            ended_at: state.ended_at,
            request: self.request.clone(),
            response: state.response.clone(),
        }
    }

    fn append(&self, data: &str) {
        self.state.lock().response.push_str(data);
    }

    /// Attempt the terminal transition. Returns false when the call already
    /// reached a terminal state, leaving `ended_at` untouched.
    fn try_finish(&self, status: CallStatus) -> bool {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return false;
        }
        state.status = status;
        state.ended_at = Some(Utc::now());
        true
    }
}

/// Concurrency-safe, capacity-bounded mapping from id to call, plus a single
/// ordered live event feed.
///
/// Locking discipline: the map lock covers lookup/insert/evict only. Each
/// call's mutable fields sit behind the call's own lock, acquired after the
/// map lock has been released, so listers never block on an in-flight stream
/// write and the eviction path cannot deadlock against a streaming write.
pub struct CallTracker {
    calls: Mutex<HashMap<CallId, Arc<TrackedCall>>>,
    max_calls: usize,
    feed: EventFeed,
}

impl CallTracker {
    /// Build a tracker retaining at most `max_calls` entries, returning the
    /// receiving half of the event feed. Exactly one consumer drains it.
    pub fn new(max_calls: usize) -> (Self, mpsc::Receiver<CallEvent>) {
        Self::with_feed_capacity(max_calls, DEFAULT_FEED_CAPACITY)
    }

    pub fn with_feed_capacity(
        max_calls: usize,
        feed_capacity: usize,
    ) -> (Self, mpsc::Receiver<CallEvent>) {
        let (feed, events) = EventFeed::bounded(feed_capacity);
        (
            Self {
                calls: Mutex::new(HashMap::new()),
                max_calls,
                feed,
            },
            events,
        )
    }

    /// Open a new active call, evicting the oldest-started entry first when
    /// the store is at capacity. Publishes a creation event.
    pub async fn create_call(
        &self,
        method: impl Into<String>,
        endpoint: impl Into<String>,
        request: impl Into<String>,
    ) -> Call {
        let call = Arc::new(TrackedCall {
            id: CallId::new(),
            method: method.into(),
            endpoint: endpoint.into(),
            started_at: Utc::now(),
            request: request.into(),
            state: Mutex::new(CallState {
                status: CallStatus::Active,
                ended_at: None,
                response: String::new(),
            }),
        });
        let snapshot = call.snapshot();

        {
            let mut calls = self.calls.lock();
            if self.max_calls > 0 && calls.len() >= self.max_calls {
                // Earliest started wins eviction; ties broken by id so the
                // outcome is deterministic.
                let oldest = calls
                    .values()
                    .min_by_key(|c| (c.started_at, c.id))
                    .map(|c| c.id);
                if let Some(id) = oldest {
                    calls.remove(&id);
                }
            }
            calls.insert(call.id, call);
        }

        tracing::debug!(call_id = %snapshot.id, endpoint = %snapshot.endpoint, "created call");
        self.feed.publish(CallEvent::created(snapshot.id)).await;
        snapshot
    }

    /// Append response text to a call and publish the delta. No-op for
    /// unknown ids (already evicted or never created).
    pub async fn append_response(&self, id: CallId, data: &str) {
        let Some(call) = self.get(id) else {
            return;
        };
        call.append(data);
        self.feed.publish(CallEvent::delta(id, data)).await;
    }

    /// Transition `Active -> Done`. No-op when already terminal.
    pub async fn complete(&self, id: CallId) {
        self.finish(id, CallStatus::Done).await;
    }

    /// Transition `Active -> Error`. No-op when already terminal.
    pub async fn fail(&self, id: CallId) {
        self.finish(id, CallStatus::Error).await;
    }

    /// Transition `Active -> Disconnected`. No-op when already terminal.
    pub async fn disconnect(&self, id: CallId) {
        self.finish(id, CallStatus::Disconnected).await;
    }

    async fn finish(&self, id: CallId, status: CallStatus) {
        let Some(call) = self.get(id) else {
            return;
        };
        if !call.try_finish(status) {
            return;
        }
        tracing::debug!(call_id = %id, ?status, "call finished");
        self.feed.publish(CallEvent::terminal(id)).await;
    }

    /// Snapshot of all retained calls, most recently started first.
    pub fn list(&self) -> Vec<Call> {
        let calls: Vec<Arc<TrackedCall>> = self.calls.lock().values().cloned().collect();
        let mut snapshots: Vec<Call> = calls.iter().map(|c| c.snapshot()).collect();
        snapshots.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        snapshots
    }

    pub fn lookup(&self, id: CallId) -> Option<Call> {
        self.get(id).map(|c| c.snapshot())
    }

    /// Close the event feed. Called exactly once during shutdown; later
    /// publications are silently suppressed.
    pub fn close(&self) {
        self.feed.close();
    }

    fn get(&self, id: CallId) -> Option<Arc<TrackedCall>> {
        self.calls.lock().get(&id).cloned()
    }
}
