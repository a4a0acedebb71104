use argus_core::CallEvent;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Bounded, ordered queue of call events with blocking-producer semantics.
///
/// When the queue is full, `publish` awaits space instead of dropping the
/// event, so a slow consumer delays producers rather than losing data. The
/// feed is closed exactly once; publication after close is a no-op.
pub struct EventFeed {
    tx: Mutex<Option<mpsc::Sender<CallEvent>>>,
}

impl EventFeed {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<CallEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Publish one event, awaiting queue space if the consumer lags.
    pub async fn publish(&self, event: CallEvent) {
        // Clone the sender under the lock so close and publish cannot
        // interleave, then send outside it.
        let tx = self.tx.lock().clone();
        let Some(tx) = tx else {
            return;
        };
        if tx.send(event).await.is_err() {
            tracing::warn!("event feed consumer is gone, event discarded");
        }
    }

    /// Close the feed. Subsequent `publish` calls are no-ops; the consumer
    /// sees end-of-stream once in-flight sends drain.
    pub fn close(&self) {
        self.tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_core::CallId;
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_and_receive_in_order() {
        let (feed, mut rx) = EventFeed::bounded(8);
        let id = CallId::new();

        feed.publish(CallEvent::created(id)).await;
        feed.publish(CallEvent::delta(id, "a")).await;
        feed.publish(CallEvent::terminal(id)).await;

        assert_eq!(rx.recv().await.unwrap(), CallEvent::created(id));
        assert_eq!(rx.recv().await.unwrap(), CallEvent::delta(id, "a"));
        assert_eq!(rx.recv().await.unwrap(), CallEvent::terminal(id));
    }

    #[tokio::test]
    async fn test_full_queue_blocks_producer() {
        let (feed, mut rx) = EventFeed::bounded(1);
        let id = CallId::new();

        feed.publish(CallEvent::delta(id, "first")).await;

        // The queue is full, so the next publish must wait for the consumer.
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            feed.publish(CallEvent::delta(id, "second")),
        )
        .await;
        assert!(blocked.is_err());

        assert_eq!(rx.recv().await.unwrap().data, "first");
        feed.publish(CallEvent::delta(id, "second")).await;
        assert_eq!(rx.recv().await.unwrap().data, "second");
    }

    #[tokio::test]
    async fn test_publish_after_close_is_noop() {
        let (feed, mut rx) = EventFeed::bounded(8);
        assert!(!feed.is_closed());

        feed.close();
        assert!(feed.is_closed());

        feed.publish(CallEvent::created(CallId::new())).await;
        assert!(rx.recv().await.is_none());
    }
}
