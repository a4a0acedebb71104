use actix_web::web::Bytes;
use argus_core::CallStatus;
use argus_proxy::forward::ChannelSink;
use argus_proxy::intercept::Interceptor;
use argus_tracker::CallTracker;
use futures::stream;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_intercepted_exchange_end_to_end() {
    let (tracker, mut events) = CallTracker::with_feed_capacity(10, 64);
    let tracker = Arc::new(tracker);
    let interceptor = Interceptor::new(Arc::clone(&tracker));

    let (sink, mut client_rx) = ChannelSink::new(32);
    let payload = stream::iter(vec![Ok::<_, String>(Bytes::from_static(
        b"{\"model\":\"llama3\",\"stream\":true}",
    ))]);

    let intercepted = interceptor
        .intercept_request("POST", "/api/chat", payload, sink)
        .await
        .unwrap();
    let mut forwarder = intercepted.forwarder;
    let id = forwarder.call_id();

    // Upstream replies with one value split across ragged chunk boundaries
    // and a second value in one piece.
    forwarder
        .write(Bytes::from_static(b"{\"response\":\"he"))
        .await
        .unwrap();
    forwarder
        .write(Bytes::from_static(b"llo\"}"))
        .await
        .unwrap();
    forwarder
        .write(Bytes::from_static(b"{\"done\":true}"))
        .await
        .unwrap();
    forwarder.flush().await.unwrap();

    interceptor.complete_call(id).await;
    forwarder.close();
    drop(forwarder);

    // The client sees exactly the upstream bytes, in value-sized writes.
    let mut client_bytes = Vec::new();
    while let Some(chunk) = client_rx.recv().await {
        client_bytes.extend_from_slice(&chunk);
    }
    assert_eq!(
        client_bytes,
        b"{\"response\":\"hello\"}{\"done\":true}".as_slice()
    );

    // Feed order: creation, one delta per complete value, terminal.
    let created = events.recv().await.unwrap();
    assert_eq!(created.call_id, id);
    assert!(created.data.is_empty() && !created.done);

    assert_eq!(events.recv().await.unwrap().data, "{\"response\":\"hello\"}");
    assert_eq!(events.recv().await.unwrap().data, "{\"done\":true}");
    assert!(events.recv().await.unwrap().done);

    let call = tracker.lookup(id).unwrap();
    assert_eq!(call.status, CallStatus::Done);
    assert_eq!(call.request, "{\"model\":\"llama3\",\"stream\":true}");
    assert_eq!(call.response, "{\"response\":\"hello\"}{\"done\":true}");
    assert!(call.ended_at.is_some());
}

#[tokio::test]
async fn test_client_disconnect_mid_stream() {
    let (tracker, _events) = CallTracker::with_feed_capacity(10, 64);
    let tracker = Arc::new(tracker);
    let interceptor = Interceptor::new(Arc::clone(&tracker));

    let (sink, client_rx) = ChannelSink::new(4);
    let client_closed = sink.closed_signal();
    let payload = stream::iter(vec![Ok::<_, String>(Bytes::from_static(b"{}"))]);

    let intercepted = interceptor
        .intercept_request("POST", "/api/generate", payload, sink)
        .await
        .unwrap();
    let mut forwarder = intercepted.forwarder;
    let id = forwarder.call_id();
    forwarder.spawn_disconnect_watch(client_closed);

    forwarder
        .write(Bytes::from_static(b"{\"response\":\"a\"}"))
        .await
        .unwrap();

    // Client goes away while the stream is still active.
    drop(client_rx);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(
        tracker.lookup(id).unwrap().status,
        CallStatus::Disconnected
    );

    // Delivery now fails, and the handler's completion attempt is a no-op.
    // The transcript still records the value: appends are reported before
    // the client write is attempted.
    assert!(forwarder
        .write(Bytes::from_static(b"{\"response\":\"b\"}"))
        .await
        .is_err());
    interceptor.complete_call(id).await;
    forwarder.close();

    let call = tracker.lookup(id).unwrap();
    assert_eq!(call.status, CallStatus::Disconnected);
    assert_eq!(call.response, "{\"response\":\"a\"}{\"response\":\"b\"}");
}
