//! `argus-proxy` binary entrypoint.
//!
//! Starts the proxy server using configuration from environment variables
//! and drains the tracker's live event feed.

use argus_proxy::{serve, ProxyConfig};
use argus_tracker::CallTracker;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Respect `RUST_LOG` if set; otherwise default to proxy-friendly info.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ProxyConfig::default();
    let (tracker, mut events) = CallTracker::new(config.max_calls);
    let tracker = Arc::new(tracker);

    // The single consumer of the live feed; keeps producers from backing up.
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::debug!(
                call_id = %event.call_id,
                done = event.done,
                delta_len = event.data.len(),
                "call event"
            );
        }
    });

    let result = serve(config, Arc::clone(&tracker)).await;
    tracker.close();
    result
}
