//! Shared helpers for integration tests.

use std::time::Duration;

use exlink::Variant;
use tokio::sync::mpsc;

/// Receive the next message or fail the test after two seconds.
pub async fn next(rx: &mut mpsc::Receiver<Variant>) -> Variant {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("subscription ended")
}

/// Wait for the channel to report end-of-stream, draining anything buffered.
pub async fn ended(rx: &mut mpsc::Receiver<Variant>) -> bool {
    let drain = async {
        while rx.recv().await.is_some() {}
    };
    tokio::time::timeout(Duration::from_secs(2), drain).await.is_ok()
}
