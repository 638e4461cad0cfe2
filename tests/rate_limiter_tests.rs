//! Concurrency tests for the shared rate limiter.

use std::sync::Arc;
use std::time::Duration;

use exlink::RateLimiter;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tasks_never_exceed_ceiling() {
    let limiter = Arc::new(RateLimiter::new(30, Duration::from_secs(60)));

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.allow("shared") })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 30);
    assert_eq!(limiter.in_window("shared"), 30);
}

#[tokio::test]
async fn test_window_slides() {
    let limiter = RateLimiter::new(2, Duration::from_millis(200));

    assert!(limiter.allow("k"));
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(limiter.allow("k"));
    assert!(!limiter.allow("k"));

    // Only the first admission has aged out.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(limiter.allow("k"));
    assert!(!limiter.allow("k"));
}
