//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).
//!
//! # Modules
//!
//! - [`server`]: a scripted local WebSocket server with inspection hooks.
//! - [`config`]: canonical fast configurations for retries and streams.

pub mod config;
pub mod server;

use std::time::Duration;

/// Poll `check` until it holds, for up to five seconds.
///
/// Returns whether the condition was eventually observed.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
