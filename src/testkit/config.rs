//! Canonical test configurations.
//!
//! Single source of truth for config structs used across tests.
//! Avoids each test module defining its own slightly-different defaults.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::StreamConfig;
use crate::http::RetryPolicy;

/// Three retries with millisecond delays, so exhausting them is fast.
pub fn retry_policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(20), 1.0)
}

/// Stream settings with a quick re-dial and no heartbeat.
///
/// Tests that exercise heartbeats set `ping_interval_ms` themselves.
pub fn stream() -> StreamConfig {
    StreamConfig {
        headers: HashMap::new(),
        reconnect: true,
        handshake_timeout_ms: 2_000,
        ping_interval_ms: 0,
        reconnect_delay_ms: 20,
        write_timeout_ms: 1_000,
        channel_capacity: 16,
    }
}
