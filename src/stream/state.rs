//! Connection lifecycle state and counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle of a [`StreamConnection`](super::StreamConnection).
///
/// `Connecting -> Open -> Closing -> Closed`, with `Reconnecting` reachable
/// from `Open` when the socket fails and reconnection is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Whether the connection can still deliver messages, now or after a re-dial.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Open | Self::Reconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Counters updated atomically by the read loop, the heartbeat and callers.
#[derive(Debug, Default)]
pub(super) struct StreamCounters {
    /// Inbound data frames decoded and fanned out.
    pub(super) received: AtomicU64,
    /// Outbound frames written by callers.
    pub(super) sent: AtomicU64,
    /// Messages not delivered because a subscriber's buffer was full.
    pub(super) dropped: AtomicU64,
    /// Successful re-dials.
    pub(super) reconnects: AtomicU64,
    /// Failed re-dial attempts.
    pub(super) failed_dials: AtomicU64,
}

impl StreamCounters {
    pub(super) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of one connection, for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStats {
    pub id: Uuid,
    pub address: String,
    pub state: ConnectionState,
    pub topics: usize,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub reconnects: u64,
    pub failed_dials: u64,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl StreamStats {
    pub(super) fn collect(
        id: Uuid,
        address: &str,
        state: ConnectionState,
        topics: usize,
        counters: &StreamCounters,
        last_heartbeat_ms: u64,
    ) -> Self {
        Self {
            id,
            address: address.to_string(),
            state,
            topics,
            messages_received: counters.received.load(Ordering::Relaxed),
            messages_sent: counters.sent.load(Ordering::Relaxed),
            messages_dropped: counters.dropped.load(Ordering::Relaxed),
            reconnects: counters.reconnects.load(Ordering::Relaxed),
            failed_dials: counters.failed_dials.load(Ordering::Relaxed),
            last_heartbeat: from_epoch_millis(last_heartbeat_ms),
        }
    }
}

/// Return the current time as epoch milliseconds.
pub(super) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Convert epoch milliseconds back to a timestamp; 0 means "never".
pub(super) fn from_epoch_millis(millis: u64) -> Option<DateTime<Utc>> {
    if millis == 0 {
        return None;
    }
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_states() {
        assert!(ConnectionState::Connecting.is_live());
        assert!(ConnectionState::Open.is_live());
        assert!(ConnectionState::Reconnecting.is_live());
        assert!(!ConnectionState::Closing.is_live());
        assert!(!ConnectionState::Closed.is_live());
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::Reconnecting).unwrap(),
            r#""reconnecting""#
        );
        assert_eq!(ConnectionState::Open.to_string(), "open");
    }

    #[test]
    fn test_epoch_roundtrip() {
        let now = epoch_millis();
        let ts = from_epoch_millis(now).unwrap();
        assert_eq!(ts.timestamp_millis() as u64, now);
        assert!(from_epoch_millis(0).is_none());
    }

    #[test]
    fn test_stats_snapshot_reads_counters() {
        let counters = StreamCounters::default();
        StreamCounters::bump(&counters.received);
        StreamCounters::bump(&counters.received);
        StreamCounters::bump(&counters.dropped);

        let stats = StreamStats::collect(
            Uuid::nil(),
            "ws://x",
            ConnectionState::Open,
            2,
            &counters,
            0,
        );

        assert_eq!(stats.messages_received, 2);
        assert_eq!(stats.messages_dropped, 1);
        assert_eq!(stats.topics, 2);
        assert!(stats.last_heartbeat.is_none());
    }
}
