//! One persistent WebSocket stream with topic fan-out.
//!
//! A [`StreamConnection`] owns a single socket and two background tasks:
//!
//! - **Read loop**: decodes every inbound data frame into a [`Variant`] and
//!   offers it to every subscribed topic with a non-blocking send. A full
//!   subscriber buffer drops the message for that subscriber only and bumps
//!   the dropped counter; the read loop never waits on a slow consumer.
//!   Pings are answered with pongs, and pings and pongs refresh the heartbeat
//!   timestamp.
//! - **Heartbeat**: pings the peer on a fixed interval. A failed ping either
//!   asks the read loop to reconnect or terminates the connection.
//!
//! # Reconnection
//!
//! When the socket fails and `reconnect` is enabled, the read loop waits
//! `reconnect_delay`, re-dials the same address with the same headers and
//! keeps going. The subscriber map is never touched during a re-dial, so
//! every receiver handed out before the failure keeps receiving afterwards.
//! Attempts continue until the connection is closed.
//!
//! # Shutdown
//!
//! Each connection owns one cancellation token (a `watch` channel). Closing
//! triggers it, waits for both tasks to finish, closes every subscriber
//! channel and finally closes the socket. Closing twice is harmless.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::state::{epoch_millis, from_epoch_millis, ConnectionState, StreamCounters, StreamStats};
use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::value::Variant;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Payload of one outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl From<&str> for OutboundMessage {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for OutboundMessage {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for OutboundMessage {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<serde_json::Value> for OutboundMessage {
    fn from(value: serde_json::Value) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Variant> for OutboundMessage {
    fn from(value: Variant) -> Self {
        serde_json::Value::from(value).into()
    }
}

impl From<OutboundMessage> for Message {
    fn from(message: OutboundMessage) -> Self {
        match message {
            OutboundMessage::Text(text) => Self::Text(text),
            OutboundMessage::Binary(bytes) => Self::Binary(bytes),
        }
    }
}

/// State shared between the handle and its background tasks.
struct Shared {
    id: Uuid,
    address: String,
    config: StreamConfig,
    state: RwLock<ConnectionState>,
    /// Epoch milliseconds of the last ping or pong seen from the peer.
    last_heartbeat: AtomicU64,
    subscribers: RwLock<HashMap<String, mpsc::Sender<Variant>>>,
    /// Write half of the current socket; `None` while re-dialing or after close.
    sink: tokio::sync::Mutex<Option<WsSink>>,
    /// Cancellation token for both background tasks.
    shutdown: watch::Sender<bool>,
    /// Raised by the heartbeat when a ping could not be written.
    reconnect: Notify,
    counters: StreamCounters,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    fn touch(&self) {
        self.last_heartbeat.store(epoch_millis(), Ordering::Relaxed);
    }

    /// Write one frame on the current socket, bounded by the write timeout.
    async fn write(&self, message: Message) -> Result<()> {
        let mut sink = self.sink.lock().await;
        let Some(sink) = sink.as_mut() else {
            return Err(Error::network(&self.address, "stream is not connected"));
        };

        match timeout(self.config.write_timeout(), sink.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::network(&self.address, e)),
            Err(_) => Err(Error::network(&self.address, "write timed out")),
        }
    }

    /// Handle one inbound frame other than `Close`.
    async fn on_frame(&self, message: Message) {
        match message {
            Message::Text(text) => self.fan_out(Variant::decode(text.as_bytes())),
            Message::Binary(data) => self.fan_out(Variant::decode(&data)),
            Message::Ping(data) => {
                trace!(connection_id = %self.id, "Ping received");
                self.touch();
                if let Err(e) = self.write(Message::Pong(data)).await {
                    debug!(connection_id = %self.id, error = %e, "Failed to answer ping");
                }
            }
            Message::Pong(_) => {
                trace!(connection_id = %self.id, "Pong received");
                self.touch();
            }
            // The read loop consumes close frames before dispatching here.
            Message::Close(_) => {}
            Message::Frame(_) => {}
        }
    }

    /// Offer `value` to every subscriber without waiting.
    fn fan_out(&self, value: Variant) {
        StreamCounters::bump(&self.counters.received);

        let mut gone = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for (topic, tx) in subscribers.iter() {
                match tx.try_send(value.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        StreamCounters::bump(&self.counters.dropped);
                        warn!(
                            connection_id = %self.id,
                            topic = %topic,
                            "Subscriber buffer full, dropping message"
                        );
                    }
                    Err(TrySendError::Closed(_)) => gone.push(topic.clone()),
                }
            }
        }

        // Receivers dropped by their owners; forget their senders.
        if !gone.is_empty() {
            let mut subscribers = self.subscribers.write();
            for topic in gone {
                if subscribers.get(&topic).is_some_and(mpsc::Sender::is_closed) {
                    debug!(connection_id = %self.id, topic = %topic, "Receiver dropped, removing topic");
                    subscribers.remove(&topic);
                }
            }
        }
    }

    /// Stop everything: cancel tasks, end every subscription, close the socket.
    async fn terminate(&self) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        self.set_state(ConnectionState::Closing);
        self.shutdown.send_replace(true);

        let topics = {
            let mut subscribers = self.subscribers.write();
            let count = subscribers.len();
            subscribers.clear();
            count
        };

        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = timeout(self.config.write_timeout(), sink.send(Message::Close(None))).await;
            let _ = timeout(self.config.write_timeout(), sink.close()).await;
        }

        self.set_state(ConnectionState::Closed);
        debug!(connection_id = %self.id, topics, "Stream terminated");
    }
}

/// A live duplex stream to one address.
///
/// Created through [`StreamConnection::connect`] (usually via the
/// [`ConnectionRegistry`](super::ConnectionRegistry)). Cloning is not
/// supported; share it behind an `Arc`.
pub struct StreamConnection {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamConnection {
    /// Dial `address` and start the read loop and heartbeat.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] if the address or headers are invalid, the
    /// peer refuses the upgrade, or the handshake does not complete within
    /// `handshake_timeout`. Returns a configuration error for unusable
    /// settings.
    pub async fn connect(address: impl Into<String>, config: StreamConfig) -> Result<Self> {
        config.validate()?;

        let address = address.into();
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            address,
            config,
            state: RwLock::new(ConnectionState::Connecting),
            last_heartbeat: AtomicU64::new(0),
            subscribers: RwLock::new(HashMap::new()),
            sink: tokio::sync::Mutex::new(None),
            shutdown,
            reconnect: Notify::new(),
            counters: StreamCounters::default(),
        });

        info!(connection_id = %shared.id, address = %shared.address, "Connecting stream");
        let ws = dial(&shared.address, &shared.config).await?;
        let (sink, source) = ws.split();
        *shared.sink.lock().await = Some(sink);
        shared.touch();
        shared.set_state(ConnectionState::Open);
        info!(connection_id = %shared.id, address = %shared.address, "Stream open");

        let mut tasks = vec![tokio::spawn(read_loop(Arc::clone(&shared), source))];
        if let Some(period) = shared.config.ping_interval() {
            tasks.push(tokio::spawn(heartbeat_loop(Arc::clone(&shared), period)));
        }

        Ok(Self {
            shared,
            tasks: Mutex::new(tasks),
        })
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.shared.address
    }

    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Open, or re-dialing after a failure.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.shared.state().is_live()
    }

    /// When the peer last proved it was alive.
    #[must_use]
    pub fn last_heartbeat(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        from_epoch_millis(self.shared.last_heartbeat.load(Ordering::Relaxed))
    }

    /// Currently subscribed topics, unordered.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.shared.subscribers.read().keys().cloned().collect()
    }

    /// Messages dropped so far because a subscriber's buffer was full.
    #[must_use]
    pub fn dropped_messages(&self) -> u64 {
        self.shared.counters.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn stats(&self) -> StreamStats {
        StreamStats::collect(
            self.shared.id,
            &self.shared.address,
            self.shared.state(),
            self.shared.subscribers.read().len(),
            &self.shared.counters,
            self.shared.last_heartbeat.load(Ordering::Relaxed),
        )
    }

    /// Receive every message decoded on this connection from now on.
    ///
    /// Each topic has one bounded channel. Subscribing again to a topic
    /// replaces its channel: the previous receiver sees end-of-stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionNotFound`] once the connection is closing
    /// or closed.
    pub fn subscribe(&self, topic: impl Into<String>) -> Result<mpsc::Receiver<Variant>> {
        let topic = topic.into();
        let (tx, rx) = mpsc::channel(self.shared.config.channel_capacity);

        let mut subscribers = self.shared.subscribers.write();
        // Checked under the map lock: termination flips the state before it clears the map.
        if !self.is_live() {
            return Err(Error::not_found(&self.shared.address));
        }
        if subscribers.insert(topic.clone(), tx).is_some() {
            debug!(connection_id = %self.shared.id, topic = %topic, "Replaced existing subscription");
        } else {
            debug!(connection_id = %self.shared.id, topic = %topic, "Subscribed");
        }

        Ok(rx)
    }

    /// Close and forget the topic's channel. Returns whether it existed.
    pub fn unsubscribe(&self, topic: &str) -> bool {
        let removed = self.shared.subscribers.write().remove(topic).is_some();
        if removed {
            debug!(connection_id = %self.shared.id, topic, "Unsubscribed");
        }
        removed
    }

    /// Write one frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionNotFound`] if the connection is closed and
    /// [`Error::Network`] if the socket write fails or times out (including
    /// while a re-dial is in progress).
    pub async fn send(&self, message: impl Into<OutboundMessage>) -> Result<()> {
        if !self.is_live() {
            return Err(Error::not_found(&self.shared.address));
        }

        self.shared.write(message.into().into()).await?;
        StreamCounters::bump(&self.shared.counters.sent);
        Ok(())
    }

    /// Cancel the background tasks, end every subscription and close the
    /// socket. Safe to call more than once.
    pub async fn close(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() && self.shared.state() == ConnectionState::Closed {
            return;
        }

        info!(connection_id = %self.shared.id, address = %self.shared.address, "Closing stream");
        self.shared.shutdown.send_replace(true);

        for mut handle in tasks {
            if timeout(self.shared.config.write_timeout(), &mut handle)
                .await
                .is_err()
            {
                warn!(connection_id = %self.shared.id, "Background task did not stop in time, aborting");
                handle.abort();
            }
        }

        self.shared.terminate().await;
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
        for handle in self.tasks.get_mut().drain(..) {
            handle.abort();
        }
    }
}

/// Open the socket with the configured headers and handshake timeout.
async fn dial(address: &str, config: &StreamConfig) -> Result<WsStream> {
    let handshake = |reason: String| Error::Handshake {
        address: address.to_string(),
        reason,
    };

    let mut request = address
        .into_client_request()
        .map_err(|e| handshake(e.to_string()))?;
    for (name, value) in &config.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| handshake(format!("header name {name:?}: {e}")))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|e| handshake(format!("header {name}: {e}")))?;
        request.headers_mut().insert(header_name, header_value);
    }

    match timeout(config.handshake_timeout(), connect_async(request)).await {
        Ok(Ok((ws, response))) => {
            debug!(address, status = %response.status(), "Handshake complete");
            Ok(ws)
        }
        Ok(Err(e)) => Err(handshake(e.to_string())),
        Err(_) => Err(handshake(format!(
            "timed out after {}ms",
            config.handshake_timeout_ms
        ))),
    }
}

/// Resolve once the cancellation token is triggered.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    // An error means the sender is gone, which only happens with the connection.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn read_loop(shared: Arc<Shared>, mut source: WsSource) {
    let mut shutdown = shared.shutdown.subscribe();
    debug!(connection_id = %shared.id, "Read loop started");

    loop {
        let reason = tokio::select! {
            biased;
            () = cancelled(&mut shutdown) => break,
            () = shared.reconnect.notified() => "heartbeat failed".to_string(),
            frame = source.next() => match frame {
                Some(Ok(Message::Close(frame))) => format!("closed by peer: {frame:?}"),
                Some(Ok(message)) => {
                    shared.on_frame(message).await;
                    continue;
                }
                Some(Err(e)) => e.to_string(),
                None => "stream ended".to_string(),
            },
        };

        if !shared.config.reconnect {
            warn!(
                connection_id = %shared.id,
                address = %shared.address,
                reason = %reason,
                "Stream lost, reconnect disabled"
            );
            shared.terminate().await;
            break;
        }

        warn!(
            connection_id = %shared.id,
            address = %shared.address,
            reason = %reason,
            "Stream lost, will reconnect"
        );
        match reconnect(&shared, &mut shutdown).await {
            Some(next) => source = next,
            None => break,
        }
    }

    debug!(connection_id = %shared.id, "Read loop stopped");
}

/// Re-dial until it succeeds or the connection is cancelled.
///
/// Returns the read half of the new socket, or `None` when cancelled.
async fn reconnect(shared: &Shared, shutdown: &mut watch::Receiver<bool>) -> Option<WsSource> {
    shared.set_state(ConnectionState::Reconnecting);
    if let Some(mut stale) = shared.sink.lock().await.take() {
        let _ = timeout(shared.config.write_timeout(), stale.close()).await;
    }

    let delay = shared.config.reconnect_delay();
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        info!(
            connection_id = %shared.id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting after delay"
        );

        tokio::select! {
            biased;
            () = cancelled(shutdown) => return None,
            () = sleep(delay) => {}
        }

        let dialed = tokio::select! {
            biased;
            () = cancelled(shutdown) => return None,
            result = dial(&shared.address, &shared.config) => result,
        };

        match dialed {
            Ok(ws) => {
                let (sink, source) = ws.split();
                *shared.sink.lock().await = Some(sink);
                shared.touch();
                // A heartbeat failure from the old socket must not tear down the new one.
                let _ = shared.reconnect.notified().now_or_never();
                shared.set_state(ConnectionState::Open);
                StreamCounters::bump(&shared.counters.reconnects);
                info!(
                    connection_id = %shared.id,
                    attempt,
                    topics = shared.subscribers.read().len(),
                    "Reconnected"
                );
                return Some(source);
            }
            Err(e) => {
                StreamCounters::bump(&shared.counters.failed_dials);
                warn!(connection_id = %shared.id, attempt, error = %e, "Reconnect attempt failed");
            }
        }
    }
}

async fn heartbeat_loop(shared: Arc<Shared>, period: Duration) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(connection_id = %shared.id, period_ms = period.as_millis() as u64, "Heartbeat started");

    loop {
        tokio::select! {
            biased;
            () = cancelled(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }

        // Pings during a re-dial would only fail against the missing socket.
        if shared.state() != ConnectionState::Open {
            continue;
        }

        match shared.write(Message::Ping(Vec::new())).await {
            Ok(()) => trace!(connection_id = %shared.id, "Heartbeat sent"),
            Err(e) if shared.config.reconnect => {
                warn!(connection_id = %shared.id, error = %e, "Heartbeat failed, requesting reconnect");
                shared.reconnect.notify_one();
            }
            Err(e) => {
                warn!(connection_id = %shared.id, error = %e, "Heartbeat failed, terminating stream");
                shared.terminate().await;
                break;
            }
        }
    }

    debug!(connection_id = %shared.id, "Heartbeat stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;

    #[test]
    fn test_outbound_conversions() {
        assert_eq!(
            OutboundMessage::from("hello"),
            OutboundMessage::Text("hello".into())
        );
        assert_eq!(
            OutboundMessage::from(vec![1u8, 2]),
            OutboundMessage::Binary(vec![1, 2])
        );
        assert_eq!(
            OutboundMessage::from(serde_json::json!({"op": "subscribe"})),
            OutboundMessage::Text(r#"{"op":"subscribe"}"#.into())
        );
        assert_eq!(
            OutboundMessage::from(Variant::from(vec![Variant::from("a")])),
            OutboundMessage::Text(r#"["a"]"#.into())
        );
    }

    #[test]
    fn test_outbound_into_frame() {
        assert_eq!(
            Message::from(OutboundMessage::Text("x".into())),
            Message::Text("x".into())
        );
        assert_eq!(
            Message::from(OutboundMessage::Binary(vec![7])),
            Message::Binary(vec![7])
        );
    }

    #[tokio::test]
    async fn test_connect_refused_is_handshake_error() {
        let address = testkit::server::unused_address().await;

        let result = StreamConnection::connect(format!("ws://{address}"), testkit::config::stream()).await;

        assert!(matches!(result, Err(Error::Handshake { .. })));
    }

    #[tokio::test]
    async fn test_invalid_address_is_handshake_error() {
        let result = StreamConnection::connect("not a url", testkit::config::stream()).await;
        assert!(matches!(result, Err(Error::Handshake { .. })));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_dialing() {
        let mut config = testkit::config::stream();
        config.channel_capacity = 0;

        let result = StreamConnection::connect("ws://127.0.0.1:1", config).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_open_connection_reports_state() {
        let server = testkit::server::TestServer::start().await;
        let connection = StreamConnection::connect(server.url(), testkit::config::stream())
            .await
            .unwrap();

        assert_eq!(connection.state(), ConnectionState::Open);
        assert!(connection.is_live());
        assert!(connection.last_heartbeat().is_some());
        assert_eq!(connection.address(), server.url());

        connection.close().await;
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_topic_is_noop() {
        let server = testkit::server::TestServer::start().await;
        let connection = StreamConnection::connect(server.url(), testkit::config::stream())
            .await
            .unwrap();

        assert!(!connection.unsubscribe("nothing"));
        connection.close().await;
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_channel() {
        let server = testkit::server::TestServer::start().await;
        let connection = StreamConnection::connect(server.url(), testkit::config::stream())
            .await
            .unwrap();

        let mut first = connection.subscribe("ticker").unwrap();
        let _second = connection.subscribe("ticker").unwrap();

        assert_eq!(connection.topics(), vec!["ticker".to_string()]);
        assert!(first.recv().await.is_none());
        connection.close().await;
    }

    #[tokio::test]
    async fn test_full_buffer_drops_and_counts() {
        let server = testkit::server::TestServer::start().await;
        let mut config = testkit::config::stream();
        config.channel_capacity = 1;
        let connection = StreamConnection::connect(server.url(), config).await.unwrap();
        let mut rx = connection.subscribe("book").unwrap();

        server.publish("one");
        server.publish("two");
        server.publish("three");

        assert!(
            testkit::eventually(|| connection.stats().messages_received == 3).await,
            "messages were not received"
        );
        assert_eq!(connection.dropped_messages(), 2);
        assert_eq!(rx.recv().await, Some(Variant::String("one".into())));
        connection.close().await;
    }

    /// Drop the write half so the next ping fails while the read half stays open.
    async fn fail_writes(connection: &StreamConnection) {
        drop(connection.shared.sink.lock().await.take());
    }

    async fn recv_within(rx: &mut mpsc::Receiver<Variant>) -> Option<Variant> {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting on subscription")
    }

    #[tokio::test]
    async fn test_failed_heartbeat_without_reconnect_terminates() {
        let server = testkit::server::TestServer::start().await;
        let mut config = testkit::config::stream().with_reconnect(false);
        config.ping_interval_ms = 20;
        let connection = StreamConnection::connect(server.url(), config).await.unwrap();
        let mut rx = connection.subscribe("trades").unwrap();

        fail_writes(&connection).await;

        assert!(recv_within(&mut rx).await.is_none());
        assert!(testkit::eventually(|| connection.state() == ConnectionState::Closed).await);
        assert_eq!(connection.stats().reconnects, 0);
        assert_eq!(server.connections(), 1);
        connection.close().await;
    }

    #[tokio::test]
    async fn test_failed_heartbeat_triggers_single_reconnect() {
        let server = testkit::server::TestServer::start().await;
        let mut config = testkit::config::stream();
        config.ping_interval_ms = 20;
        let connection = StreamConnection::connect(server.url(), config).await.unwrap();
        let mut rx = connection.subscribe("trades").unwrap();

        fail_writes(&connection).await;

        assert!(server.wait_for_connections(2).await, "heartbeat failure did not re-dial");
        assert!(
            testkit::eventually(|| connection.state() == ConnectionState::Open
                && connection.stats().reconnects == 1)
            .await
        );

        // Pings flow again on the new socket, and no leftover wake-up causes a second re-dial.
        let pings = server.pings();
        assert!(testkit::eventually(|| server.pings() > pings + 2).await);
        assert_eq!(connection.stats().reconnects, 1);
        assert_eq!(server.connections(), 2);

        server.publish("after");
        assert_eq!(
            recv_within(&mut rx).await,
            Some(Variant::String("after".into()))
        );
        connection.close().await;
    }
}
