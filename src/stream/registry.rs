//! Address-keyed registry of live stream connections.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use super::connection::{OutboundMessage, StreamConnection};
use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::value::Variant;

/// Tracks at most one live [`StreamConnection`] per address.
///
/// Concurrent [`get_or_connect`](Self::get_or_connect) calls for the same
/// address dial once; every caller receives the same shared handle.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<StreamConnection>>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live connection for `address`, dialing it if needed.
    ///
    /// A tracked connection that is no longer live (closed after its socket
    /// failed with reconnection disabled) is replaced by a fresh dial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] if dialing fails. Nothing is tracked for
    /// `address` in that case.
    pub async fn get_or_connect(
        &self,
        address: &str,
        config: &StreamConfig,
    ) -> Result<Arc<StreamConnection>> {
        if let Some(existing) = self.live(address).await {
            return Ok(existing);
        }

        // The write lock is held across the dial so racing callers share one socket.
        // Lookups and closes for other addresses wait behind it, for at most
        // `handshake_timeout`.
        let mut connections = self.connections.write().await;
        if let Some(existing) = connections.get(address) {
            if existing.is_live() {
                return Ok(Arc::clone(existing));
            }
            debug!(address, "Replacing dead connection");
            if let Some(stale) = connections.remove(address) {
                stale.close().await;
            }
        }

        let connection = Arc::new(StreamConnection::connect(address, config.clone()).await?);
        connections.insert(address.to_string(), Arc::clone(&connection));
        info!(address, connection_id = %connection.id(), tracked = connections.len(), "Connection registered");
        Ok(connection)
    }

    async fn live(&self, address: &str) -> Option<Arc<StreamConnection>> {
        self.connections
            .read()
            .await
            .get(address)
            .filter(|c| c.is_live())
            .cloned()
    }

    /// The tracked connection for `address`, live or not.
    pub async fn get(&self, address: &str) -> Option<Arc<StreamConnection>> {
        self.connections.read().await.get(address).cloned()
    }

    /// Subscribe to `topic` on the connection tracked for `address`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionNotFound`] if nothing live is tracked for
    /// `address`.
    pub async fn subscribe(
        &self,
        address: &str,
        topic: impl Into<String>,
    ) -> Result<mpsc::Receiver<Variant>> {
        self.require(address).await?.subscribe(topic)
    }

    /// Send one frame on the connection tracked for `address`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionNotFound`] if nothing live is tracked for
    /// `address`, or the connection's own send error.
    pub async fn send(&self, address: &str, message: impl Into<OutboundMessage>) -> Result<()> {
        self.require(address).await?.send(message).await
    }

    async fn require(&self, address: &str) -> Result<Arc<StreamConnection>> {
        self.live(address)
            .await
            .ok_or_else(|| Error::not_found(address))
    }

    /// Stop tracking `address` and close its connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionNotFound`] if nothing is tracked for
    /// `address`.
    pub async fn close(&self, address: &str) -> Result<()> {
        let removed = self.connections.write().await.remove(address);
        let Some(connection) = removed else {
            return Err(Error::not_found(address));
        };

        connection.close().await;
        info!(address, "Connection closed");
        Ok(())
    }

    /// Close every tracked connection concurrently and forget them all.
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.connections.write().await.drain().collect();
        if drained.is_empty() {
            return;
        }

        let count = drained.len();
        join_all(drained.iter().map(|(_, connection)| connection.close())).await;
        info!(count, "All connections closed");
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Tracked addresses, sorted.
    pub async fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<_> = self.connections.read().await.keys().cloned().collect();
        addresses.sort();
        addresses
    }
}
