//! Top-level composition of the limiter, the executor and the stream registry.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::{NetworkConfig, StreamConfig};
use crate::error::Result;
use crate::http::{RequestDescriptor, RequestExecutor, RetryPolicy};
use crate::rate_limiter::RateLimiter;
use crate::stream::{ConnectionRegistry, OutboundMessage, StreamConnection};
use crate::value::Variant;

/// Owns every shared network resource of a process.
///
/// Build one at startup and pass it (or an `Arc` of it) to whatever needs
/// network access. Call [`shutdown`](Self::shutdown) before exiting so every
/// stream is closed cleanly.
pub struct NetworkManager {
    executor: RequestExecutor,
    registry: ConnectionRegistry,
    limiter: Arc<RateLimiter>,
    stream_defaults: StreamConfig,
}

impl NetworkManager {
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        config.validate()?;

        // Another component may have installed a provider first; either is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let executor = RequestExecutor::new(
            &config.http,
            RetryPolicy::from(&config.retry),
            Arc::clone(&limiter),
        )?;

        info!(
            default_limit = config.rate_limit.default_limit,
            max_attempts = config.retry.max_attempts,
            "Network manager ready"
        );

        Ok(Self {
            executor,
            registry: ConnectionRegistry::new(),
            limiter,
            stream_defaults: config.stream.clone(),
        })
    }

    #[must_use]
    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    #[must_use]
    pub fn stream_defaults(&self) -> &StreamConfig {
        &self.stream_defaults
    }

    /// Execute one HTTP request. See [`RequestExecutor::execute`].
    pub async fn request(&self, request: &RequestDescriptor) -> Result<Variant> {
        self.executor.execute(request).await
    }

    /// Get or open the stream for `address` with the configured defaults.
    pub async fn connect(&self, address: &str) -> Result<Arc<StreamConnection>> {
        self.registry
            .get_or_connect(address, &self.stream_defaults)
            .await
    }

    /// Get or open the stream for `address` with explicit settings.
    ///
    /// Settings only apply when a new connection is dialed.
    pub async fn connect_with(
        &self,
        address: &str,
        config: &StreamConfig,
    ) -> Result<Arc<StreamConnection>> {
        self.registry.get_or_connect(address, config).await
    }

    pub async fn subscribe(
        &self,
        address: &str,
        topic: impl Into<String>,
    ) -> Result<mpsc::Receiver<Variant>> {
        self.registry.subscribe(address, topic).await
    }

    pub async fn send(&self, address: &str, message: impl Into<OutboundMessage>) -> Result<()> {
        self.registry.send(address, message).await
    }

    pub async fn close(&self, address: &str) -> Result<()> {
        self.registry.close(address).await
    }

    /// Close every stream.
    pub async fn shutdown(&self) {
        self.registry.close_all().await;
        info!("Network manager shut down");
    }
}
