//! Exlink - connection management for exchange API clients.
//!
//! This crate provides the network plumbing an exchange client sits on:
//! rate-limited HTTP calls with retries, and long-lived WebSocket streams
//! that fan messages out to topic subscribers and heal themselves after
//! network failures.
//!
//! # Architecture
//!
//! - **`rate_limiter`** - Per-key sliding-window admission control
//! - **`http`** - Request descriptors, the retry schedule and the executor
//! - **`stream`** - Stream connections and the address-keyed registry
//! - **`manager`** - Explicitly constructed composition of all of the above
//!
//! # Modules
//!
//! - [`config`] - Configuration loading from TOML files
//! - [`error`] - Error types for the crate
//! - [`value`] - The dynamic value type decoded from network payloads
//!
//! # Features
//!
//! - `testkit` - Expose the local WebSocket test server and test configs
//!
//! # Example
//!
//! ```no_run
//! use exlink::config::NetworkConfig;
//! use exlink::http::RequestDescriptor;
//! use exlink::NetworkManager;
//!
//! # async fn run() -> exlink::Result<()> {
//! let manager = NetworkManager::new(&NetworkConfig::default())?;
//! let ticker = manager
//!     .request(&RequestDescriptor::get("https://api.example.com/ticker").rate_limit_key("public"))
//!     .await?;
//!
//! let stream = manager.connect("wss://stream.example.com/ws").await?;
//! let mut trades = stream.subscribe("trades")?;
//! while let Some(trade) = trades.recv().await {
//!     println!("{ticker:?} {trade:?}");
//! }
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod manager;
pub mod rate_limiter;
pub mod stream;
pub mod value;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use error::{Error, Result};
pub use manager::NetworkManager;
pub use rate_limiter::RateLimiter;
pub use value::Variant;
