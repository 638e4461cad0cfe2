//! Configuration loading and validation.
//!
//! Configuration is loaded from a TOML file. Every section is optional and
//! falls back to the defaults used by the exchange clients in production.
//! The outbound proxy can be overridden with the `EXLINK_PROXY` environment
//! variable.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{ConfigError, Result};
use crate::http::RetryPolicy;

/// Environment variable that overrides `http.proxy`.
pub const PROXY_ENV: &str = "EXLINK_PROXY";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Shared HTTP transport settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Default per-request timeout (milliseconds), used when a request sets none.
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
    /// Idle pooled connections kept per host.
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
    /// How long an idle pooled connection is kept (milliseconds).
    #[serde(default = "default_pool_idle_timeout_ms")]
    pub pool_idle_timeout_ms: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Proxy applied to every outbound request, e.g. `http://127.0.0.1:8888`.
    #[serde(default)]
    pub proxy: Option<String>,
}

const fn default_http_timeout_ms() -> u64 {
    30_000
}

const fn default_pool_max_idle_per_host() -> usize {
    10
}

const fn default_pool_idle_timeout_ms() -> u64 {
    90_000
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_http_timeout_ms(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_ms: default_pool_idle_timeout_ms(),
            user_agent: None,
            proxy: None,
        }
    }
}

impl HttpConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub const fn pool_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_idle_timeout_ms)
    }
}

/// Retry schedule for one-shot requests.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    1_000
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

const fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.backoff_factor,
        )
    }
}

/// Admission ceilings per rate-limit key.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Ceiling for keys without an explicit entry in `limits`.
    #[serde(default = "default_ceiling")]
    pub default_limit: usize,
    /// Length of the sliding window (milliseconds).
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Explicit ceilings, e.g. `binance = 1200`.
    #[serde(default)]
    pub limits: HashMap<String, usize>,
}

const fn default_ceiling() -> usize {
    100
}

const fn default_window_ms() -> u64 {
    60_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_limit: default_ceiling(),
            window_ms: default_window_ms(),
            limits: HashMap::new(),
        }
    }
}

impl RateLimitConfig {
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Settings for one streaming connection.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Extra headers sent with the opening handshake.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Re-dial after the socket fails instead of terminating.
    #[serde(default = "default_true")]
    pub reconnect: bool,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Interval between heartbeat pings (milliseconds); 0 disables the heartbeat.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Wait before each re-dial attempt (milliseconds).
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Buffered messages per topic before new ones are dropped.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

const fn default_true() -> bool {
    true
}

const fn default_handshake_timeout_ms() -> u64 {
    10_000
}

const fn default_ping_interval_ms() -> u64 {
    30_000
}

const fn default_reconnect_delay_ms() -> u64 {
    5_000
}

const fn default_write_timeout_ms() -> u64 {
    10_000
}

const fn default_channel_capacity() -> usize {
    100
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            headers: HashMap::new(),
            reconnect: default_true(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Heartbeat interval, or `None` when heartbeats are disabled.
    #[must_use]
    pub const fn ping_interval(&self) -> Option<Duration> {
        if self.ping_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.ping_interval_ms))
        }
    }

    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    #[must_use]
    pub const fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Check the values a connection cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stream.channel_capacity",
                reason: "must be > 0".into(),
            }
            .into());
        }
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stream.handshake_timeout_ms",
                reason: "must be > 0".into(),
            }
            .into());
        }
        if self.write_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stream.write_timeout_ms",
                reason: "must be > 0".into(),
            }
            .into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    /// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format.as_str() {
            "json" => {
                fmt().json().with_env_filter(filter).init();
            }
            _ => {
                fmt().with_env_filter(filter).init();
            }
        }
    }
}

impl NetworkConfig {
    /// Load and validate `path`, honouring the `EXLINK_PROXY` override.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with_proxy(path, std::env::var(PROXY_ENV).ok())
    }

    /// Load and validate `path`, replacing `http.proxy` with `proxy` when given.
    pub fn load_with_proxy<P: AsRef<Path>>(path: P, proxy: Option<String>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        let mut config = Self::parse(&content)?;
        config.apply_proxy_override(proxy);
        config.validate()?;
        Ok(config)
    }

    /// Replace `http.proxy` with a non-empty override.
    pub fn apply_proxy_override(&mut self, proxy: Option<String>) {
        if let Some(proxy) = proxy.filter(|p| !p.is_empty()) {
            self.http.proxy = Some(proxy);
        }
    }

    /// Parse TOML without touching the environment or validating.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content).map_err(ConfigError::Parse)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.http.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "http.timeout_ms",
                reason: "must be > 0".into(),
            }
            .into());
        }
        if let Some(proxy) = &self.http.proxy {
            if proxy.trim().is_empty() {
                return Err(ConfigError::MissingField { field: "http.proxy" }.into());
            }
            url::Url::parse(proxy).map_err(|e| ConfigError::InvalidValue {
                field: "http.proxy",
                reason: e.to_string(),
            })?;
        }
        if !(self.retry.backoff_factor.is_finite() && self.retry.backoff_factor >= 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "retry.backoff_factor",
                reason: "must be a finite, non-negative number".into(),
            }
            .into());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "retry.base_delay_ms",
                reason: "must be <= retry.max_delay_ms".into(),
            }
            .into());
        }
        if self.rate_limit.window_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rate_limit.window_ms",
                reason: "must be > 0".into(),
            }
            .into());
        }
        self.stream.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = NetworkConfig::parse("").unwrap();

        assert_eq!(config.http.timeout(), Duration::from_secs(30));
        assert_eq!(config.http.pool_max_idle_per_host, 10);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.rate_limit.default_limit, 100);
        assert_eq!(config.rate_limit.window(), Duration::from_secs(60));
        assert!(config.stream.reconnect);
        assert_eq!(config.stream.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.stream.channel_capacity, 100);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_sections() {
        let config = NetworkConfig::parse(
            r#"
            [http]
            timeout_ms = 5000
            user_agent = "exlink-test"

            [retry]
            max_attempts = 5
            base_delay_ms = 200

            [rate_limit]
            default_limit = 10

            [rate_limit.limits]
            binance = 1200

            [stream]
            reconnect = false
            ping_interval_ms = 0

            [stream.headers]
            Origin = "https://example.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.http.timeout(), Duration::from_secs(5));
        assert_eq!(config.http.user_agent.as_deref(), Some("exlink-test"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.rate_limit.limits.get("binance"), Some(&1200));
        assert!(!config.stream.reconnect);
        assert_eq!(config.stream.ping_interval(), None);
        assert_eq!(
            config.stream.headers.get("Origin").map(String::as_str),
            Some("https://example.com")
        );
    }

    #[test]
    fn test_retry_config_into_policy() {
        let policy = RetryPolicy::from(&RetryConfig::default());
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay(1), Duration::from_secs(2));
    }

    #[test]
    fn test_validate_rejects_zero_channel_capacity() {
        let mut config = NetworkConfig::default();
        config.stream.channel_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(Error::Config(ConfigError::InvalidValue {
                field: "stream.channel_capacity",
                ..
            }))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_proxy() {
        let mut config = NetworkConfig::default();
        config.http.proxy = Some("not a url".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_proxy() {
        let mut config = NetworkConfig::default();
        config.http.proxy = Some("  ".into());
        assert!(matches!(
            config.validate(),
            Err(Error::Config(ConfigError::MissingField { field: "http.proxy" }))
        ));
    }

    #[test]
    fn test_proxy_override_ignores_empty_value() {
        let mut config = NetworkConfig::default();
        config.http.proxy = Some("http://file-proxy:8080".into());

        config.apply_proxy_override(Some(String::new()));
        assert_eq!(config.http.proxy.as_deref(), Some("http://file-proxy:8080"));

        config.apply_proxy_override(None);
        assert_eq!(config.http.proxy.as_deref(), Some("http://file-proxy:8080"));

        config.apply_proxy_override(Some("http://env-proxy:3128".into()));
        assert_eq!(config.http.proxy.as_deref(), Some("http://env-proxy:3128"));
    }

    #[test]
    fn test_validate_rejects_base_above_max() {
        let mut config = NetworkConfig::default();
        config.retry.base_delay_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error_is_config_error() {
        let result = NetworkConfig::parse("[http\ntimeout_ms = ");
        assert!(matches!(result, Err(Error::Config(ConfigError::Parse(_)))));
    }
}
