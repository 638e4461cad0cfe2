use thiserror::Error;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

#[derive(Error, Debug)]
pub enum Error {
    /// Admission denied by the rate limiter before any I/O was attempted.
    #[error("rate limit exceeded for {key}")]
    RateLimited { key: String },

    /// Transport-level failure: DNS, connect, TLS, timeout or a broken socket.
    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },

    /// The remote answered with a status of 400 or above.
    #[error("HTTP {status} from {url}: {body}")]
    Http {
        url: String,
        status: u16,
        body: String,
    },

    /// No live stream is tracked for the address.
    #[error("no connection tracked for {address}")]
    ConnectionNotFound { address: String },

    /// Opening a stream failed.
    #[error("handshake with {address} failed: {reason}")]
    Handshake { address: String, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Whether a request executor may try the call again.
    ///
    /// Only transport failures and HTTP error statuses qualify; everything
    /// else describes a request that would fail the same way every time.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Http { .. })
    }

    pub(crate) fn network(url: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Network {
            url: url.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn not_found(address: impl Into<String>) -> Self {
        Self::ConnectionNotFound {
            address: address.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
