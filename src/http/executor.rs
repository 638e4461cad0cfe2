//! Rate-limited, retrying HTTP executor.
//!
//! One [`RequestExecutor`] wraps the process-wide pooled `reqwest` client.
//! Every call goes through the same sequence:
//!
//! 1. **Admission**: when the descriptor names a rate-limit key, the shared
//!    [`RateLimiter`] is consulted once. A denial fails the call with
//!    [`Error::RateLimited`] before any I/O.
//! 2. **Attempt**: the request is sent. Transport failures become
//!    [`Error::Network`], statuses of 400 and above become [`Error::Http`].
//! 3. **Retry**: retryable failures are retried after
//!    [`RetryPolicy::delay`] while attempts remain and the descriptor allows it.
//! 4. **Decode**: a successful body is decoded into a [`Variant`], falling back
//!    to plain text when it is not JSON.

use std::sync::Arc;

use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Proxy, RequestBuilder, Url};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::request::{RequestBody, RequestDescriptor};
use super::retry::RetryPolicy;
use crate::config::HttpConfig;
use crate::error::{ConfigError, Error, Result};
use crate::rate_limiter::RateLimiter;
use crate::value::Variant;

pub struct RequestExecutor {
    /// Pooled transport shared by every call; cheap to clone, safe to share.
    client: Client,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl RequestExecutor {
    /// Build the shared transport from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy URL is rejected or the TLS backend
    /// cannot be initialised.
    pub fn new(config: &HttpConfig, policy: RetryPolicy, limiter: Arc<RateLimiter>) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout());

        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        if let Some(proxy) = &config.proxy {
            let proxy = Proxy::all(proxy).map_err(|e| ConfigError::InvalidValue {
                field: "http.proxy",
                reason: e.to_string(),
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::network("http client", e))?;

        Ok(Self {
            client,
            limiter,
            policy,
        })
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Issue the request described by `request` and decode the response.
    ///
    /// # Errors
    ///
    /// - [`Error::RateLimited`] when the rate-limit key has no room; never retried.
    /// - [`Error::Network`] / [`Error::Http`] from the last attempt once retries
    ///   are exhausted (or immediately when `retry` is false).
    /// - [`Error::Url`] / [`Error::InvalidRequest`] when the request cannot be
    ///   built; never retried.
    pub async fn execute(&self, request: &RequestDescriptor) -> Result<Variant> {
        if let Some(key) = &request.rate_limit_key {
            if !self.limiter.allow(key) {
                warn!(key = %key, url = %request.url, "Rate limited, request not sent");
                return Err(Error::RateLimited { key: key.clone() });
            }
        }

        let max_attempts = if request.retry {
            self.policy.max_attempts()
        } else {
            0
        };

        let mut attempt: u32 = 0;
        loop {
            match self.attempt(request).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(url = %request.url, attempt, "Request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    attempt += 1;
                    let delay = self.policy.delay(attempt);
                    warn!(
                        url = %request.url,
                        method = %request.method,
                        error = %e,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Request failed, retrying after delay"
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    debug!(url = %request.url, error = %e, attempt, "Request failed");
                    return Err(e);
                }
            }
        }
    }

    /// One attempt: send, check the status, decode.
    async fn attempt(&self, request: &RequestDescriptor) -> Result<Variant> {
        let response = self
            .build(request)?
            .send()
            .await
            .map_err(|e| Error::network(&request.url, e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::network(&request.url, e))?;

        if status.as_u16() >= 400 {
            return Err(Error::Http {
                url: request.url.clone(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(Variant::decode(&body))
    }

    fn build(&self, request: &RequestDescriptor) -> Result<RequestBuilder> {
        let url = Url::parse(&request.url)?;
        let mut builder = self.client.request(request.method.clone(), url);

        for (name, value) in &request.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::InvalidRequest(format!("header name {name:?}: {e}")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| Error::InvalidRequest(format!("header {name}: {e}")))?;
            builder = builder.header(header_name, header_value);
        }

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        builder = match &request.body {
            Some(RequestBody::Text(text)) => builder.body(text.clone()),
            Some(RequestBody::Bytes(bytes)) => builder.body(bytes.clone()),
            Some(RequestBody::Json(value)) => {
                let json = serde_json::to_vec(value)?;
                if !request.has_header(CONTENT_TYPE.as_str()) {
                    builder = builder.header(CONTENT_TYPE, "application/json");
                }
                builder.body(json)
            }
            None => builder,
        };

        Ok(builder)
    }
}
