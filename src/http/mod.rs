//! One-shot HTTP calls: request descriptors, the retry schedule and the
//! rate-limited executor.

mod executor;
mod request;
mod retry;

pub use executor::RequestExecutor;
pub use request::{RequestBody, RequestDescriptor};
pub use retry::RetryPolicy;
pub use reqwest::Method;
