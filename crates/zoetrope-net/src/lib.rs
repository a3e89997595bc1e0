//! Fetch transport for the zoetrope streaming core.
//!
//! The pipeline talks to [`Fetcher`], never to a concrete HTTP client; the
//! reqwest-backed [`HttpFetcher`] is the production implementation and
//! [`RetryFetcher`] decorates any fetcher with exponential-backoff retries.
//! Responses carry both network-transferred and decoded byte counts so the
//! bandwidth estimator can ignore cache hits.

#![forbid(unsafe_code)]

mod client;
mod error;
mod retry;
mod traits;
mod types;

pub use client::HttpFetcher;
pub use error::{NetError, NetResult};
pub use retry::RetryFetcher;
pub use traits::Fetcher;
pub use types::{FetchResponse, NetOptions, RetryPolicy};
