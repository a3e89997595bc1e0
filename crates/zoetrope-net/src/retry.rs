use async_trait::async_trait;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::{
    error::{NetError, NetResult},
    traits::Fetcher,
    types::{FetchResponse, RetryPolicy},
};

/// Retry decorator: wraps any [`Fetcher`] with exponential-backoff retries
/// for retryable errors. Cancellation aborts immediately, including during a
/// backoff sleep.
pub struct RetryFetcher<F> {
    inner: F,
    policy: RetryPolicy,
}

impl<F: Fetcher> RetryFetcher<F> {
    pub fn new(inner: F, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<F: Fetcher> Fetcher for RetryFetcher<F> {
    async fn fetch(&self, url: Url, cancel: CancellationToken) -> NetResult<FetchResponse> {
        let mut attempt = 0u32;
        loop {
            match self.inner.fetch(url.clone(), cancel.clone()).await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    if !error.is_retryable() || attempt >= self.policy.max_retries {
                        return Err(error);
                    }
                    attempt += 1;
                    let delay = self.policy.delay_for_attempt(attempt);
                    debug!(url = %url, attempt, delay_ms = delay.as_millis() as u64, error = %error, "retrying fetch");
                    tokio::select! {
                        () = sleep(delay) => {}
                        () = cancel.cancelled() => return Err(NetError::Cancelled),
                    }
                }
            }
        }
    }
}
