use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{error::NetResult, types::FetchResponse};

/// Cancel-aware fetch transport.
///
/// Implementations must resolve promptly with [`crate::NetError::Cancelled`]
/// once `cancel` fires; the pipeline cancels all in-flight fetches on seeks,
/// quality changes and quota recovery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: Url, cancel: CancellationToken) -> NetResult<FetchResponse>;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::{NetError, RetryFetcher, RetryPolicy};

    #[tokio::test]
    async fn retry_decorator_stops_on_permanent_errors() {
        let mut mock = MockFetcher::new();
        // A 404 must be surfaced after exactly one attempt.
        mock.expect_fetch()
            .times(1)
            .returning(|_, _| Err(NetError::Status { status: 404 }));

        let fetcher = RetryFetcher::new(mock, RetryPolicy::default());
        let url = Url::parse("https://cdn.example/gone.m4s").unwrap();
        let err = fetcher
            .fetch(url, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn retry_decorator_passes_success_through() {
        let mut mock = MockFetcher::new();
        mock.expect_fetch().times(1).returning(|_, _| {
            Ok(FetchResponse {
                bytes: Bytes::from_static(b"data"),
                status: 200,
                elapsed: Duration::from_millis(20),
                transferred_bytes: 4,
                resource_bytes: 4,
            })
        });

        let fetcher = RetryFetcher::new(mock, RetryPolicy::default());
        let url = Url::parse("https://cdn.example/seg.m4s").unwrap();
        let response = fetcher.fetch(url, CancellationToken::new()).await.unwrap();
        assert_eq!(response.status, 200);
    }
}
