use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use url::Url;

use crate::{
    error::{NetError, NetResult},
    traits::Fetcher,
    types::{FetchResponse, NetOptions},
};

/// reqwest-backed [`Fetcher`].
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: Client,
    options: NetOptions,
}

impl HttpFetcher {
    pub fn new(options: NetOptions) -> Self {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .build()
            .unwrap_or_default();
        Self { client, options }
    }

    pub fn options(&self) -> &NetOptions {
        &self.options
    }

    async fn fetch_inner(&self, url: Url) -> NetResult<FetchResponse> {
        let start = Instant::now();

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout
            } else {
                NetError::Connect(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(NetError::Status { status });
        }

        // Content-Length reflects wire bytes; the decoded body may be
        // larger under transport compression.
        let transferred = response.content_length();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| NetError::Body(e.to_string()))?;

        let elapsed = start.elapsed();
        let resource_bytes = bytes.len() as u64;
        let transferred_bytes = transferred.unwrap_or(resource_bytes);

        trace!(
            url = %url,
            status,
            resource_bytes,
            transferred_bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            "fetch complete"
        );

        Ok(FetchResponse {
            bytes,
            status,
            elapsed,
            transferred_bytes,
            resource_bytes,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: Url, cancel: CancellationToken) -> NetResult<FetchResponse> {
        tokio::select! {
            result = self.fetch_inner(url) => result,
            () = cancel.cancelled() => Err(NetError::Cancelled),
        }
    }
}
