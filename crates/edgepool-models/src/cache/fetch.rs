//! Streaming download of weight blobs.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::time::Duration;
use tracing::debug;

use super::error::{CacheError, CacheResult};

/// An in-flight download.
pub struct WeightStream {
    /// Length announced by the server, if any.
    pub content_length: Option<u64>,
    /// The body, chunk by chunk.
    pub chunks: BoxStream<'static, CacheResult<Bytes>>,
}

impl std::fmt::Debug for WeightStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightStream")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Source of weight downloads.
#[async_trait]
pub trait WeightFetcher: Send + Sync {
    /// Starts downloading the blob at `url`.
    ///
    /// # Errors
    /// Returns `CacheError::Network` if the request fails or the server
    /// answers with a non-success status.
    async fn fetch(&self, url: &str) -> CacheResult<WeightStream>;
}

/// Fetches weights over HTTP(S) with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher with a connect timeout.
    ///
    /// # Errors
    /// Returns `CacheError::Network` if the HTTP client cannot be built.
    pub fn new() -> CacheResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    /// Creates a fetcher around an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WeightFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> CacheResult<WeightStream> {
        debug!(url, "Requesting weights");
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::Network(format!("HTTP {} for {url}", status.as_u16())));
        }

        let content_length = response.content_length();
        let chunks = response.bytes_stream().map(|chunk| chunk.map_err(CacheError::from)).boxed();
        Ok(WeightStream { content_length, chunks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(stream: WeightStream) -> CacheResult<Vec<u8>> {
        let mut body = Vec::new();
        let mut chunks = stream.chunks;
        while let Some(chunk) = chunks.next().await {
            body.extend_from_slice(&chunk?);
        }
        Ok(body)
    }

    #[tokio::test]
    async fn test_fetch_streams_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/weights/tiny.bin")
            .with_status(200)
            .with_body(vec![1u8, 2, 3, 4, 5])
            .create_async()
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let stream = fetcher.fetch(&format!("{}/weights/tiny.bin", server.url())).await.unwrap();
        assert_eq!(stream.content_length, Some(5));
        assert_eq!(collect(stream).await.unwrap(), vec![1, 2, 3, 4, 5]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_non_success_status_is_network_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/missing.bin").with_status(404).create_async().await;

        let fetcher = HttpFetcher::new().unwrap();
        let err = fetcher.fetch(&format!("{}/missing.bin", server.url())).await.unwrap_err();
        match err {
            CacheError::Network(message) => assert!(message.contains("404")),
            other => panic!("expected network error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host_is_network_error() {
        let fetcher = HttpFetcher::new().unwrap();
        let result = fetcher.fetch("http://127.0.0.1:1/weights.bin").await;
        assert!(matches!(result, Err(CacheError::Network(_))));
    }
}
