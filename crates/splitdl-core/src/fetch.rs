//! Byte transport used by the splitter
//!
//! The splitter only needs an ordered stream of byte chunks and, when the
//! server is willing to say, the total length up front. `HttpFetcher` is the
//! production implementation on top of reqwest.

use crate::error::SplitdlError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Ordered body chunks of a remote resource
pub type ByteStream = BoxStream<'static, Result<Bytes, SplitdlError>>;

/// An opened remote resource
pub struct FetchResponse {
    /// Length declared by the server, if any
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Opens remote resources as chunk streams
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn open(&self, url: &str) -> Result<FetchResponse, SplitdlError>;
}

/// Fetcher backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, SplitdlError> {
        let client = Client::builder()
            .user_agent(concat!("splitdl/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .read_timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn open(&self, url: &str) -> Result<FetchResponse, SplitdlError> {
        let parsed = url::Url::parse(url).map_err(|_| SplitdlError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SplitdlError::InvalidUrl(url.to_string()));
        }

        let response = self.client.get(parsed).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SplitdlError::ServerError {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string(),
            });
        }

        let content_length = response.content_length();
        debug!("Opened {}: status {}, length {:?}", url, status, content_length);

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(SplitdlError::from))
            .boxed();

        Ok(FetchResponse {
            content_length,
            body,
        })
    }
}
