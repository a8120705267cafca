use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use url::Url;

use super::models::ClientConfig;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("could not connect: {0}")]
    Offline(#[source] reqwest::Error),

    #[error("server returned {0}")]
    NotFound(StatusCode),

    #[error("server returned {0}")]
    Status(StatusCode),

    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("transfer interrupted: {0}")]
    Interrupted(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            return TransportError::Offline(e);
        }
        match e.status() {
            Some(status) => TransportError::from_status(status).unwrap_or(TransportError::Request(e)),
            None => TransportError::Request(e),
        }
    }
}

impl TransportError {
    fn from_status(status: StatusCode) -> Option<Self> {
        match status {
            s if s.is_success() => None,
            StatusCode::NOT_FOUND | StatusCode::GONE => Some(TransportError::NotFound(status)),
            s => Some(TransportError::Status(s)),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Source of bytes for a single resource.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Returns (content length, body stream) once response headers arrive.
    async fn open(&self, url: &Url) -> Result<(Option<u64>, ByteStream)>;
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut builder = Client::builder().user_agent(config.user_agent);
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build().map_err(TransportError::Request)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn open(&self, url: &Url) -> Result<(Option<u64>, ByteStream)> {
        let response = self.client.get(url.clone()).send().await?;

        if let Some(err) = TransportError::from_status(response.status()) {
            return Err(err);
        }

        let total_size = response.content_length();
        let stream = response
            .bytes_stream()
            .map_err(TransportError::from)
            .boxed();

        Ok((total_size, stream))
    }
}
