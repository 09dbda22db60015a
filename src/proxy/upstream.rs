use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode};
use thiserror::Error;
use url::Url;

use crate::{
    config::ProxyConfig,
    error::{AppError, AppResult},
};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("{0}")]
    Unreachable(String),
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Timeout(msg) => AppError::UpstreamTimeout(msg),
            FetchError::Unreachable(msg) => AppError::UpstreamUnreachable(msg),
        }
    }
}

pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl UpstreamResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A single upstream round trip. Implementations must not follow redirects.
#[async_trait]
pub trait UpstreamFetch: Send + Sync {
    async fn fetch(&self, request: UpstreamRequest) -> Result<UpstreamResponse, FetchError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    response_timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: &ProxyConfig) -> AppResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(!config.verify_ssl)
            .pool_idle_timeout(Duration::from_secs(90));

        if let Some(proxy_url) = config.upstream_proxy.as_deref() {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
                AppError::Internal(format!("Invalid upstream proxy '{}': {}", proxy_url, e))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            response_timeout: config.response_timeout(),
        })
    }
}

#[async_trait]
impl UpstreamFetch for HttpFetcher {
    async fn fetch(&self, request: UpstreamRequest) -> Result<UpstreamResponse, FetchError> {
        let host = request.url.host_str().unwrap_or_default().to_string();
        let send = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .send();

        let response = match tokio::time::timeout(self.response_timeout, send).await {
            Err(_) => return Err(FetchError::Timeout(format!("response headers from {}", host))),
            Ok(Err(e)) if e.is_timeout() => {
                return Err(FetchError::Timeout(format!("connection to {}", host)))
            }
            Ok(Err(e)) => {
                return Err(FetchError::Unreachable(format!(
                    "Failed to connect to {}: {}",
                    host, e
                )))
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes_stream().map_err(io::Error::other).boxed();

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
