use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Client, Response};
use tokio::time::timeout;
use tracing::debug;
use url::Url;

use crate::error::{Result, ValidationError};

/// Retrieves the raw bytes of a document
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `location`: an http(s) URL, a `file://` URL or a local path.
    async fn fetch(&self, location: &str) -> Result<Vec<u8>>;
}

/// Answers whether a URL resolves to a successful response
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UrlProbe: Send + Sync {
    async fn resolves(&self, url: &str) -> bool;
}

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Largest response body accepted, in bytes
    pub max_body_bytes: u64,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_body_bytes: 64 * 1024 * 1024,
            user_agent: format!("validate-metadata/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Where a document lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Remote(Url),
    Local(PathBuf),
}

impl Location {
    pub fn parse(location: &str) -> Result<Self> {
        let invalid = |reason: &str| ValidationError::InvalidLocation {
            location: location.to_string(),
            reason: reason.to_string(),
        };

        match Url::parse(location) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Ok(Location::Remote(url)),
                "file" => url
                    .to_file_path()
                    .map(Location::Local)
                    .map_err(|_| invalid("file URL does not name a local path")),
                // A single letter scheme is a Windows drive, not a URL
                scheme if scheme.len() == 1 => Ok(Location::Local(PathBuf::from(location))),
                scheme => Err(invalid(&format!("unsupported scheme '{}'", scheme))),
            },
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Ok(Location::Local(PathBuf::from(location)))
            }
            Err(e) => Err(invalid(&e.to_string())),
        }
    }
}

/// Async HTTP client for documents, catalog responses and link checks.
///
/// Every request is a single attempt bounded by the configured timeout.
pub struct HttpFetcher {
    client: Client,
    config: HttpClientConfig,
}

impl HttpFetcher {
    /// Create a new HTTP fetcher with the given configuration
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(&config.user_agent)
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(ValidationError::from)?;

        Ok(Self { client, config })
    }

    /// Download `url`, rejecting non-2xx responses and oversized bodies.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.make_request(url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ValidationError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
                message: format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                ),
            });
        }

        let limit = self.config.max_body_bytes;
        if let Some(length) = response.content_length()
            && length > limit
        {
            return Err(self.too_large(url, length));
        }

        let mut buffer = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = TryStreamExt::try_next(&mut stream)
            .await
            .map_err(ValidationError::from)?
        {
            buffer.extend_from_slice(&chunk);
            if buffer.len() as u64 > limit {
                return Err(self.too_large(url, buffer.len() as u64));
            }
        }

        Ok(buffer)
    }

    fn too_large(&self, url: &str, size: u64) -> ValidationError {
        ValidationError::InvalidLocation {
            location: url.to_string(),
            reason: format!(
                "response of {} bytes exceeds the {} byte limit",
                size, self.config.max_body_bytes
            ),
        }
    }

    /// Make a single HTTP request with timeout
    async fn make_request(&self, url: &str) -> Result<Response> {
        let request_future = self.client.get(url).send();

        timeout(
            Duration::from_secs(self.config.timeout_seconds),
            request_future,
        )
        .await
        .map_err(|_| ValidationError::Timeout {
            url: url.to_string(),
            timeout_seconds: self.config.timeout_seconds,
        })?
        .map_err(|e| {
            if e.is_timeout() {
                ValidationError::Timeout {
                    url: url.to_string(),
                    timeout_seconds: self.config.timeout_seconds,
                }
            } else {
                ValidationError::from(e)
            }
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        match Location::parse(location)? {
            Location::Remote(url) => self.download(url.as_str()).await,
            Location::Local(path) => Ok(tokio::fs::read(&path).await?),
        }
    }
}

#[async_trait]
impl UrlProbe for HttpFetcher {
    async fn resolves(&self, url: &str) -> bool {
        match self.make_request(url).await {
            Ok(response) => {
                let ok = response.status().is_success();
                debug!(url, status = response.status().as_u16(), "Probed URL");
                ok
            }
            Err(e) => {
                debug!(url, error = %e, "URL probe failed");
                false
            }
        }
    }
}
