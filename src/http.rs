//! Authenticated HTTP collaborator used to fetch image bytes.
//!
//! Images in a CV usually live behind the same API as the CV data (profile
//! pictures, logos), so fetching them needs the caller's bearer token. The
//! [`HttpFetch`] trait is the seam the image inliner depends on;
//! [`ApiClient`] is the `reqwest` implementation.

use crate::config::HttpConfig;
use crate::error::ExportError;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;
use tracing::debug;

/// A fetched resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    /// `Content-Type` header value, parameters stripped.
    pub content_type: Option<String>,
}

/// Fetch a resource as raw bytes, with authentication applied by the
/// implementation.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn fetch_binary(&self, url: &str) -> Result<Fetched, ExportError>;
}

/// `reqwest`-backed [`HttpFetch`] with base-URL resolution and bearer auth.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    config: HttpConfig,
}

impl ApiClient {
    pub fn new(config: HttpConfig) -> Result<Self, ExportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.effective_timeout_secs()))
            .build()
            .map_err(|e| ExportError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Resolve `url` against the configured base URL.
    ///
    /// Absolute `http(s)://` URLs are used as-is; anything else is joined onto
    /// the base, or rejected when there is no base.
    pub fn resolve(&self, url: &str) -> Result<reqwest::Url, ExportError> {
        if is_absolute(url) {
            return reqwest::Url::parse(url).map_err(|e| ExportError::ImageFetch {
                url: url.to_string(),
                reason: e.to_string(),
            });
        }
        let base = self
            .config
            .base_url
            .as_deref()
            .ok_or_else(|| ExportError::ImageFetch {
                url: url.to_string(),
                reason: "relative URL and no base URL configured".into(),
            })?;
        reqwest::Url::parse(base)
            .and_then(|b| b.join(url))
            .map_err(|e| ExportError::ImageFetch {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl HttpFetch for ApiClient {
    async fn fetch_binary(&self, url: &str) -> Result<Fetched, ExportError> {
        let resolved = self.resolve(url)?;
        let secs = self.config.effective_timeout_secs();
        debug!("Fetching image: {}", resolved);

        let mut request = self.client.get(resolved);
        if let Some(token) = &self.config.bearer_token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ExportError::ImageFetchTimeout {
                    url: url.to_string(),
                    secs,
                }
            } else {
                ExportError::ImageFetch {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        if !response.status().is_success() {
            return Err(ExportError::ImageFetch {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(media_type);

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ExportError::ImageFetchTimeout {
                    url: url.to_string(),
                    secs,
                }
            } else {
                ExportError::ImageFetch {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        debug!("Fetched {} bytes ({:?}) from {}", bytes.len(), content_type, url);
        Ok(Fetched {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

fn is_absolute(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// `image/png; charset=binary` → `image/png`.
fn media_type(header: &str) -> Option<String> {
    let mt = header.split(';').next()?.trim().to_ascii_lowercase();
    (!mt.is_empty()).then_some(mt)
}
