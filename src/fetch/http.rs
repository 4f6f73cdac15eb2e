//! Upstream asset sources.
//!
//! The coordinator does not care how bytes arrive; anything implementing
//! [`AssetSource`] can back it. [`HttpSource`] is the production source, a
//! plain GET with a timeout and a body size cap. A fetch either yields the
//! body or fails; there is no retrying, revalidation or partial content.

use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::cache::{CacheKey, Weigher};
use crate::config::FetchConfig;

/// Raw bytes of a fetched asset plus the upstream content type.
///
/// Decoding is left to the consumer; the cache treats the bytes as opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub bytes: Bytes,
    pub content_type: Option<Arc<str>>,
}

impl Asset {
    pub fn new(bytes: impl Into<Bytes>, content_type: Option<&str>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.map(Arc::from),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Prices an [`Asset`] by its body length.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssetWeigher;

impl Weigher<Asset> for AssetWeigher {
    fn weigh(&self, asset: &Asset) -> u64 {
        asset.len() as u64
    }
}

/// Something that can turn a key into an asset.
#[async_trait]
pub trait AssetSource: Send + Sync + 'static {
    async fn fetch(&self, key: &CacheKey) -> anyhow::Result<Asset>;
}

/// Fetches assets over HTTP(S). The key is the normalized URL.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    max_body_bytes: u64,
}

impl HttpSource {
    pub fn new(config: &FetchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }
}

#[async_trait]
impl AssetSource for HttpSource {
    async fn fetch(&self, key: &CacheKey) -> anyhow::Result<Asset> {
        let url = key.as_str();
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;

        if let Some(len) = response.content_length() {
            if len > self.max_body_bytes {
                bail!("GET {url}: body of {len} bytes exceeds limit of {}", self.max_body_bytes);
            }
        }

        let content_type: Option<Arc<str>> = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(Arc::from);

        let mut body = BytesMut::with_capacity(response.content_length().unwrap_or(0) as usize);
        while let Some(chunk) = response
            .chunk()
            .await
            .with_context(|| format!("GET {url}: reading body"))?
        {
            if (body.len() + chunk.len()) as u64 > self.max_body_bytes {
                bail!("GET {url}: body exceeds limit of {} bytes", self.max_body_bytes);
            }
            body.extend_from_slice(&chunk);
        }
        let bytes = body.freeze();

        debug!(url, bytes = bytes.len(), "Fetched asset");
        Ok(Asset {
            bytes,
            content_type,
        })
    }
}
