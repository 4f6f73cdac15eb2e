//! Cache keys and resident entries.
//!
//! A key identifies one cacheable resource. Keys built from URLs are
//! normalized so that equivalent spellings land on the same entry.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use url::Url;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid URL {input:?}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("unsupported URL scheme {0:?}, expected http or https")]
    UnsupportedScheme(String),
}

/// Opaque identifier for a cacheable resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Wrap an arbitrary identifier as a key without any normalization.
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    /// Build a key from an http(s) URL.
    ///
    /// The URL is parsed and re-serialized, which lowercases scheme and host and
    /// drops default ports. Fragments never reach the server, so they are
    /// stripped as well.
    pub fn from_url(input: &str) -> Result<Self, KeyError> {
        let mut url = Url::parse(input.trim()).map_err(|e| KeyError::InvalidUrl {
            input: input.to_string(),
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(KeyError::UnsupportedScheme(other.to_string())),
        }
        url.set_fragment(None);
        Ok(Self(url.as_str().into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

/// A single resident cache entry.
///
/// Entries are replaced wholesale on re-insert; only the recency stamp
/// changes while an entry is resident.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Key the entry is stored under.
    pub key: CacheKey,

    /// The cached payload. Opaque to the cache.
    pub value: V,

    /// Contribution to the cost budget.
    pub cost: u64,

    /// Recency stamp, higher is more recent.
    pub last_access: u64,
}

impl<V> CacheEntry<V> {
    pub fn new(key: CacheKey, value: V, cost: u64, last_access: u64) -> Self {
        Self {
            key,
            value,
            cost,
            last_access,
        }
    }
}
