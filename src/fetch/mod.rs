//! Deduplicated fetching in front of the cache.
//!
//! - [`coordinator`]: Get-or-fetch with one in-flight fetch per key
//! - [`error`]: Errors delivered to waiters
//! - [`http`]: Upstream asset sources

pub mod coordinator;
pub mod error;
pub mod http;

pub use coordinator::{
    CancelHandle, CancelPolicy, CoordinatorOptions, FetchCoordinator, Lookup, PendingFetch,
};
pub use error::FetchError;
pub use http::{Asset, AssetSource, AssetWeigher, HttpSource};
