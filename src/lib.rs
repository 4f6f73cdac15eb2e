//! asset-fetch-cache: in-memory asset cache with deduplicated fetching.
//!
//! Loads resources identified by a key (normally a URL), serves repeat
//! requests from memory, keeps memory bounded by an entry count and a cost
//! budget, and makes sure concurrent requests for the same key share a
//! single upstream fetch.
//!
//! - [`cache`]: The cost-bounded store
//! - [`fetch`]: The deduplicating coordinator and upstream sources
//! - [`server`]: HTTP front end

pub mod cache;
pub mod config;
pub mod fetch;
pub mod metrics;
pub mod server;
