//! HTTP server exposing the asset cache.
//!
//! - [`asset_api`]: Route handlers and response types

pub mod asset_api;

pub use asset_api::{build_router, AppState};
