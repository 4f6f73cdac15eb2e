use std::sync::Arc;

use thiserror::Error;

/// Why a waiter did not receive a value.
///
/// Cloneable so a single failure can be handed to every waiter of a fetch.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// The fetch function returned an error. Delivered verbatim to every
    /// waiter attached when the fetch resolved.
    #[error("fetch failed: {0:#}")]
    FetchFailed(Arc<anyhow::Error>),

    /// This waiter withdrew before the fetch resolved.
    #[error("request cancelled before the fetch resolved")]
    Cancelled,
}

impl FetchError {
    pub fn failed(err: anyhow::Error) -> Self {
        FetchError::FetchFailed(Arc::new(err))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}
