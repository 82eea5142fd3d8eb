use thiserror::Error;

/// Terminal outcome of a failed fetch cycle, or an internal signal that the
/// cycle has to stop.
///
/// The `Display` text is what ends up in `FetchState::error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// 500/502/503/504 that survived every retry.
    #[error("request failed with status code {status} after {attempts} attempts")]
    TransientServer { status: u16, attempts: u32 },

    /// Any other non-success status, including a 401 that auth recovery
    /// could not or would not handle.
    #[error("request failed with status code {status}")]
    Status { status: u16 },

    /// Silent refresh failed and an interactive login was requested.
    #[error("session expired and could not be refreshed; login required")]
    AuthRecoveryFailed,

    /// The cycle was superseded or dropped. Never surfaced to observers.
    #[error("request cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to decode response body: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// HTTP status behind the error, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::TransientServer { status, .. } | Self::Status { status } => Some(*status),
            _ => None,
        }
    }
}

/// Errors raised by a [`crate::cache::CacheStore`] backend.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache storage failure: {0}")]
    Storage(String),

    #[error("cache quota exceeded ({0} entries)")]
    QuotaExceeded(usize),
}
