use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capabilities::RecordsError;
use crate::catalog::CatalogError;
use crate::model::ListKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No connectivity, or the request could not be sent
    Transport,
    /// The catalog answered with a failure
    Remote,
    NotFound,
    /// Offline with nothing cached for the requested list
    StaleCacheEmpty,
    Storage,
    Configuration,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            ErrorKind::Transport => "TRANSPORT",
            ErrorKind::Remote => "REMOTE",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::StaleCacheEmpty => "STALE_CACHE_EMPTY",
            ErrorKind::Storage => "STORAGE",
            ErrorKind::Configuration => "CONFIGURATION",
        }
    }
}

/// Failure of a reconciliation step.
///
/// Catalog and connectivity failures are expected and become view states.
/// Store failures are not: they abort the pass.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("catalog request failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("record store failure: {0}")]
    Store(#[from] RecordsError),

    #[error("no cached {0} listing available while offline")]
    StaleCacheEmpty(ListKind),

    #[error("network unavailable")]
    Offline,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Catalog(e) => e.kind(),
            SyncError::Store(RecordsError::NotFound(_)) => ErrorKind::NotFound,
            SyncError::Store(_) => ErrorKind::Storage,
            SyncError::StaleCacheEmpty(_) => ErrorKind::StaleCacheEmpty,
            SyncError::Offline => ErrorKind::Transport,
        }
    }

    /// True when the failure means "nothing to show without a network".
    pub fn is_connectivity(&self) -> bool {
        matches!(self, SyncError::StaleCacheEmpty(_) | SyncError::Offline)
    }

    /// Whether the platform's reconnect retry can help.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Offline => true,
            SyncError::Catalog(e) => e.is_retryable(),
            SyncError::Store(_) | SyncError::StaleCacheEmpty(_) => false,
        }
    }
}
