//! Error types for each layer of the core.
//!
//! The FFI layer folds all of these into [`crate::app_response::AppResponse`].

use thiserror::Error;

/// Failure of the durable key-value medium.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("LMDB error: {0}")]
    Lmdb(#[from] lmdb::Error),

    #[error("Record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid timestamp in '{key}': {source}")]
    Timestamp {
        key: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Failure talking to the backend data service.
///
/// The repository never inspects the variant; any remote error degrades to the cache.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Backend response was empty")]
    EmptyResponse,

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// A precondition for a mutating operation was not met.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PreconditionUnmet {
    #[error("offline")]
    Offline,

    #[error("unauthenticated")]
    Unauthenticated,
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Precondition unmet: {0}")]
    Precondition(#[from] PreconditionUnmet),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
}

impl RepositoryError {
    pub fn precondition(&self) -> Option<PreconditionUnmet> {
        match self {
            RepositoryError::Precondition(p) => Some(*p),
            _ => None,
        }
    }
}
