use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeError;

use crate::error::{RemoteError, RepositoryError, StoreError};

/// Envelope every FFI call answers with, serialized as `{"Variant": "payload"}`.
#[derive(Debug, Serialize, Deserialize)]
pub enum AppResponse {
    DatabaseError(String),
    SerializationError(String),
    NotFound(String),
    /// The id is not in the cache and the backend could not be asked.
    Unavailable(String),
    PreconditionFailed(String),
    RemoteError(String),
    BadRequest(String),
    Ok(String),
}

impl Display for AppResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AppResponse::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppResponse::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            AppResponse::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppResponse::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            AppResponse::PreconditionFailed(msg) => write!(f, "Precondition failed: {}", msg),
            AppResponse::RemoteError(msg) => write!(f, "Remote error: {}", msg),
            AppResponse::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            AppResponse::Ok(msg) => write!(f, "Ok: {}", msg),
        }
    }
}

impl From<StoreError> for AppResponse {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Serialization(e) => AppResponse::from(e),
            other => AppResponse::DatabaseError(other.to_string()),
        }
    }
}

impl From<RemoteError> for AppResponse {
    fn from(err: RemoteError) -> Self {
        AppResponse::RemoteError(err.to_string())
    }
}

impl From<RepositoryError> for AppResponse {
    fn from(err: RepositoryError) -> Self {
        match err {
            // The bare reason ("offline" / "unauthenticated") so the UI can branch on it.
            RepositoryError::Precondition(p) => AppResponse::PreconditionFailed(p.to_string()),
            RepositoryError::Storage(e) => AppResponse::from(e),
            RepositoryError::Remote(e) => AppResponse::from(e),
        }
    }
}

impl From<SerdeError> for AppResponse {
    fn from(err: SerdeError) -> Self {
        AppResponse::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl AppResponse {
    pub fn success(msg: impl Into<String>) -> Self {
        AppResponse::Ok(msg.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, AppResponse::Ok(_))
    }
}
