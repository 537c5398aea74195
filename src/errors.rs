use std::error::Error;
use thiserror::Error;

use crate::db::DbError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("rpc call {method} failed: {source}")]
    RpcUnavailable {
        method: String,
        #[source]
        source: Box<dyn Error + Send + Sync + 'static>,
    },
    #[error("malformed response from {method}: {reason}")]
    RpcMalformedResponse { method: String, reason: String },
    #[error("store commit failed: {0}")]
    StoreCommitFailure(#[from] DbError),
    #[error("synchronization cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn unavailable<E>(method: &str, source: E) -> SyncError
    where
        E: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        SyncError::RpcUnavailable {
            method: method.to_string(),
            source: source.into(),
        }
    }

    pub fn malformed(method: &str, reason: impl Into<String>) -> SyncError {
        SyncError::RpcMalformedResponse {
            method: method.to_string(),
            reason: reason.into(),
        }
    }

    /// Only transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::RpcUnavailable { .. })
    }
}

impl From<diesel::result::Error> for SyncError {
    fn from(error: diesel::result::Error) -> Self {
        SyncError::StoreCommitFailure(Box::new(error))
    }
}
