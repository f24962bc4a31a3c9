//! Remote Data Service seam
//!
//! The engine never sees transport details. Adapters report failures as a
//! structured `RemoteError` and the retry client only looks at `is_transient()`.

use super::models::{Entity, EntityData, LoadRequest, Operation};
use async_trait::async_trait;

/// Per-entity read and write calls against the remote store
#[async_trait]
pub trait RemoteDataService: Send + Sync {
    /// Read the entity (or listing) described by `request`
    async fn fetch(&self, request: &LoadRequest) -> Result<EntityData, RemoteError>;

    /// Apply one mutation; must behave as an idempotent upsert
    async fn write(&self, entity: &Entity, operation: Operation) -> Result<(), RemoteError>;
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Connectivity or protocol anomaly; safe to retry
    #[error("Transient network error: {0}")]
    Transient(String),

    /// The remote refused the request (validation, conflict, server bug)
    #[error("Rejected by remote: {0}")]
    Rejected(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized - check API credentials")]
    Unauthorized,

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),
}

/// Message fragments that identify a transport-level failure
const TRANSIENT_SIGNATURES: [&str; 3] = ["HTTP2", "ERR_HTTP2_PROTOCOL_ERROR", "Failed to fetch"];

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify a bare error message from a collaborator that cannot produce
    /// a structured kind
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if TRANSIENT_SIGNATURES.iter().any(|sig| message.contains(sig)) {
            Self::Transient(message)
        } else {
            Self::Rejected(message)
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::Transient(err.to_string())
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::from_message(err.to_string())
        }
    }
}
