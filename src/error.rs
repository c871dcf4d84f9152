//! Error types for the Zookeeper operator

use thiserror::Error;

/// Main error type for Zookeeper operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error (transient failures, conflicts, rejected writes)
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for Zookeeper specs
    #[error("validation error: {0}")]
    Validation(String),

    /// External cleanup failed while a finalizer was being released
    #[error("cleanup error: {0}")]
    Cleanup(String),

    /// Object is missing metadata needed for identity or ownership
    #[error("missing metadata: {0}")]
    MissingMetadata(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a cleanup error with the given message
    pub fn cleanup(msg: impl Into<String>) -> Self {
        Self::Cleanup(msg.into())
    }

    /// Create a missing-metadata error with the given message
    pub fn missing_metadata(msg: impl Into<String>) -> Self {
        Self::MissingMetadata(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Whether requeueing the same object can succeed without a spec change
    ///
    /// Store errors and cleanup failures are expected to clear on their own.
    /// Validation and metadata errors need the object to be edited first.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube(_) | Self::Cleanup(_) => true,
            Self::Validation(_) | Self::MissingMetadata(_) | Self::Serialization(_) => false,
        }
    }

    /// Whether this is an optimistic-concurrency conflict from the API server
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(ae)) if ae.code == 409)
    }
}
