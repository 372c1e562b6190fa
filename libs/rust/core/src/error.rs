//! Error types shared across the attestation config API.

use thiserror::Error;

/// Failure reported by a storage or CDN backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("backend operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    pub fn other(msg: impl Into<String>) -> Self { Self::Other(msg.into()) }
}

impl From<sled::Error> for BackendError {
    fn from(e: sled::Error) -> Self { Self::Other(format!("sled: {e}")) }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self { Self::Other(format!("http: {e}")) }
}

#[derive(Debug, Error)]
#[error("signing failed: {0}")]
pub struct SigningError(pub String);

#[derive(Debug, Error)]
#[error("signature verification failed: {0}")]
pub struct VerificationError(pub String);

/// Which write of a publish sequence failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStep {
    FetchList,
    Sign,
    WriteVersion,
    WriteSignature,
    WriteList,
    DeleteVersion,
    DeleteSignature,
}

impl std::fmt::Display for PublishStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PublishStep::FetchList => "fetching version list",
            PublishStep::Sign => "signing version object",
            PublishStep::WriteVersion => "writing version object",
            PublishStep::WriteSignature => "writing signature object",
            PublishStep::WriteList => "writing version list",
            PublishStep::DeleteVersion => "deleting version object",
            PublishStep::DeleteSignature => "deleting signature object",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("the requested resource was not found: {key}")]
    NotFound { key: String },
    #[error("validating {kind}: {reason}")]
    Validation { kind: &'static str, reason: String },
    #[error("decoding {kind} at {key}: {source}")]
    Decode { kind: &'static str, key: String, #[source] source: serde_json::Error },
    #[error("encoding {kind}: {source}")]
    Encode { kind: &'static str, #[source] source: serde_json::Error },
    #[error("{op} {key}: {source}")]
    Backend { op: &'static str, key: String, #[source] source: BackendError },
    #[error("invalidating CDN cache: {0}")]
    Invalidation(String),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error("publishing {variant}: {step}: {source}")]
    Publish { variant: String, step: PublishStep, #[source] source: Box<ApiError> },
}

impl ApiError {
    pub fn validation(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation { kind, reason: reason.into() }
    }

    pub(crate) fn backend(op: &'static str, key: impl Into<String>, source: BackendError) -> Self {
        let key = key.into();
        match source {
            BackendError::NotFound(_) => Self::NotFound { key },
            other => Self::Backend { op, key, source: other },
        }
    }

    pub(crate) fn publish(variant: impl ToString, step: PublishStep, source: ApiError) -> Self {
        Self::Publish { variant: variant.to_string(), step, source: Box::new(source) }
    }

    /// True when the error (or the failed publish step) is a missing key.
    pub fn is_not_found(&self) -> bool {
        match self {
            ApiError::NotFound { .. } => true,
            ApiError::Publish { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// True when the data write succeeded but the CDN could not be invalidated.
    pub fn is_invalidation(&self) -> bool {
        match self {
            ApiError::Invalidation(_) => true,
            ApiError::Publish { source, .. } => source.is_invalidation(),
            _ => false,
        }
    }

    /// Transient failures worth retrying at the backend call site.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Backend { .. })
    }
}
