//! Error taxonomy shared by every layer.
//!
//! Each [`SdaError`] variant belongs to exactly one wire [`ErrorKind`]
//! (`errorType`). Variants that refine a kind, like [`SdaError::EmptyMessage`]
//! under `InvalidArgument`, surface their own name in `errorName`.
//!
//! HTTP status selection is not done here; the envelope layer owns it.

use thiserror::Error;

/// Result alias used by the domain and service layers.
pub type Result<T> = std::result::Result<T, SdaError>;

/// Wire-level error kinds (`errorType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    Forbidden,
    UnauthorizedSource,
    NoNewSourceData,
    UncitedSourceOutsideContext,
    UnsupportedProtocol,
    FileNotFound,
    Timeout,
    StoreUnavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::AlreadyExists => "AlreadyExists",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::UnauthorizedSource => "UnauthorizedSource",
            ErrorKind::NoNewSourceData => "NoNewSourceData",
            ErrorKind::UncitedSourceOutsideContext => "UncitedSourceOutsideContext",
            ErrorKind::UnsupportedProtocol => "UnsupportedProtocol",
            ErrorKind::FileNotFound => "FileNotFound",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::StoreUnavailable => "StoreUnavailable",
            ErrorKind::Internal => "Internal",
        }
    }

    /// Only these two kinds are worth retrying, and only by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::StoreUnavailable)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error type returned by validators, gateways and services.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SdaError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid relative path: {0}")]
    InvalidPath(String),

    #[error("invalid protocol '{0}': expected one of s3, nas, local")]
    InvalidProtocol(String),

    #[error("invalid LFN: {0}")]
    InvalidLfn(String),

    #[error("message must contain at least one content part")]
    EmptyMessage,

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("unknown client: {0}")]
    UnknownClient(String),

    #[error("unknown source data ids: {0:?}")]
    UnknownSource(Vec<i64>),

    #[error("unknown llm: {0}")]
    UnknownLlm(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("source data ids not owned by caller: {0:?}")]
    UnauthorizedSource(Vec<i64>),

    #[error("extension adds no source data beyond the existing research context")]
    NoNewSourceData,

    #[error("cited source data ids are outside the research context: {0:?}")]
    UncitedSourceOutsideContext(Vec<i64>),

    #[error("protocol {0} is not supported for object-store operations")]
    UnsupportedProtocol(String),

    #[error("file not found in object store: {0}")]
    FileNotFound(String),

    #[error("request deadline exceeded")]
    Timeout,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SdaError {
    /// Shorthand for [`SdaError::NotFound`].
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        SdaError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SdaError::InvalidArgument(_)
            | SdaError::InvalidPath(_)
            | SdaError::InvalidProtocol(_)
            | SdaError::InvalidLfn(_)
            | SdaError::EmptyMessage => ErrorKind::InvalidArgument,
            SdaError::NotFound { .. }
            | SdaError::UnknownClient(_)
            | SdaError::UnknownSource(_)
            | SdaError::UnknownLlm(_) => ErrorKind::NotFound,
            SdaError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            SdaError::Forbidden(_) => ErrorKind::Forbidden,
            SdaError::UnauthorizedSource(_) => ErrorKind::UnauthorizedSource,
            SdaError::NoNewSourceData => ErrorKind::NoNewSourceData,
            SdaError::UncitedSourceOutsideContext(_) => ErrorKind::UncitedSourceOutsideContext,
            SdaError::UnsupportedProtocol(_) => ErrorKind::UnsupportedProtocol,
            SdaError::FileNotFound(_) => ErrorKind::FileNotFound,
            SdaError::Timeout => ErrorKind::Timeout,
            SdaError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            SdaError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The wire `errorName`: the variant name, finer than the kind.
    pub fn name(&self) -> &'static str {
        match self {
            SdaError::InvalidPath(_) => "InvalidPath",
            SdaError::InvalidProtocol(_) => "InvalidProtocol",
            SdaError::InvalidLfn(_) => "InvalidLFN",
            SdaError::EmptyMessage => "EmptyMessage",
            SdaError::UnknownClient(_) => "UnknownClient",
            SdaError::UnknownSource(_) => "UnknownSource",
            SdaError::UnknownLlm(_) => "UnknownLlm",
            other => other.kind().as_str(),
        }
    }

    /// The wire `errorCode`. Stable numbers; the hundreds digit groups by kind.
    pub fn code(&self) -> u32 {
        match self {
            SdaError::InvalidArgument(_) => 1000,
            SdaError::InvalidPath(_) => 1001,
            SdaError::InvalidProtocol(_) => 1002,
            SdaError::InvalidLfn(_) => 1003,
            SdaError::EmptyMessage => 1004,
            SdaError::NotFound { .. } => 1100,
            SdaError::UnknownClient(_) => 1101,
            SdaError::UnknownSource(_) => 1102,
            SdaError::UnknownLlm(_) => 1103,
            SdaError::AlreadyExists(_) => 1200,
            SdaError::Forbidden(_) => 1300,
            SdaError::UnauthorizedSource(_) => 1301,
            SdaError::NoNewSourceData => 1400,
            SdaError::UncitedSourceOutsideContext(_) => 1401,
            SdaError::UnsupportedProtocol(_) => 1500,
            SdaError::FileNotFound(_) => 1600,
            SdaError::Timeout => 1700,
            SdaError::StoreUnavailable(_) => 1800,
            SdaError::Internal(_) => 1900,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refined_variants_keep_their_kind() {
        assert_eq!(SdaError::EmptyMessage.kind(), ErrorKind::InvalidArgument);
        assert_eq!(SdaError::EmptyMessage.name(), "EmptyMessage");
        assert_eq!(SdaError::InvalidLfn("x".into()).name(), "InvalidLFN");
        assert_eq!(SdaError::UnknownSource(vec![3]).kind(), ErrorKind::NotFound);
    }

    #[test]
    fn plain_variants_use_kind_as_name() {
        let err = SdaError::AlreadyExists("source data".into());
        assert_eq!(err.name(), "AlreadyExists");
        assert_eq!(err.kind().as_str(), "AlreadyExists");
        assert_eq!(SdaError::not_found("conversation", 7).to_string(), "conversation not found: 7");
    }

    #[test]
    fn only_transient_kinds_are_retryable() {
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::StoreUnavailable.is_retryable());
        assert!(!ErrorKind::AlreadyExists.is_retryable());
    }
}
