//! Shared error type across vitals crates.

use thiserror::Error;

/// Machine-readable error codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid configuration (unknown storage scheme, bad values).
    Configuration,
    /// Backend resource unreachable or unwritable at initialize.
    StorageInit,
    /// Operation attempted after close.
    StorageClosed,
    /// Transient write failure.
    StorageWrite,
    /// Bad filter combination or unknown metric/group kind.
    QueryValidation,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in structured responses.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Configuration => "CONFIGURATION",
            ErrorCode::StorageInit => "STORAGE_INIT",
            ErrorCode::StorageClosed => "STORAGE_CLOSED",
            ErrorCode::StorageWrite => "STORAGE_WRITE",
            ErrorCode::QueryValidation => "QUERY_VALIDATION",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, VitalsError>;

/// Unified error type used by core and engine.
///
/// Configuration and StorageInit are fatal at startup: the service must not
/// come up with a metrics layer it cannot use. StorageClosed is a programming
/// error and is surfaced, never swallowed. StorageWrite is transient; the
/// interceptor logs and drops it so metric loss never fails the request being
/// measured.
#[derive(Debug, Error)]
pub enum VitalsError {
    #[error("configuration: {0}")]
    Configuration(String),
    #[error("storage init failed: {0}")]
    StorageInit(String),
    #[error("storage is closed")]
    StorageClosed,
    #[error("storage write failed: {0}")]
    StorageWrite(String),
    #[error("invalid query: {0}")]
    QueryValidation(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl VitalsError {
    /// Map internal error to a stable machine-readable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            VitalsError::Configuration(_) => ErrorCode::Configuration,
            VitalsError::StorageInit(_) => ErrorCode::StorageInit,
            VitalsError::StorageClosed => ErrorCode::StorageClosed,
            VitalsError::StorageWrite(_) => ErrorCode::StorageWrite,
            VitalsError::QueryValidation(_) => ErrorCode::QueryValidation,
            VitalsError::Internal(_) => ErrorCode::Internal,
        }
    }
}
