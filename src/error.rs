//! Error types for the DreamLake SDK

use thiserror::Error;

/// Errors surfaced by session, track, parameter, and file operations
#[derive(Debug, Error)]
pub enum DreamlakeError {
    /// Invalid arguments: non-numeric `_ts`, conflicting session options,
    /// malformed prefix, oversized file, and similar caller mistakes.
    #[error("invalid input: {0}")]
    BadInput(String),

    /// Operation attempted on a closed session
    #[error("session is closed")]
    SessionClosed,

    /// Referenced track, file, or session does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Local session lock held by another live session
    #[error("conflict: {0}")]
    Conflict(String),

    /// Network or disk error possibly resolvable by retry
    #[error("transient error: {0}")]
    Transient(String),

    /// Persisted data violates framing or schema invariants
    #[error("corrupt data: {0}")]
    Corrupt(String),
}

impl From<std::io::Error> for DreamlakeError {
    fn from(err: std::io::Error) -> Self {
        DreamlakeError::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for DreamlakeError {
    fn from(err: serde_json::Error) -> Self {
        DreamlakeError::Corrupt(format!("JSON: {err}"))
    }
}

impl From<rmp_serde::encode::Error> for DreamlakeError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        DreamlakeError::Transient(format!("MessagePack encode: {err}"))
    }
}

impl From<rmp_serde::decode::Error> for DreamlakeError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        DreamlakeError::Corrupt(format!("MessagePack decode: {err}"))
    }
}

impl From<reqwest::Error> for DreamlakeError {
    fn from(err: reqwest::Error) -> Self {
        DreamlakeError::Transient(err.to_string())
    }
}

/// Result type for DreamLake operations
pub type Result<T> = std::result::Result<T, DreamlakeError>;
