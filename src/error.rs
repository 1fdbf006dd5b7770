//! Error types for weave
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad input, unknown node)
//! - 3: Blocked by policy (alias conflict, dangling edge, dependents, contradiction)
//! - 4: Operation failed (I/O, database, lock, external tracker)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the wv CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const POLICY_BLOCKED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for weave operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Invalid edge type '{0}': must be one of blocks, relates_to, implements, contradicts, supersedes, references, obsoletes, addresses")]
    InvalidEdgeType(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Repository not found from {0}")]
    RepoNotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Policy blocks (exit code 3)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Edge endpoint does not exist: {0}")]
    ForeignKey(String),

    #[error("Node {id} has dependent node(s) {dependents:?}; pass force to delete anyway")]
    HasDependents { id: String, dependents: Vec<String> },

    #[error("Node {id} is contradicted by {others:?}; resolve the contradicts edge first")]
    Contradiction { id: String, others: Vec<String> },

    #[error("External sync is disabled")]
    SyncDisabled,

    // Operation failures (exit code 4)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("External API error: {0}")]
    ExternalApi(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Validation(_)
            | Error::InvalidEdgeType(_)
            | Error::NotFound(_)
            | Error::RepoNotFound(_)
            | Error::InvalidConfig(_) => exit_codes::USER_ERROR,

            Error::Conflict(_)
            | Error::ForeignKey(_)
            | Error::HasDependents { .. }
            | Error::Contradiction { .. }
            | Error::SyncDisabled => exit_codes::POLICY_BLOCKED,

            Error::Io(_)
            | Error::Sql(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::Git(_)
            | Error::LockFailed(_)
            | Error::ExternalApi(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Transient failures worth retrying at the call site (lock contention,
    /// busy database, interrupted writes).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::LockFailed(_) => true,
            Error::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            Error::Sql(rusqlite::Error::SqliteFailure(code, _)) => matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Structured details for JSON error output
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::HasDependents { id, dependents } => {
                Some(serde_json::json!({ "id": id, "dependents": dependents }))
            }
            Error::Contradiction { id, others } => {
                Some(serde_json::json!({ "id": id, "contradicted_by": others }))
            }
            _ => None,
        }
    }
}

/// Result type alias for weave operations
pub type Result<T> = std::result::Result<T, Error>;
