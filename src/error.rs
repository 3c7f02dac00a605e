//! Unified error type for the query intelligence pipeline.

use thiserror::Error;

/// Result type alias used throughout this crate.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Stable error kind surfaced across the query and progress ports.
///
/// Each variant corresponds to one of the error kinds named in the
/// external interface contract; the port handler is responsible for
/// mapping these onto the transport-native error channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("schema unavailable: {0}")]
    SchemaUnavailable(String),

    #[error("ambiguous query: {0}")]
    AmbiguousQuery(String),

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("unsafe sql: {0}")]
    UnsafeSql(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("query cancelled")]
    Cancelled,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The stable machine-readable code for this error kind, as named in §7.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::InvalidInput(_) => "invalid_input",
            CoreError::SchemaUnavailable(_) => "schema_unavailable",
            CoreError::AmbiguousQuery(_) => "ambiguous_query",
            CoreError::GenerationFailed(_) => "generation_failed",
            CoreError::UnsafeSql(_) => "unsafe_sql",
            CoreError::ConnectionFailed(_) => "connection_failed",
            CoreError::ExecutionFailed(_) => "execution_failed",
            CoreError::Cancelled => "cancelled",
            CoreError::NotFound(_) => "not_found",
            CoreError::Internal(_) => "internal_error",
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error as E;
        match &err {
            E::PoolTimedOut | E::PoolClosed | E::Io(_) => {
                CoreError::ConnectionFailed(err.to_string())
            }
            E::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    if code == "57014" {
                        // query_canceled: raised by statement_timeout
                        return CoreError::ExecutionFailed(format!(
                            "statement timeout: {err}"
                        ));
                    }
                }
                CoreError::ExecutionFailed(err.to_string())
            }
            _ => CoreError::ExecutionFailed(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Internal(format!("serialization error: {err}"))
    }
}
