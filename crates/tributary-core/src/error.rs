//! Error types for tributary.

use thiserror::Error;

use crate::models::DbEngine;

/// Result type alias using tributary's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for tributary operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Target/catalog database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Source read failed. Carries the engine and the vendor state code
    /// when the driver surfaced one.
    #[error("Source error ({engine}): {message}")]
    Source {
        engine: DbEngine,
        /// Vendor SQLSTATE / error code, when available.
        code: Option<String>,
        message: String,
    },

    /// Source connection could not be established.
    #[error("Connection error ({engine}): {message}")]
    Connection { engine: DbEngine, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catalog row is missing or malformed
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Source and target column sets cannot be reconciled
    #[error("Schema error: {0}")]
    Schema(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a source error from a driver message with no state code.
    pub fn source(engine: DbEngine, message: impl Into<String>) -> Self {
        Error::Source {
            engine,
            code: None,
            message: message.into(),
        }
    }

    /// Build a source error carrying the vendor state code.
    pub fn source_with_code(
        engine: DbEngine,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Source {
            engine,
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Build a connection error.
    pub fn connection(engine: DbEngine, message: impl Into<String>) -> Self {
        Error::Connection {
            engine,
            message: message.into(),
        }
    }

    /// Whether this error indicates the current table cycle must stop
    /// (aborted transaction, lost connection, timeout). The cursor stays
    /// where it was last committed; the next cycle retries.
    pub fn ends_table_cycle(&self) -> bool {
        let msg = self.to_string().to_lowercase();
        msg.contains("current transaction is aborted")
            || msg.contains("previously aborted")
            || msg.contains("aborted transaction")
            || msg.contains("connection")
            || msg.contains("timeout")
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("missing connection string".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: missing connection string"
        );
    }

    #[test]
    fn test_error_display_source_with_code() {
        let err = Error::source_with_code(DbEngine::MariaDb, "1146", "table vanished");
        assert_eq!(err.to_string(), "Source error (MariaDB): table vanished");
        match err {
            Error::Source { code, .. } => assert_eq!(code.as_deref(), Some("1146")),
            _ => panic!("Expected Source error"),
        }
    }

    #[test]
    fn test_error_display_connection() {
        let err = Error::connection(DbEngine::Mssql, "login failed");
        assert_eq!(err.to_string(), "Connection error (MSSQL): login failed");
    }

    #[test]
    fn test_ends_table_cycle_on_abort() {
        let err = Error::Internal("current transaction is aborted, commands ignored".into());
        assert!(err.ends_table_cycle());
    }

    #[test]
    fn test_ends_table_cycle_on_timeout() {
        let err = Error::source(DbEngine::Postgres, "statement timeout expired");
        assert!(err.ends_table_cycle());
    }

    #[test]
    fn test_ends_table_cycle_negative() {
        let err = Error::InvalidInput("bad chunk size".into());
        assert!(!err.ends_table_cycle());
    }

    #[test]
    fn test_connection_error_always_ends_cycle() {
        let err = Error::connection(DbEngine::MongoDb, "server unreachable");
        assert!(err.ends_table_cycle());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
