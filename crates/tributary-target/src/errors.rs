//! Structured classification of target write failures.
//!
//! The writer branches on the *kind* of failure, not on message text:
//! SQLSTATE codes are mapped first (`25P02` in_failed_sql_transaction,
//! class 22 data exceptions, class 08 connection exceptions, `57014`
//! query_canceled) and message substrings are only a fallback for errors
//! that surface without a code.

/// What went wrong with a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteErrorKind {
    /// The transaction is in an aborted state; roll back and retry rows in
    /// fresh transactions.
    AbortedTransaction,
    /// A value failed to parse for its column type; retry row by row and
    /// skip offenders.
    DataSyntax,
    /// The connection dropped.
    ConnectionLost,
    /// Statement timeout hit.
    Timeout,
    /// Anything else; re-raise.
    Other,
}

impl WriteErrorKind {
    /// Classify a sqlx error, SQLSTATE first, message text as fallback.
    pub fn classify(error: &sqlx::Error) -> Self {
        if let Some(db) = error.as_database_error() {
            if let Some(code) = db.code() {
                let code = code.as_ref();
                if code == "25P02" {
                    return WriteErrorKind::AbortedTransaction;
                }
                if code == "57014" {
                    return WriteErrorKind::Timeout;
                }
                if code.starts_with("22") {
                    return WriteErrorKind::DataSyntax;
                }
                if code.starts_with("08") {
                    return WriteErrorKind::ConnectionLost;
                }
            }
        }
        if matches!(error, sqlx::Error::PoolTimedOut) {
            return WriteErrorKind::Timeout;
        }
        if matches!(error, sqlx::Error::Io(_)) {
            return WriteErrorKind::ConnectionLost;
        }
        Self::classify_message(&error.to_string())
    }

    /// Substring fallback, for errors without a SQLSTATE.
    pub fn classify_message(message: &str) -> Self {
        let msg = message.to_lowercase();
        if msg.contains("current transaction is aborted")
            || msg.contains("previously aborted")
            || msg.contains("aborted transaction")
        {
            WriteErrorKind::AbortedTransaction
        } else if msg.contains("not a valid binary digit") || msg.contains("invalid input syntax") {
            WriteErrorKind::DataSyntax
        } else if msg.contains("timeout") {
            WriteErrorKind::Timeout
        } else if msg.contains("connection") {
            WriteErrorKind::ConnectionLost
        } else {
            WriteErrorKind::Other
        }
    }

    /// Whether a failed commit with this kind may be swallowed (the
    /// transaction's work was already drained row by row).
    pub fn commit_swallowable(&self) -> bool {
        matches!(self, WriteErrorKind::AbortedTransaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_message_aborted() {
        assert_eq!(
            WriteErrorKind::classify_message(
                "ERROR: current transaction is aborted, commands ignored until end of transaction block"
            ),
            WriteErrorKind::AbortedTransaction
        );
        assert_eq!(
            WriteErrorKind::classify_message("transaction was previously aborted"),
            WriteErrorKind::AbortedTransaction
        );
    }

    #[test]
    fn test_classify_message_syntax() {
        assert_eq!(
            WriteErrorKind::classify_message("\"zz\" is not a valid binary digit"),
            WriteErrorKind::DataSyntax
        );
        assert_eq!(
            WriteErrorKind::classify_message("invalid input syntax for type integer"),
            WriteErrorKind::DataSyntax
        );
    }

    #[test]
    fn test_classify_message_timeout_and_connection() {
        assert_eq!(
            WriteErrorKind::classify_message("canceling statement due to statement timeout"),
            WriteErrorKind::Timeout
        );
        assert_eq!(
            WriteErrorKind::classify_message("connection reset by peer"),
            WriteErrorKind::ConnectionLost
        );
    }

    #[test]
    fn test_classify_message_other() {
        assert_eq!(
            WriteErrorKind::classify_message("duplicate key value violates unique constraint"),
            WriteErrorKind::Other
        );
    }

    #[test]
    fn test_commit_swallowable() {
        assert!(WriteErrorKind::AbortedTransaction.commit_swallowable());
        assert!(!WriteErrorKind::DataSyntax.commit_swallowable());
        assert!(!WriteErrorKind::Other.commit_swallowable());
    }
}
