//! Mapping of sqlx failures onto the storage error taxonomy.
//!
//! Classification is by error variant and SQLSTATE, never by message text.

use tradewatch_core::StorageError;

/// SQLSTATEs that leave the session unusable but the operation retryable:
/// serialization failure, deadlock, aborted transaction, admin shutdown.
const TRANSIENT_SQLSTATES: [&str; 4] = ["40001", "40P01", "25P02", "57P01"];

/// Classifies a sqlx error as transient or fatal.
#[must_use]
pub fn classify_sqlx(err: sqlx::Error) -> StorageError {
    let transient = match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| is_transient_sqlstate(&code)),
        _ => false,
    };

    if transient {
        StorageError::transient(err.to_string())
    } else {
        StorageError::fatal(err.to_string())
    }
}

/// Class 08 (connection exception) plus the codes in [`TRANSIENT_SQLSTATES`].
#[must_use]
pub fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || TRANSIENT_SQLSTATES.contains(&code)
}

pub(crate) fn decode_error(context: &str, err: impl std::fmt::Display) -> StorageError {
    StorageError::fatal(format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_connection_failures_are_transient() {
        let reset = sqlx::Error::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
        assert!(classify_sqlx(reset).is_transient());
        assert!(classify_sqlx(sqlx::Error::Protocol("unexpected EOF".into())).is_transient());
        assert!(classify_sqlx(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn test_row_errors_are_fatal() {
        assert!(!classify_sqlx(sqlx::Error::RowNotFound).is_transient());
        assert!(!classify_sqlx(sqlx::Error::ColumnNotFound("data".into())).is_transient());
    }

    #[test]
    fn test_sqlstate_classes() {
        assert!(is_transient_sqlstate("08006"));
        assert!(is_transient_sqlstate("08003"));
        assert!(is_transient_sqlstate("25P02"));
        assert!(is_transient_sqlstate("40P01"));
        assert!(!is_transient_sqlstate("23505"));
        assert!(!is_transient_sqlstate("42P01"));
    }
}
