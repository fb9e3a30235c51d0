//! Shared helper functions for PostgreSQL row conversion.

use tally_core::error::{StorageError, StorageResult};
use tally_core::models::Amount;

/// SQLSTATE codes of conflicts that a fresh transaction may not hit again
/// (`serialization_failure`, `deadlock_detected`).
const TRANSIENT_SQLSTATES: &[&str] = &["40001", "40P01"];

/// Classify a driver error.
///
/// Pool and transport failures mean the store could not be reached, and
/// serialization conflicts abort the transaction: both can be retried as
/// a whole batch. Anything else (constraint violations, bad SQL) fails the
/// same way on every attempt and maps to `QueryError`.
pub fn query_error(e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(e.to_string()),
        sqlx::Error::Database(ref db)
            if db
                .code()
                .is_some_and(|code| is_transient_sqlstate(&code)) =>
        {
            StorageError::TransactionFailed(e.to_string())
        }
        other => StorageError::QueryError(other.to_string()),
    }
}

/// Same as [`query_error`] for transaction begin/commit.
///
/// A failed commit leaves nothing behind, so it is reported as
/// `TransactionFailed` unless the error is a permanent database error.
pub fn transaction_error(e: sqlx::Error) -> StorageError {
    let permanent = matches!(e, sqlx::Error::Database(_));
    match query_error(e) {
        StorageError::QueryError(msg) if !permanent => StorageError::TransactionFailed(msg),
        other => other,
    }
}

fn is_transient_sqlstate(code: &str) -> bool {
    TRANSIENT_SQLSTATES.contains(&code)
}

/// Convert a `Vec<u8>` to a fixed-size 32-byte array.
///
/// Returns an error if the length doesn't match.
pub fn bytes_to_hash32(bytes: Vec<u8>, field_name: &str) -> StorageResult<[u8; 32]> {
    bytes.try_into().map_err(|v: Vec<u8>| {
        StorageError::SerializationError(format!(
            "{} has invalid length: expected 32, got {}",
            field_name,
            v.len()
        ))
    })
}

/// Parse a `NUMERIC` column read back as text.
pub fn text_to_amount(text: &str, field_name: &str) -> StorageResult<Amount> {
    text.parse().map_err(|e| {
        StorageError::SerializationError(format!(
            "{} is not an unsigned integer ({}): {}",
            field_name, text, e
        ))
    })
}

/// Convert a stored `BIGINT` back to a block number.
pub fn i64_to_block_number(value: i64, field_name: &str) -> StorageResult<u64> {
    u64::try_from(value).map_err(|_| {
        StorageError::SerializationError(format!("{} is negative: {}", field_name, value))
    })
}
