//! Error types for the indexer domain layer.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`DomainError`] - Decoding and data-consistency errors
//! - [`StorageError`] - Database/repository errors
//! - [`ChainError`] - Block source errors
//! - [`IndexerError`] - Top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

// =============================================================================
// Domain Errors
// =============================================================================

/// Decoding and data-consistency violations.
///
/// Every variant aborts the batch being processed. None of them are
/// skipped per record: dropping a transfer silently would corrupt the ledger.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Raw key bytes or hex string do not describe a 32-byte public key.
    #[error("Malformed address input: {0}")]
    MalformedAddressInput(String),

    /// A block carrying transfer events has no timestamp.
    #[error("Block {block} has transfer events but no timestamp")]
    MissingBlockTimestamp {
        /// Height of the offending block.
        block: u64,
    },

    /// No layout rule covers the spec version of an event.
    ///
    /// Requires registering a new rule before the batch can proceed.
    #[error("Unknown event version: event {event_id} declares spec version {spec_version}")]
    UnknownEventVersion {
        /// Source event id.
        event_id: String,
        /// Declared spec version.
        spec_version: u32,
    },

    /// Payload matched a layout window but not its byte layout.
    #[error("Decoding error: {0}")]
    DecodingError(String),

    /// Generic validation error.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Database and repository errors.
///
/// These errors originate from storage operations like queries,
/// transactions, and data serialization.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Store could not be reached (pool exhausted, connection refused).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// SQL statement rejected by the database (constraint violation,
    /// invalid SQL). Retrying the same batch fails again.
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// Transaction aborted (commit failure, serialization conflict, deadlock).
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Database migration failed.
    #[error("Migration error: {0}")]
    MigrationError(String),

    /// Data serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

// =============================================================================
// Chain Errors
// =============================================================================

/// Block source errors.
///
/// These errors occur when talking to a Substrate node or reading
/// a replay file.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Connection to the source failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// RPC request failed.
    #[error("RPC error: {0}")]
    RpcError(String),

    /// Block could not be fetched or decoded.
    #[error("Block fetch error at {block}: {message}")]
    BlockFetchError {
        /// Block height that failed.
        block: u64,
        /// Error details.
        message: String,
    },

    /// Events of a block cannot be split with the metadata the client
    /// was started with.
    ///
    /// Restarting against a node serving that runtime is required.
    #[error("Block {block} uses runtime spec version {spec_version}, not decodable with the loaded metadata")]
    UnsupportedRuntime {
        /// Block height that failed.
        block: u64,
        /// Spec version active at that block.
        spec_version: u32,
    },

    /// Replay input could not be read or parsed.
    #[error("Replay error: {0}")]
    ReplayError(String),
}

// =============================================================================
// Indexer Errors
// =============================================================================

/// Top-level indexer orchestration errors.
///
/// This is the main error type returned by [`crate::services::IndexerService`].
/// It wraps all lower-level errors and adds indexer-specific variants.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Domain logic error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Storage/database error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Block source error.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Connected chain doesn't match stored data.
    ///
    /// This is a fatal error that requires manual intervention.
    #[error("Chain mismatch: connected to {connected} but database contains data for {expected}")]
    ChainMismatch {
        /// Genesis hash of connected chain.
        connected: String,
        /// Genesis hash expected by database.
        expected: String,
    },

    /// Graceful shutdown was requested.
    ///
    /// This is not really an error but uses the error type for control flow.
    #[error("Indexer shutdown requested")]
    ShutdownRequested,
}

impl IndexerError {
    /// Whether retrying the whole batch from scratch may succeed.
    ///
    /// Only transport failures qualify. Domain errors are deterministic
    /// for a given block range and need a code or data fix.
    pub fn is_retryable(&self) -> bool {
        match self {
            IndexerError::Storage(e) | IndexerError::Domain(DomainError::Storage(e)) => matches!(
                e,
                StorageError::Unavailable(_) | StorageError::TransactionFailed(_)
            ),
            IndexerError::Chain(e) => !matches!(
                e,
                ChainError::ReplayError(_) | ChainError::UnsupportedRuntime { .. }
            ),
            _ => false,
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for indexer operations.
pub type IndexerResult<T> = Result<T, IndexerError>;

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;
