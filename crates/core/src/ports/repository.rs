//! Port traits for data repositories.
//!
//! These traits define the storage interface used by the domain layer.
//! Implementations live in the infrastructure layer (e.g., `tally-storage`).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::models::{Account, IndexerCursor, Transfer};

// =============================================================================
// Repository Traits
// =============================================================================

/// Read access to accounts.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Bulk lookup of accounts by id.
    ///
    /// Ids that do not exist are simply absent from the result.
    async fn find_accounts_by_ids(&self, ids: &[String]) -> StorageResult<HashMap<String, Account>>;

    /// Get account by id.
    async fn get_account(&self, id: &str) -> StorageResult<Option<Account>>;

    /// Number of known accounts.
    async fn count_accounts(&self) -> StorageResult<u64>;
}

/// Read access to transfers.
///
/// Endpoints are returned as account ids, not shared account objects.
#[async_trait]
pub trait TransferRepository: Send + Sync {
    /// Get transfer by event id.
    async fn get_transfer(&self, id: &str) -> StorageResult<Option<Transfer>>;

    /// Number of recorded transfers.
    async fn count_transfers(&self) -> StorageResult<u64>;
}

/// Repository for indexer cursor state.
#[async_trait]
pub trait CursorRepository: Send + Sync {
    /// Get current cursor for a chain.
    async fn get_cursor(&self, chain_id: &str) -> StorageResult<Option<IndexerCursor>>;

    /// Get any existing cursor (for chain mismatch detection).
    async fn get_any_cursor(&self) -> StorageResult<Option<IndexerCursor>>;
}

// =============================================================================
// Composite Repository
// =============================================================================

/// Data bundle for atomic batch persistence.
#[derive(Debug)]
pub struct BatchData<'a> {
    /// Every account touched by the batch, pre-existing or new.
    pub accounts: &'a [Arc<Account>],
    /// Transfers in extraction order.
    pub transfers: &'a [Transfer],
    /// Cursor pointing at the last block of the batch.
    pub cursor: &'a IndexerCursor,
}

/// Combined repository access for the indexer.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Access the account repository.
    fn accounts(&self) -> &dyn AccountRepository;

    /// Access the transfer repository.
    fn transfers(&self) -> &dyn TransferRepository;

    /// Access the cursor repository.
    fn cursor(&self) -> &dyn CursorRepository;

    /// Persist a batch atomically in a single transaction.
    ///
    /// Accounts are upserted first so transfer references resolve, then
    /// transfers are inserted (an existing id is left untouched), then the
    /// cursor is moved. If any step fails, nothing is committed.
    async fn persist_batch_atomic(&self, data: BatchData<'_>) -> StorageResult<()>;
}
