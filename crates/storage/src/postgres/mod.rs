//! PostgreSQL storage adapter.
//!
//! This module implements the repository traits defined in `tally-core`
//! using PostgreSQL as the backing store.
//!
//! # Architecture
//!
//! - [`Database`] - Connection pool, migrations and purge
//! - [`PgLedgerStore`] - Composite store implementing the `LedgerStore` trait
//! - Individual repos: `PgAccountRepository`, `PgTransferRepository`, `PgCursorRepository`
//!
//! # Usage
//!
//! ```ignore
//! let config = DatabaseConfig::for_indexer(&database_url);
//! let db = Database::connect(&config).await?;
//! db.migrate().await?;
//!
//! let store = PgLedgerStore::new(Arc::new(db));
//! ```

mod account_repo;
mod cursor_repo;
mod database;
mod helpers;
mod transfer_repo;

pub use account_repo::PgAccountRepository;
pub use cursor_repo::PgCursorRepository;
pub use database::{Database, DatabaseConfig, PurgeStats};
pub use transfer_repo::PgTransferRepository;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use tally_core::error::StorageResult;
use tally_core::ports::{
    AccountRepository, BatchData, CursorRepository, LedgerStore, TransferRepository,
};

use helpers::{query_error, transaction_error};

// =============================================================================
// Composite Repository
// =============================================================================

/// Aggregated PostgreSQL repositories implementing the `LedgerStore` trait.
///
/// This provides a single entry point for all storage operations and
/// implements the batch transaction spanning accounts, transfers and cursor.
pub struct PgLedgerStore {
    db: Arc<Database>,
    accounts: PgAccountRepository,
    transfers: PgTransferRepository,
    cursor: PgCursorRepository,
}

impl PgLedgerStore {
    /// Create a new repository aggregate from a database connection.
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            accounts: PgAccountRepository::new(&db),
            transfers: PgTransferRepository::new(&db),
            cursor: PgCursorRepository::new(&db),
            db,
        }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    fn accounts(&self) -> &dyn AccountRepository {
        &self.accounts
    }

    fn transfers(&self) -> &dyn TransferRepository {
        &self.transfers
    }

    fn cursor(&self) -> &dyn CursorRepository {
        &self.cursor
    }

    #[instrument(skip_all, fields(
        accounts = data.accounts.len(),
        transfers = data.transfers.len(),
        block = data.cursor.last_indexed_block,
    ))]
    async fn persist_batch_atomic(&self, data: BatchData<'_>) -> StorageResult<()> {
        let mut tx = self.db.pool().begin().await.map_err(transaction_error)?;

        // Accounts first so transfer foreign keys resolve
        for account in data.accounts {
            sqlx::query("INSERT INTO accounts (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
                .bind(&account.id)
                .execute(&mut *tx)
                .await
                .map_err(query_error)?;
        }

        // A transfer id already present comes from a re-processed batch
        let mut inserted = 0u64;
        for transfer in data.transfers {
            let result = sqlx::query(
                r#"
                INSERT INTO transfers (
                    id, block_number, timestamp, extrinsic_hash, call,
                    from_id, to_id, amount
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8::NUMERIC)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(&transfer.id)
            .bind(transfer.block_number as i64)
            .bind(transfer.timestamp)
            .bind(&transfer.extrinsic_hash)
            .bind(&transfer.call)
            .bind(&transfer.from.id)
            .bind(&transfer.to.id)
            .bind(transfer.amount.to_string())
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;

            inserted += result.rows_affected();
        }

        // Update cursor
        sqlx::query(
            r#"
            INSERT INTO indexer_cursor (chain_id, last_indexed_block, last_indexed_hash, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (chain_id) DO UPDATE SET
                last_indexed_block = EXCLUDED.last_indexed_block,
                last_indexed_hash = EXCLUDED.last_indexed_hash,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&data.cursor.chain_id)
        .bind(data.cursor.last_indexed_block as i64)
        .bind(&data.cursor.last_indexed_hash.0[..])
        .bind(data.cursor.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        tx.commit().await.map_err(transaction_error)?;

        debug!(
            inserted,
            skipped = data.transfers.len() as u64 - inserted,
            "Batch committed"
        );

        Ok(())
    }
}
