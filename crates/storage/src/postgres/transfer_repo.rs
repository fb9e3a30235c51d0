//! Transfer repository implementation for PostgreSQL.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;

use tally_core::error::StorageResult;
use tally_core::models::{Account, Transfer};
use tally_core::ports::TransferRepository;

use super::database::Database;
use super::helpers::{i64_to_block_number, query_error, text_to_amount};

/// PostgreSQL implementation of TransferRepository.
pub struct PgTransferRepository {
    pool: PgPool,
}

impl PgTransferRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl TransferRepository for PgTransferRepository {
    async fn get_transfer(&self, id: &str) -> StorageResult<Option<Transfer>> {
        let row = sqlx::query_as::<_, TransferRow>(
            r#"
            SELECT id, block_number, timestamp, extrinsic_hash, call,
                   from_id, to_id, amount::TEXT AS amount
            FROM transfers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        row.map(TransferRow::into_transfer).transpose()
    }

    async fn count_transfers(&self) -> StorageResult<u64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transfers")
            .fetch_one(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(count.0 as u64)
    }
}

#[derive(sqlx::FromRow)]
struct TransferRow {
    id: String,
    block_number: i64,
    timestamp: chrono::DateTime<chrono::Utc>,
    extrinsic_hash: Option<String>,
    call: Option<String>,
    from_id: String,
    to_id: String,
    amount: String,
}

impl TransferRow {
    fn into_transfer(self) -> StorageResult<Transfer> {
        // A self-transfer reads back as a single account.
        let from = Arc::new(Account::new(self.from_id));
        let to = if self.to_id == from.id {
            Arc::clone(&from)
        } else {
            Arc::new(Account::new(self.to_id))
        };

        Ok(Transfer {
            block_number: i64_to_block_number(self.block_number, "transfers.block_number")?,
            amount: text_to_amount(&self.amount, "transfers.amount")?,
            id: self.id,
            timestamp: self.timestamp,
            extrinsic_hash: self.extrinsic_hash,
            call: self.call,
            from,
            to,
        })
    }
}
