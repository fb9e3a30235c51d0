//! Account repository implementation for PostgreSQL.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::trace;

use tally_core::error::StorageResult;
use tally_core::models::Account;
use tally_core::ports::AccountRepository;

use super::database::Database;
use super::helpers::query_error;

/// PostgreSQL implementation of AccountRepository.
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn find_accounts_by_ids(&self, ids: &[String]) -> StorageResult<HashMap<String, Account>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM accounts WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        trace!(requested = ids.len(), found = rows.len(), "Bulk account lookup");

        Ok(rows
            .into_iter()
            .map(|(id,)| (id.clone(), Account::new(id)))
            .collect())
    }

    async fn get_account(&self, id: &str) -> StorageResult<Option<Account>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(row.map(|(id,)| Account::new(id)))
    }

    async fn count_accounts(&self) -> StorageResult<u64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM accounts")
            .fetch_one(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(count.0 as u64)
    }
}
