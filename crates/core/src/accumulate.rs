//! Resolution of transfer endpoints into shared account objects.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use crate::error::StorageResult;
use crate::models::{Account, Transfer, TransferRecord};
use crate::ports::AccountRepository;

/// Output of [`BatchAccumulator::accumulate`], ready for persistence.
#[derive(Debug, Default)]
pub struct PreparedBatch {
    /// One account per distinct address, sorted by address.
    pub accounts: Vec<Arc<Account>>,
    /// Transfers in input order.
    pub transfers: Vec<Transfer>,
    /// How many of `accounts` were not yet in the store.
    pub new_accounts: usize,
}

/// Builds the account set and transfer entities of a batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchAccumulator;

impl BatchAccumulator {
    pub fn new() -> Self {
        Self
    }

    /// Resolve every endpoint of `records` with a single bulk lookup.
    ///
    /// Each distinct address maps to exactly one `Arc<Account>` for the
    /// whole batch, whether it already existed in the store or is new.
    pub async fn accumulate(
        &self,
        records: Vec<TransferRecord>,
        accounts: &dyn AccountRepository,
    ) -> StorageResult<PreparedBatch> {
        if records.is_empty() {
            return Ok(PreparedBatch::default());
        }

        let ids: Vec<String> = records
            .iter()
            .flat_map(|r| [r.from.as_str(), r.to.as_str()])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_owned)
            .collect();

        let mut existing = accounts.find_accounts_by_ids(&ids).await?;

        let mut new_accounts = 0;
        let resolved: BTreeMap<String, Arc<Account>> = ids
            .into_iter()
            .map(|id| {
                let account = existing.remove(&id).unwrap_or_else(|| {
                    new_accounts += 1;
                    Account::new(id.clone())
                });
                (id, Arc::new(account))
            })
            .collect();

        let transfers = records
            .into_iter()
            .map(|record| Transfer {
                from: Arc::clone(&resolved[&record.from]),
                to: Arc::clone(&resolved[&record.to]),
                id: record.id,
                block_number: record.block_number,
                timestamp: record.timestamp,
                extrinsic_hash: record.extrinsic_hash,
                call: record.call,
                amount: record.amount,
            })
            .collect();

        debug!(
            accounts = resolved.len(),
            new_accounts, "Resolved batch accounts"
        );

        Ok(PreparedBatch {
            accounts: resolved.into_values().collect(),
            transfers,
            new_accounts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    use crate::models::Amount;
    use crate::testing::MemoryLedgerStore;
    use crate::ports::LedgerStore;

    fn record(id: &str, from: &str, to: &str, amount: u64) -> TransferRecord {
        TransferRecord {
            id: id.into(),
            block_number: 1,
            timestamp: DateTime::from_timestamp(1_600_000_000, 0).unwrap(),
            extrinsic_hash: None,
            call: None,
            from: from.into(),
            to: to.into(),
            amount: Amount::from(amount),
        }
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let store = MemoryLedgerStore::new();
        let prepared = BatchAccumulator::new()
            .accumulate(vec![], store.accounts())
            .await
            .unwrap();
        assert!(prepared.accounts.is_empty());
        assert!(prepared.transfers.is_empty());
        assert_eq!(store.account_lookups(), 0);
    }

    // Test critique: une adresse => un seul objet Account pour tout le lot
    #[tokio::test]
    async fn test_same_address_shares_one_account() {
        let store = MemoryLedgerStore::new();
        let records = vec![
            record("E1", "alice", "bob", 10),
            record("E2", "bob", "carol", 20),
            record("E3", "alice", "alice", 30),
        ];

        let prepared = BatchAccumulator::new()
            .accumulate(records, store.accounts())
            .await
            .unwrap();

        let ids: Vec<_> = prepared.accounts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["alice", "bob", "carol"]);
        assert_eq!(prepared.new_accounts, 3);

        let t = &prepared.transfers;
        assert!(Arc::ptr_eq(&t[0].from, &t[2].from));
        assert!(Arc::ptr_eq(&t[2].from, &t[2].to));
        assert!(Arc::ptr_eq(&t[0].to, &t[1].from));
        assert!(Arc::ptr_eq(&t[1].to, &prepared.accounts[2]));

        // Ordre d'entrée conservé
        let order: Vec<_> = t.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(order, ["E1", "E2", "E3"]);
    }

    #[tokio::test]
    async fn test_existing_accounts_are_reused_with_one_lookup() {
        let store = MemoryLedgerStore::new();
        store.insert_account(Account::new("alice"));

        let prepared = BatchAccumulator::new()
            .accumulate(
                vec![record("E1", "alice", "bob", 1), record("E2", "bob", "alice", 2)],
                store.accounts(),
            )
            .await
            .unwrap();

        assert_eq!(prepared.accounts.len(), 2);
        assert_eq!(prepared.new_accounts, 1);
        assert_eq!(store.account_lookups(), 1);
    }
}
