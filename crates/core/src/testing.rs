//! In-memory store used by unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::models::{Account, IndexerCursor, Transfer};
use crate::ports::{AccountRepository, BatchData, CursorRepository, LedgerStore, TransferRepository};

#[derive(Default)]
struct State {
    accounts: BTreeMap<String, Account>,
    transfers: BTreeMap<String, Transfer>,
    cursor: Option<IndexerCursor>,
}

/// `LedgerStore` backed by maps, with the same insert-or-ignore
/// semantics as the Postgres store.
#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<State>,
    lookups: AtomicUsize,
    failures: AtomicU32,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` commits fail with `StorageError::Unavailable`.
    pub fn fail_next_commits(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn insert_account(&self, account: Account) {
        let mut state = self.state.lock().unwrap();
        state.accounts.insert(account.id.clone(), account);
    }

    pub fn set_cursor(&self, cursor: IndexerCursor) {
        self.state.lock().unwrap().cursor = Some(cursor);
    }

    /// Number of bulk account lookups served so far.
    pub fn account_lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn account_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().accounts.keys().cloned().collect()
    }

    pub fn transfer_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().transfers.keys().cloned().collect()
    }

    pub fn current_cursor(&self) -> Option<IndexerCursor> {
        self.state.lock().unwrap().cursor.clone()
    }
}

#[async_trait]
impl AccountRepository for MemoryLedgerStore {
    async fn find_accounts_by_ids(&self, ids: &[String]) -> StorageResult<HashMap<String, Account>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| state.accounts.get(id).map(|a| (id.clone(), a.clone())))
            .collect())
    }

    async fn get_account(&self, id: &str) -> StorageResult<Option<Account>> {
        Ok(self.state.lock().unwrap().accounts.get(id).cloned())
    }

    async fn count_accounts(&self) -> StorageResult<u64> {
        Ok(self.state.lock().unwrap().accounts.len() as u64)
    }
}

#[async_trait]
impl TransferRepository for MemoryLedgerStore {
    async fn get_transfer(&self, id: &str) -> StorageResult<Option<Transfer>> {
        Ok(self.state.lock().unwrap().transfers.get(id).cloned())
    }

    async fn count_transfers(&self) -> StorageResult<u64> {
        Ok(self.state.lock().unwrap().transfers.len() as u64)
    }
}

#[async_trait]
impl CursorRepository for MemoryLedgerStore {
    async fn get_cursor(&self, chain_id: &str) -> StorageResult<Option<IndexerCursor>> {
        let state = self.state.lock().unwrap();
        Ok(state.cursor.clone().filter(|c| c.chain_id == chain_id))
    }

    async fn get_any_cursor(&self) -> StorageResult<Option<IndexerCursor>> {
        Ok(self.state.lock().unwrap().cursor.clone())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    fn accounts(&self) -> &dyn AccountRepository {
        self
    }

    fn transfers(&self) -> &dyn TransferRepository {
        self
    }

    fn cursor(&self) -> &dyn CursorRepository {
        self
    }

    async fn persist_batch_atomic(&self, data: BatchData<'_>) -> StorageResult<()> {
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(StorageError::Unavailable("injected failure".into()));
        }

        // Build the next state aside and swap it in, so a failure leaves
        // nothing behind.
        let mut state = self.state.lock().unwrap();
        let mut accounts = state.accounts.clone();
        let mut transfers = state.transfers.clone();

        for account in data.accounts {
            accounts
                .entry(account.id.clone())
                .or_insert_with(|| Account::clone(account));
        }
        for transfer in data.transfers {
            if !accounts.contains_key(&transfer.from.id) || !accounts.contains_key(&transfer.to.id) {
                return Err(StorageError::QueryError(format!(
                    "transfer {} references an unknown account",
                    transfer.id
                )));
            }
            transfers
                .entry(transfer.id.clone())
                .or_insert_with(|| transfer.clone());
        }

        state.accounts = accounts;
        state.transfers = transfers;
        state.cursor = Some(data.cursor.clone());
        Ok(())
    }
}

/// Shared handle, as the service holds its store.
pub fn shared_store() -> Arc<MemoryLedgerStore> {
    Arc::new(MemoryLedgerStore::new())
}
