//! Core indexer service - orchestrates batch processing.
//!
//! Batches are processed strictly one after the other: a batch is fully
//! extracted, resolved and committed before the next one is pulled from
//! the source.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, error, info, instrument, warn};

use crate::accumulate::BatchAccumulator;
use crate::error::{DomainError, IndexerError, IndexerResult};
use crate::extract::EventExtractor;
use crate::metrics::{ProcessingTimer, record_batch_persisted, record_batch_retry, record_decode_error};
use crate::models::{IndexerCursor, short_chain_id};
use crate::ports::{BatchData, BlockSource, LedgerStore, RawBlock};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the indexer service.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Chain identifier (genesis hash).
    pub chain_id: String,
    /// Maximum retries of a batch after a transient failure.
    pub max_retries: u32,
    /// Delay before the first retry, doubled on each attempt.
    pub retry_delay: Duration,
    /// Upper bound of the retry delay.
    pub max_retry_delay: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chain_id: String::new(),
            max_retries: 5,
            retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(30),
        }
    }
}

/// Outcome of one committed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub first_block: u64,
    pub last_block: u64,
    pub blocks: usize,
    pub transfers: usize,
    /// Distinct accounts touched by the batch.
    pub accounts: usize,
    /// Accounts the store did not know before this batch.
    pub new_accounts: usize,
}

// =============================================================================
// IndexerService
// =============================================================================

/// Main indexer service.
///
/// # Flow
///
/// 1. Check the stored cursor belongs to the connected chain
/// 2. Ask the source for batches after the cursor
/// 3. Extract transfer records from each batch
/// 4. Resolve accounts with one bulk lookup
/// 5. Persist accounts, transfers and cursor in one transaction
pub struct IndexerService<S: BlockSource, R: LedgerStore> {
    config: IndexerConfig,
    block_source: Arc<S>,
    store: Arc<R>,
    extractor: EventExtractor,
    accumulator: BatchAccumulator,
}

impl<S: BlockSource, R: LedgerStore> IndexerService<S, R> {
    pub fn new(
        config: IndexerConfig,
        block_source: Arc<S>,
        store: Arc<R>,
        extractor: EventExtractor,
    ) -> Self {
        Self {
            config,
            block_source,
            store,
            extractor,
            accumulator: BatchAccumulator::new(),
        }
    }

    /// Start the indexer.
    ///
    /// Returns `Ok(())` when the source is exhausted, and
    /// `Err(ShutdownRequested)` when stopped through `shutdown_rx`.
    #[instrument(skip_all, fields(chain = %short_chain_id(&self.config.chain_id)))]
    pub async fn run(
        &self,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> IndexerResult<()> {
        info!("⛓️  Starting indexer");

        self.verify_chain_id().await?;

        let mut after = self
            .store
            .cursor()
            .get_cursor(&self.config.chain_id)
            .await?
            .map(|cursor| cursor.last_indexed_block);

        match after {
            Some(block) => info!(block, "▶️  Resuming after cursor"),
            None => info!("No cursor found, starting from the beginning"),
        }

        let mut reconnect_delay = self.config.retry_delay;

        loop {
            if *shutdown_rx.borrow() {
                debug!("Shutdown requested");
                return Err(IndexerError::ShutdownRequested);
            }

            match self.block_source.batches(after).await {
                Ok(mut stream) => {
                    debug!("📡 Block stream opened");
                    reconnect_delay = self.config.retry_delay;

                    loop {
                        let next = tokio::select! {
                            next = stream.next() => next,
                            changed = shutdown_rx.changed() => {
                                if changed.is_err() || *shutdown_rx.borrow() {
                                    debug!("Shutdown requested");
                                    return Err(IndexerError::ShutdownRequested);
                                }
                                continue;
                            }
                        };

                        match next {
                            Some(Ok(blocks)) => {
                                if blocks.is_empty() {
                                    continue;
                                }
                                let summary =
                                    self.process_with_retry(&blocks, &mut shutdown_rx).await?;
                                after = Some(summary.last_block);
                            }
                            Some(Err(e)) => {
                                let e = IndexerError::from(e);
                                if !e.is_retryable() {
                                    error!(error = ?e, "❌ Block source failed");
                                    return Err(e);
                                }
                                warn!(error = ?e, "⚠️  Stream error, reconnecting...");
                                break;
                            }
                            None => {
                                info!(last_block = ?after, "✅ Source exhausted");
                                return Ok(());
                            }
                        }
                    }
                }
                Err(e) => {
                    let e = IndexerError::from(e);
                    if !e.is_retryable() {
                        error!(error = ?e, "❌ Could not open block stream");
                        return Err(e);
                    }
                    warn!(
                        error = ?e,
                        retry_in_ms = reconnect_delay.as_millis(),
                        "⚠️  Failed to open block stream, retrying..."
                    );
                }
            }

            self.sleep_or_shutdown(reconnect_delay, &mut shutdown_rx)
                .await?;
            reconnect_delay = (reconnect_delay * 2).min(self.config.max_retry_delay);
        }
    }

    /// Verify the connected chain matches any existing indexed data.
    /// Returns error if database contains data from a different chain.
    async fn verify_chain_id(&self) -> IndexerResult<()> {
        let existing_cursor = self.store.cursor().get_any_cursor().await?;

        if let Some(cursor) = existing_cursor {
            if cursor.chain_id != self.config.chain_id {
                error!(
                    connected = %short_chain_id(&self.config.chain_id),
                    expected = %short_chain_id(&cursor.chain_id),
                    "❌ Chain mismatch! Database contains data from a different chain"
                );
                error!("   Manual action required: either connect to the correct chain or purge the database");

                return Err(IndexerError::ChainMismatch {
                    connected: self.config.chain_id.clone(),
                    expected: cursor.chain_id,
                });
            }
            debug!("Chain ID verified");
        }

        Ok(())
    }

    /// Run a batch, retrying the whole batch on transient failures.
    async fn process_with_retry(
        &self,
        blocks: &[RawBlock],
        shutdown_rx: &mut tokio::sync::watch::Receiver<bool>,
    ) -> IndexerResult<BatchSummary> {
        let mut delay = self.config.retry_delay;
        let mut attempt = 0;

        loop {
            match self.process_batch(blocks).await {
                Ok(summary) => {
                    info!(
                        from = summary.first_block,
                        to = summary.last_block,
                        transfers = summary.transfers,
                        new_accounts = summary.new_accounts,
                        "⛓️  Batch indexed"
                    );
                    return Ok(summary);
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    record_batch_retry();
                    warn!(
                        attempt,
                        max_retries = self.config.max_retries,
                        retry_in_ms = delay.as_millis(),
                        error = ?e,
                        "⚠️  Batch failed, retrying"
                    );
                    self.sleep_or_shutdown(delay, shutdown_rx).await?;
                    delay = (delay * 2).min(self.config.max_retry_delay);
                }
                Err(e) => {
                    if let IndexerError::Domain(domain) = &e {
                        record_decode_error(decode_error_kind(domain));
                    }
                    error!(
                        first_block = blocks.first().map(|b| b.header.height),
                        error = ?e,
                        "❌ Batch processing failed"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Extract, resolve and persist one batch.
    ///
    /// Nothing is written unless the whole batch succeeds. Re-processing a
    /// batch that was already committed leaves the store unchanged.
    #[instrument(skip_all, fields(
        from = blocks.first().map(|b| b.header.height),
        to = blocks.last().map(|b| b.header.height),
    ))]
    pub async fn process_batch(&self, blocks: &[RawBlock]) -> IndexerResult<BatchSummary> {
        let (Some(first), Some(last)) = (blocks.first(), blocks.last()) else {
            return Ok(BatchSummary::default());
        };

        let _timer = ProcessingTimer::new();

        let records = self.extractor.extract_batch(blocks)?;
        let prepared = self
            .accumulator
            .accumulate(records, self.store.accounts())
            .await?;

        let cursor = IndexerCursor {
            chain_id: self.config.chain_id.clone(),
            last_indexed_block: last.header.height,
            last_indexed_hash: last.header.hash,
            updated_at: Utc::now(),
        };

        self.store
            .persist_batch_atomic(BatchData {
                accounts: &prepared.accounts,
                transfers: &prepared.transfers,
                cursor: &cursor,
            })
            .await?;

        record_batch_persisted(prepared.transfers.len(), prepared.new_accounts);

        Ok(BatchSummary {
            first_block: first.header.height,
            last_block: last.header.height,
            blocks: blocks.len(),
            transfers: prepared.transfers.len(),
            accounts: prepared.accounts.len(),
            new_accounts: prepared.new_accounts,
        })
    }

    async fn sleep_or_shutdown(
        &self,
        delay: Duration,
        shutdown_rx: &mut tokio::sync::watch::Receiver<bool>,
    ) -> IndexerResult<()> {
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return Err(IndexerError::ShutdownRequested);
                }
                Ok(())
            }
        }
    }
}

fn decode_error_kind(err: &DomainError) -> &'static str {
    match err {
        DomainError::MalformedAddressInput(_) => "malformed_address",
        DomainError::MissingBlockTimestamp { .. } => "missing_timestamp",
        DomainError::UnknownEventVersion { .. } => "unknown_version",
        DomainError::DecodingError(_) => "layout_mismatch",
        DomainError::ValidationError(_) => "validation",
        DomainError::Storage(_) => "storage",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use parity_scale_codec::Encode;

    use crate::address::AddressCodec;
    use crate::decoding::kusama::{BALANCES_TRANSFER, balances_transfer_decoder};
    use crate::error::{ChainError, ChainResult};
    use crate::models::{BlockHash, PublicKey};
    use crate::ports::{BlockBatchStream, BlockHeader, EventArgs, RawEvent, TransferRepository};
    use crate::testing::{MemoryLedgerStore, shared_store};

    const CHAIN: &str = "0xb0a8d493285c2df73290dfb7e61f870f17b41801197a149ca93654499ea3dafe";
    const KEY_A: [u8; 32] = [0x0a; 32];
    const KEY_B: [u8; 32] = [0x0b; 32];
    const KEY_C: [u8; 32] = [0x0c; 32];

    /// Source replaying fixed batches, honoring `after`.
    struct FixedSource {
        batches: Vec<Vec<RawBlock>>,
    }

    #[async_trait]
    impl BlockSource for FixedSource {
        async fn chain_id(&self) -> ChainResult<String> {
            Ok(CHAIN.into())
        }

        async fn batches(&self, after: Option<u64>) -> ChainResult<BlockBatchStream> {
            let batches: Vec<ChainResult<Vec<RawBlock>>> = self
                .batches
                .iter()
                .map(|batch| {
                    batch
                        .iter()
                        .filter(|b| after.is_none_or(|a| b.header.height > a))
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .filter(|batch| !batch.is_empty())
                .map(Ok)
                .collect();
            Ok(Box::pin(futures::stream::iter(batches)))
        }
    }

    /// Source whose stream always fails with a non-retryable error.
    struct BrokenReplay;

    #[async_trait]
    impl BlockSource for BrokenReplay {
        async fn chain_id(&self) -> ChainResult<String> {
            Ok(CHAIN.into())
        }

        async fn batches(&self, _after: Option<u64>) -> ChainResult<BlockBatchStream> {
            Ok(Box::pin(futures::stream::iter(vec![Err(
                ChainError::ReplayError("line 3: bad json".into()),
            )])))
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn transfer(height: u64, index: u32, from: [u8; 32], to: [u8; 32], amount: u128) -> RawEvent {
        RawEvent {
            id: format!("{}-{}", height, index),
            name: BALANCES_TRANSFER.into(),
            spec_version: 1055,
            extrinsic: None,
            call: None,
            args: EventArgs::Scale((from, to, amount).encode()),
        }
    }

    fn block(height: u64, timestamp: Option<DateTime<Utc>>, events: Vec<RawEvent>) -> RawBlock {
        RawBlock {
            header: BlockHeader {
                height,
                hash: BlockHash([height as u8; 32]),
                timestamp,
            },
            events,
        }
    }

    fn config() -> IndexerConfig {
        IndexerConfig {
            chain_id: CHAIN.into(),
            max_retries: 3,
            retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(4),
        }
    }

    fn service<S: BlockSource>(
        source: S,
        store: Arc<MemoryLedgerStore>,
    ) -> IndexerService<S, MemoryLedgerStore> {
        let extractor = EventExtractor::new(
            BALANCES_TRANSFER,
            balances_transfer_decoder(9430).unwrap(),
            AddressCodec::new(2),
        );
        IndexerService::new(config(), Arc::new(source), store, extractor)
    }

    fn two_batches() -> Vec<Vec<RawBlock>> {
        vec![
            vec![
                block(10, Some(ts(100)), vec![transfer(10, 0, KEY_A, KEY_B, 5)]),
                block(11, Some(ts(106)), vec![]),
            ],
            vec![block(
                12,
                Some(ts(112)),
                vec![transfer(12, 0, KEY_B, KEY_C, 7), transfer(12, 1, KEY_A, KEY_C, 9)],
            )],
        ]
    }

    fn shutdown() -> (tokio::sync::watch::Sender<bool>, tokio::sync::watch::Receiver<bool>) {
        tokio::sync::watch::channel(false)
    }

    #[tokio::test]
    async fn test_run_indexes_all_batches_and_moves_cursor() {
        let store = shared_store();
        let svc = service(FixedSource { batches: two_batches() }, store.clone());
        let (_tx, rx) = shutdown();

        svc.run(rx).await.unwrap();

        assert_eq!(store.transfer_ids(), ["10-0", "12-0", "12-1"]);
        assert_eq!(store.account_ids().len(), 3);
        let cursor = store.current_cursor().unwrap();
        assert_eq!(cursor.last_indexed_block, 12);
        assert_eq!(cursor.last_indexed_hash, BlockHash([12; 32]));
    }

    // Test critique: rejouer la même plage ne crée aucun doublon
    #[tokio::test]
    async fn test_reprocessing_is_idempotent() {
        let store = shared_store();
        let svc = service(FixedSource { batches: vec![] }, store.clone());

        for batch in two_batches() {
            svc.process_batch(&batch).await.unwrap();
        }
        let accounts = store.account_ids();
        let transfers = store.transfer_ids();

        for batch in two_batches() {
            let summary = svc.process_batch(&batch).await.unwrap();
            assert_eq!(summary.new_accounts, 0);
        }

        assert_eq!(store.account_ids(), accounts);
        assert_eq!(store.transfer_ids(), transfers);
    }

    #[tokio::test]
    async fn test_dedup_counts_only_unknown_addresses() {
        let store = shared_store();
        let svc = service(FixedSource { batches: vec![] }, store.clone());
        let batches = two_batches();

        let first = svc.process_batch(&batches[0]).await.unwrap();
        assert_eq!((first.accounts, first.new_accounts), (2, 2));

        // B déjà connu, C nouveau, A déjà connu
        let second = svc.process_batch(&batches[1]).await.unwrap();
        assert_eq!((second.accounts, second.new_accounts), (3, 1));
        assert_eq!(store.count_transfers().await.unwrap(), 3);
    }

    // Test critique: pas de timestamp => rien n'est persisté pour le lot
    #[tokio::test]
    async fn test_missing_timestamp_persists_nothing() {
        let store = shared_store();
        let batch = vec![
            block(20, Some(ts(200)), vec![transfer(20, 0, KEY_A, KEY_B, 1)]),
            block(21, None, vec![transfer(21, 0, KEY_A, KEY_B, 1)]),
            block(22, Some(ts(212)), vec![transfer(22, 0, KEY_A, KEY_B, 1)]),
        ];
        let svc = service(FixedSource { batches: vec![batch] }, store.clone());
        let (_tx, rx) = shutdown();

        let err = svc.run(rx).await.unwrap_err();

        assert!(matches!(
            err,
            IndexerError::Domain(DomainError::MissingBlockTimestamp { block: 21 })
        ));
        assert!(store.transfer_ids().is_empty());
        assert!(store.account_ids().is_empty());
        assert!(store.current_cursor().is_none());
    }

    #[tokio::test]
    async fn test_end_to_end_example() {
        let store = shared_store();
        let svc = service(FixedSource { batches: vec![] }, store.clone());
        let codec = AddressCodec::new(2);

        let mut event = transfer(1000, 0, KEY_A, KEY_B, 500);
        event.id = "E1".into();
        event.spec_version = 1020;
        event.args = EventArgs::Scale((KEY_A, KEY_B, 500u128, 0u128).encode());

        svc.process_batch(&[block(1000, Some(ts(1_000)), vec![event])])
            .await
            .unwrap();

        let a = codec.encode(&PublicKey(KEY_A));
        let b = codec.encode(&PublicKey(KEY_B));
        let mut expected = vec![a.clone(), b.clone()];
        expected.sort();
        assert_eq!(store.account_ids(), expected);

        let stored = store.get_transfer("E1").await.unwrap().unwrap();
        assert_eq!(stored.block_number, 1000);
        assert_eq!(stored.timestamp, ts(1_000));
        assert_eq!(stored.from.id, a);
        assert_eq!(stored.to.id, b);
        assert_eq!(stored.amount.to_string(), "500");
    }

    #[tokio::test]
    async fn test_transient_failures_retry_whole_batch() {
        let store = shared_store();
        store.fail_next_commits(2);
        let svc = service(FixedSource { batches: two_batches() }, store.clone());
        let (_tx, rx) = shutdown();

        svc.run(rx).await.unwrap();

        assert_eq!(store.transfer_ids().len(), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let store = shared_store();
        store.fail_next_commits(10);
        let svc = service(FixedSource { batches: two_batches() }, store.clone());
        let (_tx, rx) = shutdown();

        let err = svc.run(rx).await.unwrap_err();

        assert!(err.is_retryable());
        assert!(store.current_cursor().is_none());
    }

    #[tokio::test]
    async fn test_resumes_after_cursor() {
        let store = shared_store();
        store.set_cursor(IndexerCursor {
            chain_id: CHAIN.into(),
            last_indexed_block: 11,
            last_indexed_hash: BlockHash([11; 32]),
            updated_at: Utc::now(),
        });
        let svc = service(FixedSource { batches: two_batches() }, store.clone());
        let (_tx, rx) = shutdown();

        svc.run(rx).await.unwrap();

        assert_eq!(store.transfer_ids(), ["12-0", "12-1"]);
    }

    // Test critique: une base d'une autre chaîne bloque le démarrage
    #[tokio::test]
    async fn test_chain_mismatch_stops_indexer() {
        let store = shared_store();
        store.set_cursor(IndexerCursor {
            chain_id: "0xdeadbeef".into(),
            last_indexed_block: 1,
            last_indexed_hash: BlockHash([1; 32]),
            updated_at: Utc::now(),
        });
        let svc = service(FixedSource { batches: two_batches() }, store.clone());
        let (_tx, rx) = shutdown();

        let err = svc.run(rx).await.unwrap_err();

        assert!(matches!(err, IndexerError::ChainMismatch { .. }));
        assert!(store.transfer_ids().is_empty());
    }

    #[tokio::test]
    async fn test_non_retryable_source_error_stops() {
        let store = shared_store();
        let svc = service(BrokenReplay, store);
        let (_tx, rx) = shutdown();

        let err = svc.run(rx).await.unwrap_err();
        assert!(matches!(err, IndexerError::Chain(ChainError::ReplayError(_))));
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let store = shared_store();
        let svc = service(FixedSource { batches: two_batches() }, store.clone());
        let (tx, rx) = shutdown();
        tx.send(true).unwrap();

        let err = svc.run(rx).await.unwrap_err();
        assert!(matches!(err, IndexerError::ShutdownRequested));
    }
}
