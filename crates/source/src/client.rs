//! Substrate RPC client with dynamic metadata decoding.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parity_scale_codec::{Compact, Decode};
use subxt::backend::legacy::{LegacyBackend, LegacyRpcMethods};
use subxt::backend::rpc::RpcClient;
use subxt::blocks::Extrinsics;
use subxt::events::{Events, Phase};
use subxt::{OnlineClient, PolkadotConfig};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, instrument, trace, warn};

use tally_core::error::{ChainError, ChainResult};
use tally_core::models::{BlockHash, format_event_id};
use tally_core::ports::{
    BlockBatchStream, BlockHeader, BlockSource, CallRef, EventArgs, ExtrinsicRef, RawBlock,
    RawEvent,
};

/// Configuration for the Substrate client.
#[derive(Debug, Clone)]
pub struct SubstrateClientConfig {
    /// WebSocket URL (e.g., "ws://localhost:9944").
    pub ws_url: String,
    /// Maximum number of blocks per batch.
    pub batch_size: usize,
    /// First block to index when there is no cursor.
    pub start_block: u64,
    /// Maximum block fetches per second (None for unlimited).
    pub rate_limit: Option<u32>,
    /// Wait between finalized head checks once caught up.
    pub poll_interval: Duration,
}

type SubstrateExtrinsics = Extrinsics<PolkadotConfig, OnlineClient<PolkadotConfig>>;

impl Default for SubstrateClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:9944".to_string(),
            batch_size: 100,
            start_block: 0,
            rate_limit: Some(10),
            poll_interval: Duration::from_secs(6),
        }
    }
}

/// Substrate client adapter implementing the BlockSource port.
///
/// Blocks are fetched by number up to the finalized head, so catching up
/// and following the chain go through the same path. An archive node is
/// required to index blocks older than the node's pruning window.
#[derive(Clone)]
pub struct SubstrateClient {
    client: OnlineClient<PolkadotConfig>,
    rpc: LegacyRpcMethods<PolkadotConfig>,
    config: SubstrateClientConfig,
}

impl SubstrateClient {
    /// Connect to a Substrate node.
    #[instrument(skip_all, fields(url = %config.ws_url))]
    pub async fn connect(config: SubstrateClientConfig) -> ChainResult<Self> {
        debug!("Connecting to node");

        let rpc_client = RpcClient::from_url(&config.ws_url)
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;
        let backend = LegacyBackend::<PolkadotConfig>::builder().build(rpc_client.clone());
        let client = OnlineClient::<PolkadotConfig>::from_backend(Arc::new(backend))
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;
        let rpc = LegacyRpcMethods::<PolkadotConfig>::new(rpc_client);

        debug!(
            spec_version = client.runtime_version().spec_version,
            "Connected successfully"
        );

        Ok(Self {
            client,
            rpc,
            config,
        })
    }

    /// Height of the latest finalized block.
    async fn finalized_height(&self) -> ChainResult<u64> {
        let hash = self
            .rpc
            .chain_get_finalized_head()
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;
        let header = self
            .rpc
            .chain_get_header(Some(hash))
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?
            .ok_or_else(|| ChainError::RpcError("finalized head has no header".into()))?;

        Ok(header.number as u64)
    }

    /// Fetch and decode one block by number.
    #[instrument(skip(self))]
    async fn fetch_block(&self, height: u64) -> ChainResult<RawBlock> {
        let fetch_error = |message: String| ChainError::BlockFetchError {
            block: height,
            message,
        };

        let number = u32::try_from(height).map_err(|_| fetch_error("height out of range".into()))?;
        let hash = self
            .rpc
            .chain_get_block_hash(Some(number.into()))
            .await
            .map_err(|e| fetch_error(e.to_string()))?
            .ok_or_else(|| fetch_error("no block at this height".into()))?;

        let spec_version = self
            .rpc
            .state_get_runtime_version(Some(hash))
            .await
            .map_err(|e| fetch_error(e.to_string()))?
            .spec_version;

        let block = self
            .client
            .blocks()
            .at(hash)
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        // Both calls decode with the metadata loaded at connect time.
        let extrinsics = block
            .extrinsics()
            .await
            .map_err(|e| block_error(e, height, spec_version))?;
        let events = block
            .events()
            .await
            .map_err(|e| block_error(e, height, spec_version))?;

        let header = BlockHeader {
            height,
            hash: BlockHash(hash.0),
            timestamp: block_timestamp(&extrinsics, height),
        };
        let events = decode_events(&extrinsics, &events, &header, spec_version)?;

        trace!(events = events.len(), spec_version, "Block fetched");

        Ok(RawBlock { header, events })
    }
}

/// Paging state of [`SubstrateClient::batches`].
struct Paging {
    source: SubstrateClient,
    next: u64,
    head: u64,
    limiter: Option<tokio::time::Interval>,
    failed: bool,
}

impl Paging {
    /// Fetch the next run of finalized blocks, waiting for new ones once
    /// caught up.
    async fn next_batch(&mut self) -> ChainResult<Vec<RawBlock>> {
        while self.next > self.head {
            self.head = self.source.finalized_height().await?;
            if self.next > self.head {
                trace!(next = self.next, head = self.head, "Waiting for finalized blocks");
                tokio::time::sleep(self.source.config.poll_interval).await;
            }
        }

        let last = self
            .head
            .min(self.next + self.source.config.batch_size.max(1) as u64 - 1);
        let mut blocks = Vec::with_capacity((last - self.next + 1) as usize);

        for height in self.next..=last {
            if let Some(limiter) = self.limiter.as_mut() {
                limiter.tick().await;
            }
            blocks.push(self.source.fetch_block(height).await?);
        }

        self.next = last + 1;
        Ok(blocks)
    }
}

#[async_trait]
impl BlockSource for SubstrateClient {
    async fn chain_id(&self) -> ChainResult<String> {
        Ok(BlockHash(self.client.genesis_hash().0).to_hex())
    }

    async fn batches(&self, after: Option<u64>) -> ChainResult<BlockBatchStream> {
        let next = after.map_or(self.config.start_block, |height| height + 1);
        let head = self.finalized_height().await?;

        if next <= head {
            debug!(from = next, head, behind = head - next + 1, "Catching up with finalized head");
        }

        let limiter = self.config.rate_limit.filter(|r| *r > 0).map(|rate| {
            let period = Duration::from_secs(1) / rate;
            let mut interval = tokio::time::interval_at(Instant::now(), period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        let paging = Paging {
            source: self.clone(),
            next,
            head,
            limiter,
            failed: false,
        };

        // The stream never ends on its own; after an error it stops and
        // the indexer reopens it from its cursor.
        let stream = futures::stream::unfold(paging, |mut paging| async move {
            if paging.failed {
                return None;
            }
            let batch = paging.next_batch().await;
            paging.failed = batch.is_err();
            Some((batch, paging))
        });

        Ok(Box::pin(stream))
    }
}

// =============================================================================
// Block decoding helpers
// =============================================================================

/// Classify a failure to load the body or events of a fetched block.
///
/// Transport failures can be retried. Anything else means the loaded
/// metadata cannot describe this block, which no retry will change.
fn block_error(e: subxt::Error, height: u64, spec_version: u32) -> ChainError {
    if matches!(e, subxt::Error::Rpc(_)) {
        return ChainError::RpcError(e.to_string());
    }
    warn!(block = height, spec_version, error = ?e, "Block not decodable with loaded metadata");
    ChainError::UnsupportedRuntime {
        block: height,
        spec_version,
    }
}

/// Split the events of a block and attach their extrinsic context.
///
/// Payloads are kept as raw SCALE field bytes; decoding them is left to the
/// layout registry, which knows which shape each spec version uses.
fn decode_events(
    extrinsics: &SubstrateExtrinsics,
    events: &Events<PolkadotConfig>,
    header: &BlockHeader,
    spec_version: u32,
) -> ChainResult<Vec<RawEvent>> {
    let mut context: HashMap<u32, (ExtrinsicRef, Option<CallRef>)> = HashMap::new();
    for (index, ext) in extrinsics.iter().enumerate() {
        let call = match (ext.pallet_name(), ext.variant_name()) {
            (Ok(pallet), Ok(variant)) => Some(CallRef {
                name: format!("{}.{}", pallet, variant),
            }),
            _ => None,
        };
        let hash = ExtrinsicRef {
            hash: format!("0x{}", hex::encode(ext.hash().0)),
        };
        context.insert(index as u32, (hash, call));
    }

    let mut raw_events = Vec::new();

    for (index, event) in events.iter().enumerate() {
        let ev = event.map_err(|e| {
            warn!(block = header.height, index, error = ?e, "Failed to decode event");
            ChainError::UnsupportedRuntime {
                block: header.height,
                spec_version,
            }
        })?;

        let (extrinsic, call) = match ev.phase() {
            Phase::ApplyExtrinsic(idx) => context
                .get(&idx)
                .map(|(ext, call)| (Some(ext.clone()), call.clone()))
                .unwrap_or((None, None)),
            _ => (None, None),
        };

        raw_events.push(RawEvent {
            id: format_event_id(header.height, &header.hash, index as u32),
            name: format!("{}.{}", ev.pallet_name(), ev.variant_name()),
            spec_version,
            extrinsic,
            call,
            args: EventArgs::Scale(ev.field_bytes().to_vec()),
        });
    }

    Ok(raw_events)
}

/// Get timestamp from Timestamp.set inherent.
fn block_timestamp(extrinsics: &SubstrateExtrinsics, height: u64) -> Option<DateTime<Utc>> {
    for ext in extrinsics.iter() {
        let (Ok(pallet), Ok(call)) = (ext.pallet_name(), ext.variant_name()) else {
            continue;
        };

        if pallet == "Timestamp" && call == "set" {
            if let Some(ms) = decode_moment(ext.field_bytes()) {
                return millis_to_datetime(ms);
            }

            warn!(block = height, "Could not decode timestamp from Timestamp.set");
        }
    }

    None
}

fn millis_to_datetime(ms: u64) -> Option<DateTime<Utc>> {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

/// Decode the `Compact<u64>` argument of `Timestamp.set`.
fn decode_moment(bytes: &[u8]) -> Option<u64> {
    Compact::<u64>::decode(&mut &bytes[..]).ok().map(|c| c.0)
}
