//! Port trait for the block stream.
//!
//! This trait defines the interface for receiving batches of blocks from
//! a Substrate chain or an archive dump. Implementations live in the
//! infrastructure layer (e.g., `tally-source`).

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;

use crate::error::ChainResult;
use crate::models::BlockHash;

/// Block header fields the indexer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block number.
    pub height: u64,
    /// Block hash.
    pub hash: BlockHash,
    /// Block timestamp (from the Timestamp pallet).
    pub timestamp: Option<DateTime<Utc>>,
}

/// A block as delivered by the source, before any decoding.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub header: BlockHeader,
    /// Events in emission order.
    pub events: Vec<RawEvent>,
}

/// Event payload, in whichever encoding the source produced.
#[derive(Debug, Clone, PartialEq)]
pub enum EventArgs {
    /// SCALE-encoded field bytes (live node).
    Scale(Vec<u8>),
    /// Decoded JSON arguments (archive dump).
    Json(serde_json::Value),
}

/// Enclosing extrinsic of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtrinsicRef {
    /// 0x-prefixed extrinsic hash.
    pub hash: String,
}

/// Enclosing call of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRef {
    /// Qualified call name (e.g., "Balances.transfer_keep_alive").
    pub name: String,
}

/// Raw event data.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Globally unique, stable event id.
    pub id: String,
    /// Qualified event name (e.g., "Balances.Transfer").
    pub name: String,
    /// Runtime spec version active when the event was emitted.
    pub spec_version: u32,
    /// Enclosing extrinsic (None for system events).
    pub extrinsic: Option<ExtrinsicRef>,
    /// Enclosing call (None for system events).
    pub call: Option<CallRef>,
    /// Opaque payload.
    pub args: EventArgs,
}

/// Stream of block batches, each in ascending height order.
pub type BlockBatchStream = Pin<Box<dyn Stream<Item = ChainResult<Vec<RawBlock>>> + Send>>;

/// Port trait for the block stream.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Identifier of the chain (hex genesis hash).
    async fn chain_id(&self) -> ChainResult<String>;

    /// Stream batches of blocks strictly above `after` (or from the
    /// beginning of the source when `None`).
    async fn batches(&self, after: Option<u64>) -> ChainResult<BlockBatchStream>;
}
