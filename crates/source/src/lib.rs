//! Block sources for the Tally transfer indexer.
//!
//! This crate implements the [`BlockSource`] port from `tally-core` twice:
//!
//! - [`SubstrateClient`] pages finalized blocks from a node over WebSocket
//!   RPC, keeping event payloads as raw SCALE bytes
//! - [`ReplaySource`] reads an NDJSON archive dump, with JSON payloads and
//!   hex-encoded account keys
//!
//! # Usage
//!
//! ```ignore
//! use tally_source::{SubstrateClient, SubstrateClientConfig};
//!
//! let config = SubstrateClientConfig {
//!     ws_url: "wss://kusama-rpc.polkadot.io".to_string(),
//!     ..Default::default()
//! };
//!
//! let client = SubstrateClient::connect(config).await?;
//! let mut batches = client.batches(None).await?;
//!
//! while let Some(batch) = batches.next().await {
//!     // Process batch...
//! }
//! ```
//!
//! [`BlockSource`]: tally_core::ports::BlockSource

mod client;
mod replay;

pub use client::{SubstrateClient, SubstrateClientConfig};
pub use replay::{KUSAMA_GENESIS, ReplayConfig, ReplaySource};
