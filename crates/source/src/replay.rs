//! NDJSON archive replay.
//!
//! Each line of the input holds one block:
//!
//! ```json
//! {"height": 1000, "hash": "0xabcd…", "timestamp": 1577836800000, "specVersion": 1020,
//!  "events": [{"name": "Balances.Transfer", "args": ["0x…", "0x…", "500", "0"],
//!              "extrinsic": {"hash": "0x…"}, "call": {"name": "Balances.transfer"}}]}
//! ```
//!
//! Timestamps are milliseconds or RFC 3339 strings. Event ids and spec
//! versions may be omitted, in which case they are derived from the block.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, instrument};

use tally_core::error::{ChainError, ChainResult};
use tally_core::models::{BlockHash, format_event_id};
use tally_core::ports::{
    BlockBatchStream, BlockHeader, BlockSource, CallRef, EventArgs, ExtrinsicRef, RawBlock,
    RawEvent,
};

/// Kusama genesis hash.
pub const KUSAMA_GENESIS: &str =
    "0xb0a8d493285c2df73290dfb7e61f870f17b41801197a149ca93654499ea3dafe";

/// Configuration for the replay source.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Path of the NDJSON file.
    pub path: PathBuf,
    /// Chain the dump was taken from (genesis hash).
    pub chain_id: String,
    /// Maximum number of blocks per batch.
    pub batch_size: usize,
}

/// Block source reading an NDJSON dump.
pub struct ReplaySource {
    config: ReplayConfig,
}

impl ReplaySource {
    pub fn new(config: ReplayConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BlockSource for ReplaySource {
    async fn chain_id(&self) -> ChainResult<String> {
        Ok(self.config.chain_id.clone())
    }

    #[instrument(skip(self), fields(path = %self.config.path.display()))]
    async fn batches(&self, after: Option<u64>) -> ChainResult<BlockBatchStream> {
        let file = File::open(&self.config.path)
            .await
            .map_err(|e| ChainError::ReplayError(format!("{}: {}", self.config.path.display(), e)))?;

        debug!(?after, "Replaying dump");

        let reader = DumpReader {
            lines: BufReader::new(file).lines(),
            line_no: 0,
            after,
            last_height: None,
            batch_size: self.config.batch_size.max(1),
            done: false,
        };

        let stream = futures::stream::unfold(reader, |mut reader| async move {
            if reader.done {
                return None;
            }
            match reader.next_batch().await {
                Ok(batch) if batch.is_empty() => None,
                Ok(batch) => Some((Ok(batch), reader)),
                Err(e) => {
                    reader.done = true;
                    Some((Err(e), reader))
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

struct DumpReader {
    lines: Lines<BufReader<File>>,
    line_no: usize,
    after: Option<u64>,
    last_height: Option<u64>,
    batch_size: usize,
    done: bool,
}

impl DumpReader {
    async fn next_batch(&mut self) -> ChainResult<Vec<RawBlock>> {
        let mut batch = Vec::new();

        while batch.len() < self.batch_size {
            let Some(line) = self
                .lines
                .next_line()
                .await
                .map_err(|e| ChainError::ReplayError(e.to_string()))?
            else {
                self.done = true;
                break;
            };
            self.line_no += 1;

            if line.trim().is_empty() {
                continue;
            }

            let block = parse_block(&line)
                .map_err(|e| ChainError::ReplayError(format!("line {}: {}", self.line_no, e)))?;

            let height = block.header.height;
            if self.last_height.is_some_and(|last| height <= last) {
                return Err(ChainError::ReplayError(format!(
                    "line {}: block {} is not above block {}",
                    self.line_no,
                    height,
                    self.last_height.unwrap_or_default()
                )));
            }
            self.last_height = Some(height);

            if self.after.is_some_and(|after| height <= after) {
                continue;
            }
            batch.push(block);
        }

        Ok(batch)
    }
}

// =============================================================================
// Dump format
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockDto {
    height: u64,
    hash: String,
    timestamp: Option<TimestampDto>,
    spec_version: u32,
    #[serde(default)]
    events: Vec<EventDto>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimestampDto {
    Millis(i64),
    Rfc3339(DateTime<Utc>),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventDto {
    id: Option<String>,
    index: Option<u32>,
    name: String,
    spec_version: Option<u32>,
    extrinsic: Option<ExtrinsicDto>,
    call: Option<CallDto>,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Deserialize)]
struct ExtrinsicDto {
    hash: String,
}

#[derive(Deserialize)]
struct CallDto {
    name: String,
}

fn parse_block(line: &str) -> Result<RawBlock, String> {
    let dto: BlockDto = serde_json::from_str(line).map_err(|e| e.to_string())?;

    let hash = BlockHash::from_hex(&dto.hash)
        .map_err(|e| format!("invalid block hash '{}': {}", dto.hash, e))?;

    let timestamp = match dto.timestamp {
        None => None,
        Some(TimestampDto::Rfc3339(dt)) => Some(dt),
        Some(TimestampDto::Millis(ms)) => Some(
            DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| format!("timestamp {} out of range", ms))?,
        ),
    };

    let header = BlockHeader {
        height: dto.height,
        hash,
        timestamp,
    };

    let events = dto
        .events
        .into_iter()
        .enumerate()
        .map(|(position, ev)| {
            let index = ev.index.unwrap_or(position as u32);
            RawEvent {
                id: ev
                    .id
                    .unwrap_or_else(|| format_event_id(header.height, &header.hash, index)),
                name: ev.name,
                spec_version: ev.spec_version.unwrap_or(dto.spec_version),
                extrinsic: ev.extrinsic.map(|e| ExtrinsicRef { hash: e.hash }),
                call: ev.call.map(|c| CallRef { name: c.name }),
                args: EventArgs::Json(ev.args),
            }
        })
        .collect();

    Ok(RawBlock { header, events })
}
