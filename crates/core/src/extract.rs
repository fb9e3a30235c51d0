//! Extraction of normalized transfer records from raw blocks.

use tracing::trace;

use crate::address::AddressCodec;
use crate::decoding::EventDecoder;
use crate::error::{DomainError, DomainResult};
use crate::models::TransferRecord;
use crate::ports::RawBlock;

/// Turns target events of a block into [`TransferRecord`]s.
///
/// Extraction is pure: the same blocks always yield the same records in
/// the same order (block order, then event order).
#[derive(Debug, Clone)]
pub struct EventExtractor {
    event_name: String,
    decoder: EventDecoder,
    codec: AddressCodec,
}

impl EventExtractor {
    pub fn new(event_name: impl Into<String>, decoder: EventDecoder, codec: AddressCodec) -> Self {
        Self {
            event_name: event_name.into(),
            decoder,
            codec,
        }
    }

    /// Name of the events this extractor keeps.
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Extract records from one block.
    ///
    /// Fails on the first event that cannot be faithfully recorded.
    pub fn extract_block(&self, block: &RawBlock) -> DomainResult<Vec<TransferRecord>> {
        let mut records = Vec::new();

        for event in block
            .events
            .iter()
            .filter(|event| event.name == self.event_name)
        {
            let timestamp = block
                .header
                .timestamp
                .ok_or(DomainError::MissingBlockTimestamp {
                    block: block.header.height,
                })?;

            let args = self.decoder.decode(event)?;

            records.push(TransferRecord {
                id: event.id.clone(),
                block_number: block.header.height,
                timestamp,
                extrinsic_hash: event.extrinsic.as_ref().map(|e| e.hash.clone()),
                call: event.call.as_ref().map(|c| c.name.clone()),
                from: self.codec.encode_raw(&args.from)?,
                to: self.codec.encode_raw(&args.to)?,
                amount: args.amount,
            });
        }

        if !records.is_empty() {
            trace!(block = block.header.height, count = records.len(), "Extracted transfers");
        }

        Ok(records)
    }

    /// Extract records from a whole batch, preserving block order.
    pub fn extract_batch(&self, blocks: &[RawBlock]) -> DomainResult<Vec<TransferRecord>> {
        let mut records = Vec::new();
        for block in blocks {
            records.extend(self.extract_block(block)?);
        }
        Ok(records)
    }
}
