//! Domain models representing indexed ledger data.
//!
//! These models are storage-agnostic and represent the canonical
//! form of indexed data within the domain layer.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

// =============================================================================
// 32-byte Hash Types
// =============================================================================

/// Macro to generate 32-byte hash newtypes with common functionality.
///
/// Generates:
/// - `from_hex()` - Parse from hex string (with or without 0x prefix)
/// - `to_hex()` - Convert to 0x-prefixed hex string
/// - `Display` trait implementation
/// - `From<[u8; 32]>` implementation
macro_rules! hash32_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Parse from hex string (with or without 0x prefix).
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s)?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(arr))
            }

            /// Convert to 0x-prefixed hex string.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }

            /// Get the inner bytes.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
    };
}

hash32_newtype!(
    /// 32-byte block hash (Blake2-256).
    BlockHash
);

hash32_newtype!(
    /// 32-byte account public key, before SS58 encoding.
    PublicKey
);

// =============================================================================
// Amounts
// =============================================================================

/// Unsigned arbitrary-precision ledger amount.
///
/// Stored as `NUMERIC` and exchanged as a decimal string so that no
/// value ever passes through a float.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(pub BigUint);

impl From<u128> for Amount {
    fn from(value: u128) -> Self {
        Self(BigUint::from(value))
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(BigUint::from(value))
    }
}

impl From<BigUint> for Amount {
    fn from(value: BigUint) -> Self {
        Self(value)
    }
}

impl FromStr for Amount {
    type Err = num_bigint::ParseBigIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<BigUint>().map(Self)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Ledger Entities
// =============================================================================

/// A ledger account, keyed by its canonical SS58 address.
///
/// Accounts are created the first time an address is referenced and are
/// never updated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Account {
    /// Canonical SS58 address.
    pub id: String,
}

impl Account {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// A normalized transfer extracted from one source event.
///
/// Endpoints are canonical addresses; the account entities are resolved
/// later by the batch accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    /// Source event id, stable across re-processing.
    pub id: String,
    /// Block number containing the event.
    pub block_number: u64,
    /// Block timestamp.
    pub timestamp: DateTime<Utc>,
    /// Hash of the enclosing extrinsic (None for system events).
    pub extrinsic_hash: Option<String>,
    /// Name of the enclosing call (e.g., "Balances.transfer").
    pub call: Option<String>,
    /// Sender address.
    pub from: String,
    /// Recipient address.
    pub to: String,
    /// Amount transferred (in smallest unit).
    pub amount: Amount,
}

/// A transfer ready to be persisted.
///
/// `from` and `to` share the account objects held by the batch, so two
/// transfers touching the same address point at the same `Account`.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub id: String,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub extrinsic_hash: Option<String>,
    pub call: Option<String>,
    pub from: Arc<Account>,
    pub to: Arc<Account>,
    pub amount: Amount,
}

// =============================================================================
// Indexer State
// =============================================================================

/// Indexer cursor tracking progress.
///
/// The cursor tracks the last block of the last persisted batch for each
/// chain, enabling the indexer to resume from where it left off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerCursor {
    /// Chain identifier (genesis hash).
    pub chain_id: String,
    /// Last fully indexed block number.
    pub last_indexed_block: u64,
    /// Last indexed block hash.
    pub last_indexed_hash: BlockHash,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Build the archive-style event id: zero-padded height, zero-padded
/// event index and the first five hex characters of the block hash.
pub fn format_event_id(block_number: u64, block_hash: &BlockHash, index: u32) -> String {
    let hash = hex::encode(&block_hash.0[..3]);
    format!("{:010}-{:06}-{}", block_number, index, &hash[..5])
}

/// Leading characters of a chain id, for log fields.
pub fn short_chain_id(chain_id: &str) -> String {
    chain_id.chars().take(16).collect()
}

// =============================================================================
// Tests
// =============================================================================
