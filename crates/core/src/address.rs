//! SS58 address encoding for one fixed network.
//!
//! Event payloads carry account keys either as raw bytes (SCALE-decoded
//! layouts) or as `0x`-prefixed hex strings (archive JSON). Both are
//! normalized to a [`PublicKey`] before encoding, so the same key always
//! produces the same address.

use sp_core::crypto::{AccountId32, Ss58Codec};
use ss58_registry::{Ss58AddressFormat, Ss58AddressFormatRegistry};

use crate::error::{DomainError, DomainResult};
use crate::models::PublicKey;

/// Length of an `AccountId32` public key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// An account key as it appears in an event payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawKey {
    /// Raw key bytes.
    Bytes(Vec<u8>),
    /// `0x`-prefixed hex string.
    Hex(String),
}

impl RawKey {
    /// Normalize to a 32-byte public key.
    pub fn to_public_key(&self) -> DomainResult<PublicKey> {
        match self {
            RawKey::Bytes(bytes) => key_from_slice(bytes),
            RawKey::Hex(s) => {
                let digits = s.strip_prefix("0x").ok_or_else(|| {
                    DomainError::MalformedAddressInput(format!("missing 0x prefix: {}", s))
                })?;
                let bytes = hex::decode(digits).map_err(|e| {
                    DomainError::MalformedAddressInput(format!("invalid hex key {}: {}", s, e))
                })?;
                key_from_slice(&bytes)
            }
        }
    }
}

impl From<[u8; 32]> for RawKey {
    fn from(bytes: [u8; 32]) -> Self {
        RawKey::Bytes(bytes.to_vec())
    }
}

fn key_from_slice(bytes: &[u8]) -> DomainResult<PublicKey> {
    let arr: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| {
        DomainError::MalformedAddressInput(format!(
            "expected {} key bytes, got {}",
            PUBLIC_KEY_LEN,
            bytes.len()
        ))
    })?;
    Ok(PublicKey(arr))
}

/// Stateless SS58 codec bound to one network prefix.
#[derive(Debug, Clone, Copy)]
pub struct AddressCodec {
    format: Ss58AddressFormat,
}

impl AddressCodec {
    /// Codec for an explicit SS58 prefix.
    pub fn new(prefix: u16) -> Self {
        Self {
            format: Ss58AddressFormat::custom(prefix),
        }
    }

    /// Codec for a network registered in the SS58 registry (e.g. "kusama").
    pub fn for_network(network: &str) -> DomainResult<Self> {
        let registry = Ss58AddressFormatRegistry::try_from(network).map_err(|_| {
            DomainError::ValidationError(format!("unknown SS58 network: {}", network))
        })?;
        Ok(Self {
            format: registry.into(),
        })
    }

    /// SS58 prefix of the network.
    pub fn prefix(&self) -> u16 {
        self.format.prefix()
    }

    /// Encode a public key to its canonical address.
    pub fn encode(&self, key: &PublicKey) -> String {
        AccountId32::from(key.0).to_ss58check_with_version(self.format)
    }

    /// Normalize a payload key and encode it.
    pub fn encode_raw(&self, raw: &RawKey) -> DomainResult<String> {
        Ok(self.encode(&raw.to_public_key()?))
    }

    /// Decode a canonical address back to its public key.
    ///
    /// Addresses encoded for another network are rejected.
    pub fn decode(&self, address: &str) -> DomainResult<PublicKey> {
        let (account, format) = AccountId32::from_ss58check_with_version(address)
            .map_err(|e| DomainError::MalformedAddressInput(format!("{}: {:?}", address, e)))?;

        if format.prefix() != self.prefix() {
            return Err(DomainError::MalformedAddressInput(format!(
                "{} uses SS58 prefix {}, expected {}",
                address,
                format.prefix(),
                self.prefix()
            )));
        }

        let bytes: [u8; 32] = account.into();
        Ok(PublicKey(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "d43593c715fdd31c61141abd04a99fd6822c8558854ccde39a5684e7a56da27d";

    fn alice() -> [u8; 32] {
        PublicKey::from_hex(ALICE).unwrap().0
    }

    #[test]
    fn test_kusama_known_vector() {
        let codec = AddressCodec::for_network("kusama").unwrap();
        assert_eq!(codec.prefix(), 2);
        assert_eq!(
            codec.encode(&PublicKey(alice())),
            "HNZata7iMYWmk5RvZRTiAsSDhV8366zq2YGb3tLH5Upf74F"
        );
    }

    #[test]
    fn test_roundtrip_for_several_keys() {
        let codec = AddressCodec::new(2);
        for key in [[0u8; 32], [0xff; 32], alice()] {
            let address = codec.encode(&PublicKey(key));
            assert_eq!(codec.decode(&address).unwrap().0, key);
        }
    }

    // Test critique: bytes bruts et hex préfixé donnent la même adresse
    #[test]
    fn test_bytes_and_hex_normalize_to_same_address() {
        let codec = AddressCodec::new(2);
        let from_bytes = codec.encode_raw(&RawKey::from(alice())).unwrap();
        let from_hex = codec.encode_raw(&RawKey::Hex(format!("0x{}", ALICE))).unwrap();
        assert_eq!(from_bytes, from_hex);
    }

    #[test]
    fn test_rejects_truncated_and_oversized_keys() {
        let codec = AddressCodec::new(2);
        for len in [0usize, 31, 33] {
            let err = codec.encode_raw(&RawKey::Bytes(vec![1; len])).unwrap_err();
            assert!(matches!(err, DomainError::MalformedAddressInput(_)));
        }
    }

    #[test]
    fn test_rejects_malformed_hex() {
        let codec = AddressCodec::new(2);
        let cases = [
            format!("0x{}", &ALICE[..62]),
            format!("0x{}zz", &ALICE[..62]),
            ALICE.to_string(),
        ];
        for case in cases {
            let err = codec.encode_raw(&RawKey::Hex(case)).unwrap_err();
            assert!(matches!(err, DomainError::MalformedAddressInput(_)));
        }
    }

    #[test]
    fn test_decode_rejects_other_network() {
        let polkadot = AddressCodec::new(0);
        let kusama = AddressCodec::new(2);
        let address = polkadot.encode(&PublicKey(alice()));
        assert!(matches!(
            kusama.decode(&address),
            Err(DomainError::MalformedAddressInput(_))
        ));
    }

    #[test]
    fn test_unknown_network_name() {
        assert!(AddressCodec::for_network("not-a-chain").is_err());
    }
}
