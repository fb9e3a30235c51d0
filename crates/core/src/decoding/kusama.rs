//! `Balances.Transfer` layouts on Kusama.
//!
//! | Layout | Spec versions      | Shape                                  |
//! |--------|--------------------|----------------------------------------|
//! | V1020  | 1020 ..= 1049      | `(AccountId, AccountId, Balance, fee)` |
//! | V1050  | 1050 ..= 9129      | `(AccountId, AccountId, Balance)`      |
//! | V9130  | 9130 ..= latest    | `{ from, to, amount }`                 |
//!
//! Payloads arrive either SCALE-encoded (live node) or as archive JSON, where
//! keys are `0x`-prefixed hex strings and balances decimal strings.

use parity_scale_codec::{Decode, DecodeAll};
use serde_json::Value;

use super::{DecodedLayout, EventDecoder, LayoutRule, NamedTransfer, SpecVersionWindow};
use crate::address::RawKey;
use crate::error::{DomainError, DomainResult};
use crate::models::Amount;
use crate::ports::EventArgs;

/// Qualified name of the balance transfer event.
pub const BALANCES_TRANSFER: &str = "Balances.Transfer";

/// First spec version of the named-record layout.
pub const V9130_FIRST: u32 = 9130;

/// Highest spec version the latest layout has been checked against.
pub const DEFAULT_LATEST_SPEC_VERSION: u32 = 1_007_000;

#[derive(Decode)]
struct TransferV1020([u8; 32], [u8; 32], u128, u128);

#[derive(Decode)]
struct TransferV1050([u8; 32], [u8; 32], u128);

#[derive(Decode)]
struct TransferV9130 {
    from: [u8; 32],
    to: [u8; 32],
    amount: u128,
}

/// Build the transfer decoder with the latest layout open until
/// `latest_spec_version`.
///
/// Events above that version fail with `UnknownEventVersion` until the
/// new runtime has been checked and the bound raised.
pub fn balances_transfer_decoder(latest_spec_version: u32) -> DomainResult<EventDecoder> {
    EventDecoder::new()
        .with_rule(LayoutRule::new(
            "V1020",
            SpecVersionWindow::new(1020, 1049),
            decode_v1020,
        ))?
        .with_rule(LayoutRule::new(
            "V1050",
            SpecVersionWindow::new(1050, V9130_FIRST - 1),
            decode_v1050,
        ))?
        .with_rule(LayoutRule::new(
            "V9130",
            SpecVersionWindow::new(V9130_FIRST, latest_spec_version),
            decode_v9130,
        ))
}

fn decode_v1020(args: &EventArgs) -> DomainResult<DecodedLayout> {
    match args {
        EventArgs::Scale(bytes) => {
            // The fee is not part of the ledger record.
            let TransferV1020(from, to, amount, _fee) = scale_decode(bytes)?;
            Ok(DecodedLayout::Positional(
                from.into(),
                to.into(),
                amount.into(),
            ))
        }
        EventArgs::Json(value) => positional_from_json(value, 4),
    }
}

fn decode_v1050(args: &EventArgs) -> DomainResult<DecodedLayout> {
    match args {
        EventArgs::Scale(bytes) => {
            let TransferV1050(from, to, amount) = scale_decode(bytes)?;
            Ok(DecodedLayout::Positional(
                from.into(),
                to.into(),
                amount.into(),
            ))
        }
        EventArgs::Json(value) => positional_from_json(value, 3),
    }
}

fn decode_v9130(args: &EventArgs) -> DomainResult<DecodedLayout> {
    match args {
        EventArgs::Scale(bytes) => {
            let record: TransferV9130 = scale_decode(bytes)?;
            Ok(DecodedLayout::Named(NamedTransfer {
                from: record.from.into(),
                to: record.to.into(),
                amount: record.amount.into(),
            }))
        }
        EventArgs::Json(value) => named_from_json(value),
    }
}

// =============================================================================
// SCALE helpers
// =============================================================================

/// Decode a whole payload; trailing bytes mean the layout is wrong.
fn scale_decode<T: DecodeAll>(bytes: &[u8]) -> DomainResult<T> {
    T::decode_all(&mut &bytes[..]).map_err(|e| DomainError::DecodingError(e.to_string()))
}

// =============================================================================
// JSON helpers
// =============================================================================

fn positional_from_json(value: &Value, arity: usize) -> DomainResult<DecodedLayout> {
    let items = value
        .as_array()
        .filter(|items| items.len() == arity)
        .ok_or_else(|| {
            DomainError::DecodingError(format!("expected a tuple of {} fields, got {}", arity, value))
        })?;

    // Trailing fields (the V1020 fee) must still be balances.
    for (index, item) in items.iter().enumerate().skip(3) {
        json_amount(item, &index.to_string())?;
    }

    Ok(DecodedLayout::Positional(
        json_key(&items[0], "0")?,
        json_key(&items[1], "1")?,
        json_amount(&items[2], "2")?,
    ))
}

fn named_from_json(value: &Value) -> DomainResult<DecodedLayout> {
    let obj = value.as_object().ok_or_else(|| {
        DomainError::DecodingError(format!("expected a named record, got {}", value))
    })?;

    let field = |name: &str| {
        obj.get(name)
            .ok_or_else(|| DomainError::DecodingError(format!("missing field '{}'", name)))
    };

    Ok(DecodedLayout::Named(NamedTransfer {
        from: json_key(field("from")?, "from")?,
        to: json_key(field("to")?, "to")?,
        amount: json_amount(field("amount")?, "amount")?,
    }))
}

/// Accepts a hex string or an array of byte values.
///
/// Length and hex validity are checked later by the address codec.
fn json_key(value: &Value, field: &str) -> DomainResult<RawKey> {
    match value {
        Value::String(s) => Ok(RawKey::Hex(s.clone())),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_u64().and_then(|b| u8::try_from(b).ok()))
            .collect::<Option<Vec<u8>>>()
            .map(RawKey::Bytes)
            .ok_or_else(|| {
                DomainError::MalformedAddressInput(format!("field '{}' is not a byte array", field))
            }),
        other => Err(DomainError::DecodingError(format!(
            "field '{}' is not an account key: {}",
            field, other
        ))),
    }
}

/// Accepts a decimal string or an unsigned JSON integer.
fn json_amount(value: &Value, field: &str) -> DomainResult<Amount> {
    match value {
        Value::String(s) => s.parse().map_err(|e| {
            DomainError::DecodingError(format!("field '{}' is not an amount ({}): {}", field, s, e))
        }),
        Value::Number(n) => n.as_u64().map(Amount::from).ok_or_else(|| {
            DomainError::DecodingError(format!("field '{}' is not an unsigned integer: {}", field, n))
        }),
        other => Err(DomainError::DecodingError(format!(
            "field '{}' is not an amount: {}",
            field, other
        ))),
    }
}
