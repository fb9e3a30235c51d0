//! Version-tolerant event decoding.
//!
//! The wire format of an event can change with every runtime upgrade. An
//! [`EventDecoder`] holds an ordered list of [`LayoutRule`]s, each valid over
//! a window of spec versions, and decodes an event with the first rule whose
//! window contains the event's declared spec version.
//!
//! Supporting a new runtime upgrade means appending one rule; the dispatch
//! itself never changes.
//!
//! # Example
//!
//! ```ignore
//! let decoder = kusama::balances_transfer_decoder(9430)?;
//! let args = decoder.decode(&raw_event)?;
//! let from = codec.encode_raw(&args.from)?;
//! ```

pub mod kusama;

use tracing::trace;

use crate::address::RawKey;
use crate::error::{DomainError, DomainResult};
use crate::models::Amount;
use crate::ports::{EventArgs, RawEvent};

// =============================================================================
// Windows
// =============================================================================

/// Inclusive range of spec versions a layout applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecVersionWindow {
    pub first: u32,
    pub last: u32,
}

impl SpecVersionWindow {
    pub const fn new(first: u32, last: u32) -> Self {
        Self { first, last }
    }

    pub fn contains(&self, spec_version: u32) -> bool {
        (self.first..=self.last).contains(&spec_version)
    }
}

// =============================================================================
// Decoded shapes
// =============================================================================

/// Canonical transfer arguments, whatever layout they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferArgs {
    pub from: RawKey,
    pub to: RawKey,
    pub amount: Amount,
}

/// Named record produced by newer layouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedTransfer {
    pub from: RawKey,
    pub to: RawKey,
    pub amount: Amount,
}

/// Output of a single layout's decode function.
///
/// Older layouts are positional tuples, newer ones named records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedLayout {
    Positional(RawKey, RawKey, Amount),
    Named(NamedTransfer),
}

impl From<DecodedLayout> for TransferArgs {
    fn from(layout: DecodedLayout) -> Self {
        match layout {
            DecodedLayout::Positional(from, to, amount) => TransferArgs { from, to, amount },
            DecodedLayout::Named(NamedTransfer { from, to, amount }) => {
                TransferArgs { from, to, amount }
            }
        }
    }
}

// =============================================================================
// Rules
// =============================================================================

/// Decode function for one payload layout.
pub type DecodeFn = fn(&EventArgs) -> DomainResult<DecodedLayout>;

/// A payload layout valid over a window of spec versions.
#[derive(Debug, Clone, Copy)]
pub struct LayoutRule {
    /// Short label used in logs (e.g. "V1050").
    pub name: &'static str,
    pub window: SpecVersionWindow,
    decode: DecodeFn,
}

impl LayoutRule {
    pub const fn new(name: &'static str, window: SpecVersionWindow, decode: DecodeFn) -> Self {
        Self {
            name,
            window,
            decode,
        }
    }

    pub fn applies_to(&self, spec_version: u32) -> bool {
        self.window.contains(spec_version)
    }

    /// Decode a payload with this layout and normalize the result.
    pub fn decode(&self, args: &EventArgs) -> DomainResult<TransferArgs> {
        (self.decode)(args).map(TransferArgs::from)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Ordered registry of layout rules for one event kind.
#[derive(Debug, Clone, Default)]
pub struct EventDecoder {
    rules: Vec<LayoutRule>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule.
    ///
    /// Rules must be registered from the earliest layout to the latest and
    /// their windows must not overlap, so at most one rule matches any
    /// spec version.
    pub fn register(&mut self, rule: LayoutRule) -> DomainResult<()> {
        if rule.window.first > rule.window.last {
            return Err(DomainError::ValidationError(format!(
                "layout {} has an empty window {}..={}",
                rule.name, rule.window.first, rule.window.last
            )));
        }

        if let Some(previous) = self.rules.last()
            && rule.window.first <= previous.window.last
        {
            return Err(DomainError::ValidationError(format!(
                "layout {} (from {}) overlaps or precedes layout {} (until {})",
                rule.name, rule.window.first, previous.name, previous.window.last
            )));
        }

        self.rules.push(rule);
        Ok(())
    }

    /// Builder-style variant of [`EventDecoder::register`].
    pub fn with_rule(mut self, rule: LayoutRule) -> DomainResult<Self> {
        self.register(rule)?;
        Ok(self)
    }

    /// Registered rules, earliest first.
    pub fn rules(&self) -> &[LayoutRule] {
        &self.rules
    }

    /// First rule whose window contains `spec_version`.
    pub fn rule_for(&self, spec_version: u32) -> Option<&LayoutRule> {
        self.rules.iter().find(|rule| rule.applies_to(spec_version))
    }

    /// Decode an event with the rule matching its declared spec version.
    pub fn decode(&self, event: &RawEvent) -> DomainResult<TransferArgs> {
        let rule = self.rule_for(event.spec_version).ok_or_else(|| {
            DomainError::UnknownEventVersion {
                event_id: event.id.clone(),
                spec_version: event.spec_version,
            }
        })?;

        trace!(event = %event.id, layout = rule.name, "Decoding event");

        rule.decode(&event.args).map_err(|e| match e {
            DomainError::DecodingError(msg) => DomainError::DecodingError(format!(
                "event {} with layout {}: {}",
                event.id, rule.name, msg
            )),
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positional(_: &EventArgs) -> DomainResult<DecodedLayout> {
        Ok(DecodedLayout::Positional(
            RawKey::from([1; 32]),
            RawKey::from([2; 32]),
            Amount::from(1u64),
        ))
    }

    fn named(_: &EventArgs) -> DomainResult<DecodedLayout> {
        Ok(DecodedLayout::Named(NamedTransfer {
            from: RawKey::from([3; 32]),
            to: RawKey::from([4; 32]),
            amount: Amount::from(2u64),
        }))
    }

    fn event(spec_version: u32) -> RawEvent {
        RawEvent {
            id: "E1".into(),
            name: "Balances.Transfer".into(),
            spec_version,
            extrinsic: None,
            call: None,
            args: EventArgs::Scale(Vec::new()),
        }
    }

    fn decoder() -> EventDecoder {
        EventDecoder::new()
            .with_rule(LayoutRule::new("old", SpecVersionWindow::new(10, 19), positional))
            .and_then(|d| d.with_rule(LayoutRule::new("new", SpecVersionWindow::new(20, 29), named)))
            .unwrap()
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let window = SpecVersionWindow::new(10, 19);
        assert!(window.contains(10) && window.contains(19));
        assert!(!window.contains(9) && !window.contains(20));
    }

    // Test critique: chaque version est décodée par sa règle et aucune autre
    #[test]
    fn test_dispatch_by_window() {
        let decoder = decoder();
        assert_eq!(decoder.rule_for(10).unwrap().name, "old");
        assert_eq!(decoder.rule_for(19).unwrap().name, "old");
        assert_eq!(decoder.rule_for(20).unwrap().name, "new");

        let old = decoder.decode(&event(15)).unwrap();
        assert_eq!(old.amount, Amount::from(1u64));
        let new = decoder.decode(&event(25)).unwrap();
        assert_eq!(new.from, RawKey::from([3; 32]));
    }

    #[test]
    fn test_out_of_window_is_unknown_version() {
        let decoder = decoder();
        for version in [0, 9, 30, u32::MAX] {
            let err = decoder.decode(&event(version)).unwrap_err();
            assert!(matches!(
                err,
                DomainError::UnknownEventVersion { spec_version, .. } if spec_version == version
            ));
        }
    }

    #[test]
    fn test_register_rejects_overlap_and_disorder() {
        let mut decoder = decoder();
        let overlapping = LayoutRule::new("overlap", SpecVersionWindow::new(29, 40), named);
        assert!(decoder.register(overlapping).is_err());

        let earlier = LayoutRule::new("earlier", SpecVersionWindow::new(0, 5), positional);
        assert!(decoder.register(earlier).is_err());

        let empty = LayoutRule::new("empty", SpecVersionWindow::new(50, 40), named);
        assert!(decoder.register(empty).is_err());

        assert_eq!(decoder.rules().len(), 2);
    }

    #[test]
    fn test_empty_decoder_knows_no_version() {
        let err = EventDecoder::new().decode(&event(1)).unwrap_err();
        assert!(matches!(err, DomainError::UnknownEventVersion { .. }));
    }
}
