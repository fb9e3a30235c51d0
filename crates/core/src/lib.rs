//! Core domain layer for the Tally transfer indexer.
//!
//! This crate turns raw blocks of a Substrate chain into a ledger of
//! accounts and balance transfers. It follows hexagonal architecture
//! principles - this is the innermost layer with no dependencies on
//! infrastructure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       tally (binary)                        │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │        tally-source          │        tally-storage         │
//! │   (RPC, NDJSON replay)       │        (PostgreSQL)          │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │                     tally-core  ← YOU ARE HERE              │
//! │     (models, decoding, extraction, ports, services)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`models`] - Domain models (Account, Transfer, Amount, etc.)
//! - [`address`] - SS58 address encoding
//! - [`decoding`] - Spec-version aware event decoding
//! - [`extract`] - Raw blocks to normalized transfer records
//! - [`accumulate`] - Account resolution for a batch
//! - [`ports`] - Interface traits for adapters to implement
//! - [`services`] - Core business logic (IndexerService)
//! - [`error`] - Domain error types
//! - [`metrics`] - Prometheus metrics definitions
//!
//! # Indexer Lifecycle
//!
//! 1. Pull a batch of blocks from the [`ports::BlockSource`]
//! 2. Decode every `Balances.Transfer` event with the layout matching its
//!    spec version
//! 3. Encode both endpoints as SS58 addresses
//! 4. Resolve the batch's accounts with a single bulk lookup
//! 5. Persist accounts, transfers and cursor atomically through the
//!    [`ports::LedgerStore`]

pub mod accumulate;
pub mod address;
pub mod decoding;
pub mod error;
pub mod extract;
pub mod metrics;
pub mod models;
pub mod ports;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;
