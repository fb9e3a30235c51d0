//! Core services.

mod indexer;

pub use indexer::*;
