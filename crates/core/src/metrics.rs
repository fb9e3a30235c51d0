//! Metrics definitions for the indexer.
//!
//! This module defines all metrics used throughout the indexer.
//! Metrics are collected using the `metrics` crate and can be exported
//! to Prometheus via `metrics-exporter-prometheus`.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_counter!(
        "batches_persisted_total",
        "Total number of block batches committed to the store"
    );
    describe_counter!(
        "transfers_indexed_total",
        "Total number of transfers written (including re-processed ones)"
    );
    describe_counter!(
        "accounts_created_total",
        "Total number of accounts first seen by the indexer"
    );
    describe_counter!(
        "decode_errors_total",
        "Total number of batches aborted by a decoding error"
    );
    describe_counter!(
        "batch_retries_total",
        "Total number of batch retries after a transient failure"
    );
    describe_histogram!(
        "batch_processing_duration_seconds",
        "Time taken to extract, resolve and persist a batch in seconds"
    );
}

/// Record a committed batch.
///
/// # Arguments
/// * `transfers` - Transfers carried by the batch
/// * `new_accounts` - Accounts the batch created
pub fn record_batch_persisted(transfers: usize, new_accounts: usize) {
    counter!("batches_persisted_total").increment(1);
    counter!("transfers_indexed_total").increment(transfers as u64);
    counter!("accounts_created_total").increment(new_accounts as u64);
}

/// Record a decode error.
///
/// # Arguments
/// * `kind` - Error kind ("unknown_version", "missing_timestamp", ...)
pub fn record_decode_error(kind: &'static str) {
    counter!("decode_errors_total", "kind" => kind).increment(1);
}

/// Record a batch retry.
pub fn record_batch_retry() {
    counter!("batch_retries_total").increment(1);
}

/// Record batch processing duration.
pub fn record_batch_processing_duration(duration_secs: f64) {
    histogram!("batch_processing_duration_seconds").record(duration_secs);
}

/// A timer that automatically records duration when dropped.
pub struct ProcessingTimer {
    start: Instant,
}

impl ProcessingTimer {
    /// Start a new processing timer.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for ProcessingTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessingTimer {
    fn drop(&mut self) {
        record_batch_processing_duration(self.start.elapsed().as_secs_f64());
    }
}
