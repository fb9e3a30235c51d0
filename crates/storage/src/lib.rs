//! Storage layer for the Tally transfer indexer.
//!
//! This crate provides PostgreSQL implementations of the repository traits
//! defined in `tally-core`. It handles all database interactions including
//! connection pooling, migrations, and the atomic batch write.
//!
//! # Architecture
//!
//! The storage layer follows the repository pattern:
//!
//! - [`postgres::Database`] - Connection pool management
//! - [`postgres::PgLedgerStore`] - Composite store for accounts, transfers and cursor
//!
//! # Usage
//!
//! ```ignore
//! use tally_storage::{Database, DatabaseConfig, PgLedgerStore};
//!
//! // Connect to the database
//! let config = DatabaseConfig::for_indexer(&database_url);
//! let db = Database::connect(&config).await?;
//!
//! // Run migrations
//! db.migrate().await?;
//!
//! let store = Arc::new(PgLedgerStore::new(Arc::new(db)));
//! ```

pub mod postgres;

pub use postgres::{Database, DatabaseConfig, PgLedgerStore, PurgeStats};
