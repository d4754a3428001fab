//! Database Module
//!
//! Account Store capabilities, the transaction coordinator and the
//! PostgreSQL and in-memory backings.

pub mod connection;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod transaction;

// Re-export commonly used types
pub use connection::{run_migrations, DatabaseConfig, DatabasePool};
pub use memory::MemoryAccountStore;
pub use postgres::PgAccountStore;
pub use repository::{
    AccountRepository, AccountStore, AccountTransaction, PurgeReport, StoreError, StoreResult,
};
pub use transaction::TransactionCoordinator;
