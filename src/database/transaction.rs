//! Transaction Coordinator
//!
//! Runs a unit of work against repository handles bound to a single
//! transaction. The handle never escapes the unit of work.

use futures_util::future::BoxFuture;
use std::sync::Arc;

use super::repository::{AccountRepository, AccountStore, StoreResult};

/// Owner of transaction lifetime for an [`AccountStore`]
#[derive(Clone)]
pub struct TransactionCoordinator {
    store: Arc<dyn AccountStore>,
}

impl TransactionCoordinator {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    /// The underlying store, for calls that commit individually
    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    /// Run `work` inside one transaction
    ///
    /// Returning `Ok` commits every write made through the handle; returning
    /// `Err` (or being cancelled) drops the transaction, which rolls it back.
    /// Units of work cannot open nested transactions: they only ever see an
    /// [`AccountRepository`].
    pub async fn run<T, F>(&self, work: F) -> StoreResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t dyn AccountRepository) -> BoxFuture<'t, StoreResult<T>> + Send,
    {
        let tx = self.store.begin().await?;

        let value = match work(tx.repository()).await {
            Ok(value) => value,
            Err(err) => {
                log::debug!("unit of work failed, rolling back: {}", err);
                return Err(err);
            }
        };

        tx.commit().await?;
        Ok(value)
    }
}
