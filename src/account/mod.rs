//! Accounts and their dispatch pipeline.
//!
//! An account owns a named, ordered list of account systems and feeds every
//! atom update through them sequentially:
//!
//! ```text
//! NodeConnection ──(AtomUpdate stream)──▶ Account ──▶ [cache, transfer, message, …]
//!                                            │
//!                              cache replay precedes the live stream
//! ```
//!
//! Dispatch is serialized: one update fully traverses the pipeline before
//! the next is admitted. Account state is created once per address and
//! mutated only by its own pipeline.

pub mod cache;
pub mod message;
pub mod system;
pub mod transfer;

use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::atom::{Address, AtomUpdate};
use crate::error::ClientError;
use crate::node::connection::NodeConnection;

pub use cache::{AtomCache, CacheAccountSystem, MemoryAtomCache, SledAtomCache};
pub use message::{AccountMessage, MessageAccountSystem, MessageUpdate};
pub use system::AccountSystem;
pub use transfer::{Transaction, TransactionUpdate, TransferAccountSystem};

/// A single ledger account and its projection pipeline.
pub struct Account {
    address: Address,
    /// Registration order is invocation order.
    systems: RwLock<Vec<Arc<dyn AccountSystem>>>,
    dispatch: Mutex<()>,
    cache: Arc<CacheAccountSystem>,
    transfer: Arc<TransferAccountSystem>,
    message: Arc<MessageAccountSystem>,
}

impl Account {
    /// An account with no cache provider configured.
    pub fn new(address: Address) -> Self {
        Self::with_cache(address, None)
    }

    pub fn with_cache(address: Address, provider: Option<Arc<dyn AtomCache>>) -> Self {
        let cache = Arc::new(CacheAccountSystem::new(address.clone(), provider));
        let transfer = Arc::new(TransferAccountSystem::new(address.clone()));
        let message = Arc::new(MessageAccountSystem::new(address.clone()));
        let systems: Vec<Arc<dyn AccountSystem>> =
            vec![cache.clone(), transfer.clone(), message.clone()];
        Self {
            address,
            systems: RwLock::new(systems),
            dispatch: Mutex::new(()),
            cache,
            transfer,
            message,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn cache(&self) -> &Arc<CacheAccountSystem> {
        &self.cache
    }

    pub fn transfer(&self) -> &Arc<TransferAccountSystem> {
        &self.transfer
    }

    pub fn messages(&self) -> &Arc<MessageAccountSystem> {
        &self.message
    }

    /// Append a system to the pipeline. Names must be unique per account.
    pub async fn register_system(&self, system: Arc<dyn AccountSystem>) -> Result<(), ClientError> {
        let mut systems = self.systems.write().await;
        if systems.iter().any(|s| s.name() == system.name()) {
            return Err(ClientError::Account(format!(
                "account system '{}' already registered",
                system.name()
            )));
        }
        systems.push(system);
        Ok(())
    }

    /// Push one update through every system in registration order.
    pub async fn process_atom_update(&self, update: &AtomUpdate) -> Result<(), ClientError> {
        let _guard = self.dispatch.lock().await;
        let systems = self.systems.read().await.clone();
        for system in systems {
            system.process_atom_update(update).await?;
            debug!(
                account = %self.address,
                system = system.name(),
                hid = %update.atom.hid(),
                "Atom update dispatched"
            );
        }
        Ok(())
    }

    /// Replay the cache, then attach this account to the node's live stream.
    ///
    /// Cached atoms are re-injected as STORE events through the full
    /// pipeline before the subscription is even opened, so replay strictly
    /// precedes the first live event. The returned handle drives the
    /// forwarding task; it ends when the stream errors or completes.
    pub async fn subscribe(
        self: &Arc<Self>,
        connection: &NodeConnection,
        first: bool,
    ) -> Result<tokio::task::JoinHandle<()>, ClientError> {
        for atom in self.cache.load().await? {
            self.process_atom_update(&AtomUpdate::store(atom)).await?;
        }

        let mut stream = connection.subscribe(&self.address, first).await?;
        let account = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(item) = stream.recv().await {
                match item {
                    Ok(update) => {
                        if let Err(e) = account.process_atom_update(&update).await {
                            error!(account = %account.address, error = %e, "Dispatch failed");
                        }
                    }
                    Err(e) => {
                        warn!(account = %account.address, error = %e, "Subscription ended");
                        break;
                    }
                }
            }
        });
        Ok(handle)
    }
}
