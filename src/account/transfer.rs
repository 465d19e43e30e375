//! Transfer account system: the UTXO projection.
//!
//! Folds the account's atom-update stream into three views that are kept
//! mutually consistent: the unspent/spent consumable sets, the per-token
//! balance, and the ordered transaction history.
//!
//! ```text
//! AtomUpdate ──▶ particle fold ──▶ Transaction ──▶ balance subject (watch)
//!                    │                  │
//!                    ▼                  └────────▶ transaction subject (broadcast)
//!          unspent / spent sets
//! ```
//!
//! The fold is reversible: a DELETE of a previously applied STORE restores
//! the sets and the balance to their exact pre-STORE values. Duplicate
//! STOREs and orphan DELETEs are absorbed silently.

use async_trait::async_trait;
use num_bigint::{BigInt, BigUint};
use num_traits::Zero;
use std::collections::HashMap;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::debug;

use crate::account::system::AccountSystem;
use crate::atom::{
    Address, AtomId, AtomUpdate, DecryptionState, Particle, ParticleId, Spin, TokenClassRef,
    TokenParticle, TokenRegistry, UpdateAction,
};
use crate::atom::token::subunits_to_units;
use crate::error::ClientError;

/// Net effect of one atom on one account.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub hid: AtomId,
    pub timestamp: i64,
    pub message: String,
    /// Signed per-token delta this atom applied to the account.
    pub balance: HashMap<TokenClassRef, BigInt>,
    /// Non-owned, non-fee addresses touched by this atom, keyed by their
    /// canonical string form.
    pub participants: HashMap<String, Address>,
    pub fee: BigUint,
}

/// Event pushed on the transaction subject.
#[derive(Debug, Clone)]
pub struct TransactionUpdate {
    pub action: UpdateAction,
    pub hid: AtomId,
    pub transaction: Transaction,
}

#[derive(Default)]
struct TransferState {
    transactions: HashMap<AtomId, Transaction>,
    /// Arrival order of stored transactions; drives history replay.
    order: Vec<AtomId>,
    balance: HashMap<TokenClassRef, BigInt>,
    unspent: HashMap<ParticleId, TokenParticle>,
    spent: HashMap<ParticleId, TokenParticle>,
}

/// The UTXO projection for a single account.
pub struct TransferAccountSystem {
    address: Address,
    state: RwLock<TransferState>,
    balance_tx: watch::Sender<HashMap<TokenClassRef, BigInt>>,
    transaction_tx: broadcast::Sender<TransactionUpdate>,
}

impl TransferAccountSystem {
    pub fn new(address: Address) -> Self {
        let (balance_tx, _) = watch::channel(HashMap::new());
        let (transaction_tx, _) = broadcast::channel(256);
        Self {
            address,
            state: RwLock::new(TransferState::default()),
            balance_tx,
            transaction_tx,
        }
    }

    /// Last-value-cached balance stream: new subscribers immediately see the
    /// current balance.
    pub fn balance_stream(&self) -> watch::Receiver<HashMap<TokenClassRef, BigInt>> {
        self.balance_tx.subscribe()
    }

    /// Push-only stream of transaction events from this point on.
    pub fn transaction_stream(&self) -> broadcast::Receiver<TransactionUpdate> {
        self.transaction_tx.subscribe()
    }

    /// Point-in-time copy of the per-token balance, in subunits.
    pub async fn balance(&self) -> HashMap<TokenClassRef, BigInt> {
        self.state.read().await.balance.clone()
    }

    /// Point-in-time copy of the unspent consumable set. Ordering is not
    /// guaranteed; callers that need determinism must sort.
    pub async fn unspent_consumables(&self) -> Vec<TokenParticle> {
        self.state.read().await.unspent.values().cloned().collect()
    }

    /// Point-in-time copy of the spent consumable set.
    pub async fn spent_consumables(&self) -> Vec<TokenParticle> {
        self.state.read().await.spent.values().cloned().collect()
    }

    /// Balance in whole token units, truncated toward zero. Token classes
    /// the registry cannot resolve are omitted.
    pub async fn token_units_balance(
        &self,
        registry: &TokenRegistry,
    ) -> HashMap<TokenClassRef, BigInt> {
        let balance = self.balance().await;
        let mut units = HashMap::new();
        for (class, subunits) in balance {
            if registry.resolve(&class).await.is_some() {
                units.insert(class, subunits_to_units(&subunits));
            }
        }
        units
    }

    /// All currently-known transactions replayed as STORE events, plus a
    /// live receiver covering everything after the snapshot. Emissions
    /// happen under the state write guard, so the snapshot and the receiver
    /// cover disjoint prefixes of the stream and late subscribers miss
    /// nothing.
    pub async fn transaction_history(
        &self,
    ) -> (Vec<TransactionUpdate>, broadcast::Receiver<TransactionUpdate>) {
        let state = self.state.read().await;
        let receiver = self.transaction_tx.subscribe();
        let snapshot = state
            .order
            .iter()
            .filter_map(|hid| state.transactions.get(hid))
            .map(|t| TransactionUpdate {
                action: UpdateAction::Store,
                hid: t.hid.clone(),
                transaction: t.clone(),
            })
            .collect();
        (snapshot, receiver)
    }

    async fn apply_store(&self, update: &AtomUpdate) -> Result<(), ClientError> {
        let atom = &update.atom;
        let hid = atom.hid();
        let mut state = self.state.write().await;
        if state.transactions.contains_key(&hid) {
            debug!(hid = %hid, "Duplicate STORE suppressed");
            return Ok(());
        }

        let mut transaction = Transaction {
            hid: hid.clone(),
            timestamp: atom.timestamp,
            message: String::new(),
            balance: HashMap::new(),
            participants: HashMap::new(),
            fee: BigUint::zero(),
        };
        if let Some(processed) = &update.processed {
            if processed.decryption != DecryptionState::CannotDecrypt {
                transaction.message = processed.message.clone();
            }
        }

        for spun in &atom.particles {
            match &spun.particle {
                Particle::Fee(fee) => {
                    // POW fee: no token movement is recorded.
                    transaction.fee += &fee.amount;
                }
                Particle::Token(p) if p.address == self.address => {
                    let id = spun.particle.id();
                    let delta = match spun.spin {
                        Spin::Down => {
                            state.unspent.remove(&id);
                            state.spent.insert(id, p.clone());
                            -BigInt::from(p.amount.clone())
                        }
                        Spin::Up => {
                            // Guard against out-of-order spin pairs: a
                            // particle already seen spent never re-enters
                            // the unspent set.
                            if !state.spent.contains_key(&id) {
                                state.unspent.insert(id, p.clone());
                            }
                            BigInt::from(p.amount.clone())
                        }
                    };
                    *transaction
                        .balance
                        .entry(p.token_class.clone())
                        .or_insert_with(BigInt::zero) += delta;
                }
                Particle::Token(p) => {
                    transaction
                        .participants
                        .insert(p.address.to_string(), p.address.clone());
                }
                Particle::Message(_) => {}
            }
        }

        for (class, delta) in &transaction.balance {
            *state
                .balance
                .entry(class.clone())
                .or_insert_with(BigInt::zero) += delta;
        }
        state.balance.retain(|_, v| !v.is_zero());

        state.order.push(hid.clone());
        state.transactions.insert(hid.clone(), transaction.clone());

        debug!(hid = %hid, tokens = transaction.balance.len(), "Transaction stored");

        // Balance is published before the transaction event.
        self.balance_tx.send_replace(state.balance.clone());
        let _ = self.transaction_tx.send(TransactionUpdate {
            action: UpdateAction::Store,
            hid,
            transaction,
        });
        Ok(())
    }

    async fn apply_delete(&self, update: &AtomUpdate) -> Result<(), ClientError> {
        let atom = &update.atom;
        let hid = atom.hid();
        let mut state = self.state.write().await;
        let Some(transaction) = state.transactions.remove(&hid) else {
            debug!(hid = %hid, "Orphan DELETE ignored");
            return Ok(());
        };
        state.order.retain(|h| *h != hid);

        // Invert every set transition the STORE fold applied.
        for spun in &atom.particles {
            if let Particle::Token(p) = &spun.particle {
                if p.address != self.address {
                    continue;
                }
                let id = spun.particle.id();
                match spun.spin {
                    Spin::Down => {
                        state.spent.remove(&id);
                        state.unspent.insert(id, p.clone());
                    }
                    Spin::Up => {
                        state.unspent.remove(&id);
                    }
                }
            }
        }

        for (class, delta) in &transaction.balance {
            *state
                .balance
                .entry(class.clone())
                .or_insert_with(BigInt::zero) -= delta;
        }
        state.balance.retain(|_, v| !v.is_zero());

        debug!(hid = %hid, "Transaction retracted");

        self.balance_tx.send_replace(state.balance.clone());
        let _ = self.transaction_tx.send(TransactionUpdate {
            action: UpdateAction::Delete,
            hid,
            transaction,
        });
        Ok(())
    }
}

#[async_trait]
impl AccountSystem for TransferAccountSystem {
    fn name(&self) -> &'static str {
        "transfer"
    }

    async fn process_atom_update(&self, update: &AtomUpdate) -> Result<(), ClientError> {
        if !update.atom.is_token_bearing() {
            return Ok(());
        }
        match update.action {
            UpdateAction::Store => self.apply_store(update).await,
            UpdateAction::Delete => self.apply_delete(update).await,
        }
    }
}
