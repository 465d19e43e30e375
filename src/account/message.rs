//! Message account system: per-account history of decrypted payloads.
//!
//! Same fold discipline as the transfer projection: insert on STORE keyed by
//! hid, remove on DELETE, duplicates and orphans absorbed silently.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::account::system::AccountSystem;
use crate::atom::{Address, AtomId, AtomUpdate, DecryptionState, UpdateAction};
use crate::error::ClientError;

/// A decrypted (or undecryptable) payload attached to an atom.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountMessage {
    pub hid: AtomId,
    pub timestamp: i64,
    /// Empty when decryption failed; the projection continues regardless.
    pub content: String,
    pub decryption: DecryptionState,
}

/// Event pushed on the message subject.
#[derive(Debug, Clone)]
pub struct MessageUpdate {
    pub action: UpdateAction,
    pub hid: AtomId,
    pub message: AccountMessage,
}

#[derive(Default)]
struct MessageState {
    messages: HashMap<AtomId, AccountMessage>,
    order: Vec<AtomId>,
}

pub struct MessageAccountSystem {
    #[allow(dead_code)]
    address: Address,
    state: RwLock<MessageState>,
    message_tx: broadcast::Sender<MessageUpdate>,
}

impl MessageAccountSystem {
    pub fn new(address: Address) -> Self {
        let (message_tx, _) = broadcast::channel(256);
        Self {
            address,
            state: RwLock::new(MessageState::default()),
            message_tx,
        }
    }

    pub fn message_stream(&self) -> broadcast::Receiver<MessageUpdate> {
        self.message_tx.subscribe()
    }

    /// All known messages replayed as STORE events, plus a live receiver
    /// covering everything after the snapshot.
    pub async fn message_history(
        &self,
    ) -> (Vec<MessageUpdate>, broadcast::Receiver<MessageUpdate>) {
        let state = self.state.read().await;
        let receiver = self.message_tx.subscribe();
        let snapshot = state
            .order
            .iter()
            .filter_map(|hid| state.messages.get(hid))
            .map(|m| MessageUpdate {
                action: UpdateAction::Store,
                hid: m.hid.clone(),
                message: m.clone(),
            })
            .collect();
        (snapshot, receiver)
    }
}

#[async_trait]
impl AccountSystem for MessageAccountSystem {
    fn name(&self) -> &'static str {
        "message"
    }

    async fn process_atom_update(&self, update: &AtomUpdate) -> Result<(), ClientError> {
        let Some(processed) = &update.processed else {
            return Ok(());
        };
        let hid = update.atom.hid();
        let mut state = self.state.write().await;
        match update.action {
            UpdateAction::Store => {
                if state.messages.contains_key(&hid) {
                    return Ok(());
                }
                let content = if processed.decryption == DecryptionState::CannotDecrypt {
                    String::new()
                } else {
                    processed.message.clone()
                };
                let message = AccountMessage {
                    hid: hid.clone(),
                    timestamp: update.atom.timestamp,
                    content,
                    decryption: processed.decryption,
                };
                state.order.push(hid.clone());
                state.messages.insert(hid.clone(), message.clone());
                debug!(hid = %hid, "Message stored");
                let _ = self.message_tx.send(MessageUpdate {
                    action: UpdateAction::Store,
                    hid,
                    message,
                });
            }
            UpdateAction::Delete => {
                let Some(message) = state.messages.remove(&hid) else {
                    return Ok(());
                };
                state.order.retain(|h| *h != hid);
                debug!(hid = %hid, "Message retracted");
                let _ = self.message_tx.send(MessageUpdate {
                    action: UpdateAction::Delete,
                    hid,
                    message,
                });
            }
        }
        Ok(())
    }
}
