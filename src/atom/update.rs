//! Atom update envelope: the event type every account system folds over.

use serde::{Deserialize, Serialize};

use crate::atom::atom::Atom;

/// What an update asserts about its atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateAction {
    /// The atom is newly visible.
    Store,
    /// A previously stored atom is being retracted.
    Delete,
}

/// Outcome of the external decryption attempt on an atom's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecryptionState {
    Decrypted,
    EncryptedNotOwned,
    CannotDecrypt,
}

/// Auxiliary data attached to an atom after external processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedAtomData {
    pub decryption: DecryptionState,
    pub message: String,
}

/// A tagged atom event addressed to an account.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomUpdate {
    pub action: UpdateAction,
    pub atom: Atom,
    pub processed: Option<ProcessedAtomData>,
}

impl AtomUpdate {
    pub fn store(atom: Atom) -> Self {
        Self {
            action: UpdateAction::Store,
            atom,
            processed: None,
        }
    }

    pub fn delete(atom: Atom) -> Self {
        Self {
            action: UpdateAction::Delete,
            atom,
            processed: None,
        }
    }

    pub fn with_processed(mut self, processed: ProcessedAtomData) -> Self {
        self.processed = Some(processed);
        self
    }
}
