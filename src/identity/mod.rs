//! Local identities.
//!
//! The identity manager is a registry only; identities are not part of the
//! atom fold. Key generation, signing, and decryption live outside the core
//! (see [`remote`] for the optional remote signing service client).

pub mod remote;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::atom::Address;

pub use remote::RemoteIdentity;

/// A locally known identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalIdentity {
    pub address: Address,
    pub public_key: Vec<u8>,
}

/// Registry of local identities.
pub struct IdentityManager {
    identities: RwLock<HashMap<Address, LocalIdentity>>,
}

impl IdentityManager {
    pub fn new() -> Self {
        Self {
            identities: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add(&self, identity: LocalIdentity) {
        self.identities
            .write()
            .await
            .insert(identity.address.clone(), identity);
    }

    pub async fn get(&self, address: &Address) -> Option<LocalIdentity> {
        self.identities.read().await.get(address).cloned()
    }

    pub async fn remove(&self, address: &Address) -> Option<LocalIdentity> {
        self.identities.write().await.remove(address)
    }

    pub async fn list(&self) -> Vec<LocalIdentity> {
        self.identities.read().await.values().cloned().collect()
    }
}

impl Default for IdentityManager {
    fn default() -> Self {
        Self::new()
    }
}
