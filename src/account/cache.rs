//! Write-through atom cache.
//!
//! The cache mirrors the atom-update stream into a pluggable store so an
//! account can replay its history at startup before the live subscription
//! starts. The projection is the source of truth; no transactional semantics
//! are required of a provider.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::account::system::AccountSystem;
use crate::atom::{Address, Atom, AtomUpdate, UpdateAction};
use crate::error::ClientError;

/// A pluggable atom store.
#[async_trait]
pub trait AtomCache: Send + Sync {
    async fn store_atom(&self, address: &Address, atom: &Atom) -> Result<(), ClientError>;

    async fn delete_atom(&self, address: &Address, hid: &str) -> Result<(), ClientError>;

    /// All atoms previously stored for this address.
    async fn get_atoms(&self, address: &Address) -> Result<Vec<Atom>, ClientError>;
}

/// Sled-backed atom cache, keyed `address:hid`.
pub struct SledAtomCache {
    tree: sled::Tree,
}

impl SledAtomCache {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ClientError> {
        let db = sled::open(path)?;
        let tree = db.open_tree("atoms")?;
        Ok(Self { tree })
    }

    fn key(address: &Address, hid: &str) -> String {
        format!("{}:{}", address, hid)
    }
}

#[async_trait]
impl AtomCache for SledAtomCache {
    async fn store_atom(&self, address: &Address, atom: &Atom) -> Result<(), ClientError> {
        let key = Self::key(address, &atom.hid());
        let bytes = serde_json::to_vec(atom)?;
        self.tree.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    async fn delete_atom(&self, address: &Address, hid: &str) -> Result<(), ClientError> {
        self.tree.remove(Self::key(address, hid).as_bytes())?;
        Ok(())
    }

    async fn get_atoms(&self, address: &Address) -> Result<Vec<Atom>, ClientError> {
        let prefix = format!("{}:", address);
        let mut atoms = Vec::new();
        for item in self.tree.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item?;
            match serde_json::from_slice::<Atom>(&value) {
                Ok(atom) => atoms.push(atom),
                Err(e) => {
                    warn!(
                        key = %String::from_utf8_lossy(&key),
                        error = %e,
                        "Skipping unreadable cached atom"
                    );
                }
            }
        }
        // Replay in arrival order, not key order.
        atoms.sort_by_key(|a| a.timestamp);
        Ok(atoms)
    }
}

/// In-memory atom cache, mainly for tests.
pub struct MemoryAtomCache {
    atoms: RwLock<HashMap<String, Vec<(String, Atom)>>>,
}

impl MemoryAtomCache {
    pub fn new() -> Self {
        Self {
            atoms: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryAtomCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AtomCache for MemoryAtomCache {
    async fn store_atom(&self, address: &Address, atom: &Atom) -> Result<(), ClientError> {
        let mut atoms = self.atoms.write().await;
        let entries = atoms.entry(address.to_string()).or_default();
        let hid = atom.hid();
        if !entries.iter().any(|(h, _)| *h == hid) {
            entries.push((hid, atom.clone()));
        }
        Ok(())
    }

    async fn delete_atom(&self, address: &Address, hid: &str) -> Result<(), ClientError> {
        let mut atoms = self.atoms.write().await;
        if let Some(entries) = atoms.get_mut(address.as_str()) {
            entries.retain(|(h, _)| h != hid);
        }
        Ok(())
    }

    async fn get_atoms(&self, address: &Address) -> Result<Vec<Atom>, ClientError> {
        let atoms = self.atoms.read().await;
        Ok(atoms
            .get(address.as_str())
            .map(|entries| entries.iter().map(|(_, a)| a.clone()).collect())
            .unwrap_or_default())
    }
}

/// Account system mirroring atom updates into the configured cache.
///
/// With no provider configured every operation is a no-op.
pub struct CacheAccountSystem {
    address: Address,
    provider: Option<Arc<dyn AtomCache>>,
}

impl CacheAccountSystem {
    pub fn new(address: Address, provider: Option<Arc<dyn AtomCache>>) -> Self {
        Self { address, provider }
    }

    /// Load the previously stored atoms for this account.
    pub async fn load(&self) -> Result<Vec<Atom>, ClientError> {
        match &self.provider {
            Some(cache) => cache.get_atoms(&self.address).await,
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl AccountSystem for CacheAccountSystem {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn process_atom_update(&self, update: &AtomUpdate) -> Result<(), ClientError> {
        let Some(cache) = &self.provider else {
            return Ok(());
        };
        match update.action {
            UpdateAction::Store => {
                cache.store_atom(&self.address, &update.atom).await?;
                debug!(hid = %update.atom.hid(), "Atom cached");
            }
            UpdateAction::Delete => {
                cache.delete_atom(&self.address, &update.atom.hid()).await?;
                debug!(hid = %update.atom.hid(), "Cached atom removed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{Particle, SpunParticle, TokenClassRef, TokenParticle, TokenParticleKind};
    use num_bigint::BigUint;
    use tempfile::TempDir;

    fn atom(timestamp: i64, nonce: u64) -> Atom {
        Atom::new(
            timestamp,
            vec![SpunParticle::up(Particle::Token(TokenParticle {
                address: Address::new("owner-1"),
                amount: BigUint::from(10u8),
                token_class: TokenClassRef::new(Address::new("issuer-1"), "XYZ"),
                granularity: BigUint::from(1u8),
                kind: TokenParticleKind::Transfer,
                nonce,
                planck: 0,
            }))],
        )
    }

    #[tokio::test]
    async fn test_sled_cache_round_trip() {
        let temp = TempDir::new().unwrap();
        let cache = SledAtomCache::open(temp.path().join("atoms.sled")).unwrap();
        let address = Address::new("owner-1");

        let first = atom(100, 1);
        let second = atom(200, 2);
        cache.store_atom(&address, &second).await.unwrap();
        cache.store_atom(&address, &first).await.unwrap();

        let atoms = cache.get_atoms(&address).await.unwrap();
        assert_eq!(atoms.len(), 2);
        assert_eq!(atoms[0], first);

        cache.delete_atom(&address, &first.hid()).await.unwrap();
        let atoms = cache.get_atoms(&address).await.unwrap();
        assert_eq!(atoms, vec![second]);
    }

    #[tokio::test]
    async fn test_cache_is_isolated_per_address() {
        let cache = MemoryAtomCache::new();
        cache.store_atom(&Address::new("a"), &atom(1, 1)).await.unwrap();
        assert!(cache.get_atoms(&Address::new("b")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_through_and_delete() {
        let provider = Arc::new(MemoryAtomCache::new());
        let address = Address::new("owner-1");
        let system = CacheAccountSystem::new(address.clone(), Some(provider.clone()));

        let a = atom(100, 1);
        system
            .process_atom_update(&AtomUpdate::store(a.clone()))
            .await
            .unwrap();
        assert_eq!(system.load().await.unwrap(), vec![a.clone()]);

        system
            .process_atom_update(&AtomUpdate::delete(a))
            .await
            .unwrap();
        assert!(system.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_provider_is_noop() {
        let system = CacheAccountSystem::new(Address::new("owner-1"), None);
        system
            .process_atom_update(&AtomUpdate::store(atom(1, 1)))
            .await
            .unwrap();
        assert!(system.load().await.unwrap().is_empty());
    }
}
