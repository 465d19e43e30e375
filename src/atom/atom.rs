//! Atoms: the unit of ledger commitment.
//!
//! An atom is a content-addressed bundle of spun particles. Its hash (`hid`)
//! is the primary key everywhere in the client: subscription streams carry it,
//! projections key their transactions by it, and caches store under it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::atom::particle::SpunParticle;
use crate::atom::update::{ProcessedAtomData, UpdateAction};

/// Content hash of an atom.
pub type AtomId = String;

/// A durable bundle of spun particles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Atom {
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    pub particles: Vec<SpunParticle>,
}

impl Atom {
    pub fn new(timestamp: i64, particles: Vec<SpunParticle>) -> Self {
        Self {
            timestamp,
            particles,
        }
    }

    /// An atom stamped with the current wall-clock time.
    pub fn now(particles: Vec<SpunParticle>) -> Self {
        Self::new(chrono::Utc::now().timestamp_millis(), particles)
    }

    /// Recompute the content hash.
    pub fn hid(&self) -> AtomId {
        let mut hasher = Sha256::new();
        hasher.update(self.timestamp.to_be_bytes());
        for spun in &self.particles {
            hasher.update([spun.spin as u8]);
            hasher.update(spun.particle.id().as_str());
        }
        hex::encode(hasher.finalize())
    }

    /// Whether any particle in this atom carries token value.
    pub fn is_token_bearing(&self) -> bool {
        self.particles.iter().any(|sp| sp.particle.is_token_bearing())
    }
}

/// Wire form of an atom: the content plus the transported hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtomPayload {
    pub hid: AtomId,
    /// Action asserted by the node. Absent means STORE; DELETE is accepted
    /// if a node ever sends it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<UpdateAction>,
    pub timestamp: i64,
    pub particles: Vec<SpunParticle>,
    /// Processed auxiliary data riding along with the atom, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_data: Option<ProcessedAtomData>,
}

impl AtomPayload {
    pub fn from_atom(atom: &Atom) -> Self {
        Self {
            hid: atom.hid(),
            action: None,
            timestamp: atom.timestamp,
            particles: atom.particles.clone(),
            processed_data: None,
        }
    }

    /// Rebuild the atom and check the transported hash against the
    /// recomputed one. A mismatch does not invalidate the atom; the caller
    /// decides what to do with the flag.
    pub fn into_atom_checked(self) -> (Atom, bool) {
        let atom = Atom {
            timestamp: self.timestamp,
            particles: self.particles,
        };
        let hash_ok = atom.hid() == self.hid;
        (atom, hash_ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::address::Address;
    use crate::atom::particle::{Particle, TokenParticle, TokenParticleKind};
    use crate::atom::token::TokenClassRef;
    use num_bigint::BigUint;

    fn sample_atom() -> Atom {
        Atom::new(
            1_700_000_000_000,
            vec![SpunParticle::up(Particle::Token(TokenParticle {
                address: Address::new("owner-1"),
                amount: BigUint::from(100u8),
                token_class: TokenClassRef::new(Address::new("issuer-1"), "XYZ"),
                granularity: BigUint::from(1u8),
                kind: TokenParticleKind::Transfer,
                nonce: 1,
                planck: 0,
            }))],
        )
    }

    #[test]
    fn test_hid_round_trip() {
        let atom = sample_atom();
        let json = serde_json::to_string(&atom).unwrap();
        let back: Atom = serde_json::from_str(&json).unwrap();
        assert_eq!(back.hid(), atom.hid());
    }

    #[test]
    fn test_payload_hash_check() {
        let atom = sample_atom();
        let payload = AtomPayload::from_atom(&atom);
        let (rebuilt, hash_ok) = payload.into_atom_checked();
        assert!(hash_ok);
        assert_eq!(rebuilt, atom);

        let mut tampered = AtomPayload::from_atom(&atom);
        tampered.hid = "0000".to_string();
        let (rebuilt, hash_ok) = tampered.into_atom_checked();
        assert!(!hash_ok);
        assert_eq!(rebuilt, atom);
    }

    #[test]
    fn test_empty_atom_is_not_token_bearing() {
        assert!(!Atom::new(0, Vec::new()).is_token_bearing());
        assert!(sample_atom().is_token_bearing());
    }
}
