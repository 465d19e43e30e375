//! Particle model: the typed values carried inside an atom.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::atom::address::Address;
use crate::atom::token::{amount_serde, TokenClassRef};

/// The sign of a particle's effect: `Up` creates it, `Down` consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Spin {
    Up,
    Down,
}

/// What a token-bearing particle does to supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenParticleKind {
    Mint,
    Transfer,
    Burn,
}

/// Identity of a particle, derived from its content hash.
///
/// Unique within an atom; the unspent/spent sets are keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticleId(String);

impl ParticleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParticleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A token-bearing particle owned by an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenParticle {
    pub address: Address,
    #[serde(with = "amount_serde")]
    pub amount: BigUint,
    pub token_class: TokenClassRef,
    #[serde(with = "amount_serde")]
    pub granularity: BigUint,
    pub kind: TokenParticleKind,
    pub nonce: u64,
    pub planck: u64,
}

/// A proof-of-work fee particle.
///
/// Token-bearing, but excluded from balance accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeParticle {
    pub address: Address,
    #[serde(with = "amount_serde")]
    pub amount: BigUint,
    pub token_class: TokenClassRef,
    pub nonce: u64,
    pub planck: u64,
}

/// An encrypted application payload addressed between two parties.
///
/// Decryption is external; the core only routes the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageParticle {
    pub from: Address,
    pub to: Address,
    pub payload: Vec<u8>,
}

/// A typed value within an atom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Particle {
    Token(TokenParticle),
    Fee(FeeParticle),
    Message(MessageParticle),
}

impl Particle {
    /// Content-derived identity, stable across serialization round-trips.
    pub fn id(&self) -> ParticleId {
        let mut hasher = Sha256::new();
        match self {
            Particle::Token(p) => {
                hasher.update(b"token");
                hasher.update(p.address.as_str());
                hasher.update(p.amount.to_bytes_be());
                hasher.update(p.token_class.issuer.as_str());
                hasher.update(p.token_class.symbol.as_bytes());
                hasher.update(p.granularity.to_bytes_be());
                hasher.update([p.kind as u8]);
                hasher.update(p.nonce.to_be_bytes());
                hasher.update(p.planck.to_be_bytes());
            }
            Particle::Fee(p) => {
                hasher.update(b"fee");
                hasher.update(p.address.as_str());
                hasher.update(p.amount.to_bytes_be());
                hasher.update(p.token_class.issuer.as_str());
                hasher.update(p.token_class.symbol.as_bytes());
                hasher.update(p.nonce.to_be_bytes());
                hasher.update(p.planck.to_be_bytes());
            }
            Particle::Message(p) => {
                hasher.update(b"message");
                hasher.update(p.from.as_str());
                hasher.update(p.to.as_str());
                hasher.update(&p.payload);
            }
        }
        ParticleId(hex::encode(hasher.finalize()))
    }

    /// Whether this particle carries token value (fees included).
    pub fn is_token_bearing(&self) -> bool {
        matches!(self, Particle::Token(_) | Particle::Fee(_))
    }

    pub fn is_fee(&self) -> bool {
        matches!(self, Particle::Fee(_))
    }

    pub fn as_token(&self) -> Option<&TokenParticle> {
        match self {
            Particle::Token(p) => Some(p),
            _ => None,
        }
    }
}

/// A particle together with its spin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpunParticle {
    pub spin: Spin,
    pub particle: Particle,
}

impl SpunParticle {
    pub fn up(particle: Particle) -> Self {
        Self {
            spin: Spin::Up,
            particle,
        }
    }

    pub fn down(particle: Particle) -> Self {
        Self {
            spin: Spin::Down,
            particle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(nonce: u64) -> Particle {
        Particle::Token(TokenParticle {
            address: Address::new("owner-1"),
            amount: BigUint::from(100u8),
            token_class: TokenClassRef::new(Address::new("issuer-1"), "XYZ"),
            granularity: BigUint::from(1u8),
            kind: TokenParticleKind::Transfer,
            nonce,
            planck: 0,
        })
    }

    #[test]
    fn test_particle_id_is_content_derived() {
        assert_eq!(token(1).id(), token(1).id());
        assert_ne!(token(1).id(), token(2).id());
    }

    #[test]
    fn test_particle_id_survives_round_trip() {
        let particle = token(7);
        let json = serde_json::to_string(&particle).unwrap();
        let back: Particle = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id(), particle.id());
    }

    #[test]
    fn test_fee_is_token_bearing_but_distinct() {
        let fee = Particle::Fee(FeeParticle {
            address: Address::new("owner-1"),
            amount: BigUint::from(1u8),
            token_class: TokenClassRef::new(Address::new("system"), "POW"),
            nonce: 0,
            planck: 0,
        });
        assert!(fee.is_token_bearing());
        assert!(fee.is_fee());
        assert!(fee.as_token().is_none());
    }
}
