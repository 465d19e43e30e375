//! Token classes, definitions, and subunit conversion.
//!
//! Amounts on the ledger are expressed in subunits. One whole token unit is
//! a fixed 10^18 subunits regardless of the token's granularity; conversion
//! to whole units truncates toward zero.

use num_bigint::{BigInt, BigUint};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;

use crate::atom::address::Address;

/// Number of subunits in one whole token unit.
pub fn subunits_per_unit() -> BigUint {
    BigUint::from(10u32).pow(18)
}

/// Convert a signed subunit amount to whole token units, truncating toward
/// zero.
pub fn subunits_to_units(subunits: &BigInt) -> BigInt {
    subunits / BigInt::from(subunits_per_unit())
}

/// Convert whole token units to subunits.
pub fn units_to_subunits(units: u64) -> BigUint {
    BigUint::from(units) * subunits_per_unit()
}

/// Decimal-string encoding for big integer amounts on the wire.
pub mod amount_serde {
    use num_bigint::BigUint;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Reference to a token class: the issuing address plus the symbol it issued.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClassRef {
    pub issuer: Address,
    pub symbol: String,
}

impl TokenClassRef {
    pub fn new(issuer: Address, symbol: impl Into<String>) -> Self {
        Self {
            issuer,
            symbol: symbol.into(),
        }
    }
}

impl fmt::Display for TokenClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.issuer, self.symbol)
    }
}

/// Descriptive metadata for a token class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDefinition {
    pub symbol: String,
    pub name: String,
    pub description: String,
    #[serde(with = "amount_serde")]
    pub granularity: BigUint,
}

/// Registry of known token definitions.
///
/// Balance materialization consults this registry; token classes it cannot
/// resolve are omitted from unit-denominated results.
pub struct TokenRegistry {
    tokens: RwLock<HashMap<TokenClassRef, TokenDefinition>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, class: TokenClassRef, definition: TokenDefinition) {
        self.tokens.write().await.insert(class, definition);
    }

    pub async fn resolve(&self, class: &TokenClassRef) -> Option<TokenDefinition> {
        self.tokens.read().await.get(class).cloned()
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_round_trip() {
        let subunits = units_to_subunits(42);
        assert_eq!(subunits_to_units(&BigInt::from(subunits)), BigInt::from(42));
    }

    #[test]
    fn test_conversion_truncates_toward_zero() {
        let one_and_a_half = BigInt::from(units_to_subunits(3)) / BigInt::from(2);
        assert_eq!(subunits_to_units(&one_and_a_half), BigInt::from(1));
        assert_eq!(subunits_to_units(&-one_and_a_half), BigInt::from(-1));
    }

    #[tokio::test]
    async fn test_registry_resolve() {
        let registry = TokenRegistry::new();
        let class = TokenClassRef::new(Address::new("issuer-1"), "XYZ");
        assert!(registry.resolve(&class).await.is_none());

        registry
            .register(
                class.clone(),
                TokenDefinition {
                    symbol: "XYZ".to_string(),
                    name: "Xyz Token".to_string(),
                    description: String::new(),
                    granularity: BigUint::from(1u8),
                },
            )
            .await;

        assert_eq!(registry.resolve(&class).await.unwrap().symbol, "XYZ");
    }
}
