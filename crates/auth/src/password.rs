//! Password verification with legacy-hash migration.
//!
//! Two stored formats are accepted:
//!
//! | Format | Recognized by | Comparison |
//! |--------|---------------|------------|
//! | bcrypt (primary) | `$2a$` / `$2b$` / `$2y$` prefix | `bcrypt::verify` |
//! | legacy | 64 hex chars (unsalted SHA-256) | `subtle` constant-time equality |
//!
//! Anything else never verifies.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

pub use bcrypt::DEFAULT_COST;

const BCRYPT_PREFIXES: [&str; 3] = ["$2a$", "$2b$", "$2y$"];

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HashFormat {
    Bcrypt,
    LegacySha256,
    Unknown,
}

impl HashFormat {
    pub fn detect(stored: &str) -> Self {
        if BCRYPT_PREFIXES.iter().any(|p| stored.starts_with(p)) {
            return HashFormat::Bcrypt;
        }
        if stored.len() == 64 && stored.bytes().all(|b| b.is_ascii_hexdigit()) {
            return HashFormat::LegacySha256;
        }
        HashFormat::Unknown
    }
}

/// Outcome of a successful or failed comparison.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Verification {
    /// The password matches. `needs_rehash` asks the caller to store [`PasswordVerifier::hash`]
    /// of the plaintext (legacy format or a weaker bcrypt cost).
    Valid { needs_rehash: bool },
    Invalid,
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid { .. })
    }
}

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

/// Stateless verifier; cheap to clone.
#[derive(Debug, Clone)]
pub struct PasswordVerifier {
    cost: u32,
    /// Burned on unknown emails so they take as long as a real check.
    dummy_hash: String,
}

impl PasswordVerifier {
    pub fn new(cost: u32) -> Result<Self, PasswordError> {
        let dummy_hash = bcrypt::hash("juris-timing-equalizer", cost)?;
        Ok(Self { cost, dummy_hash })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash with the primary format.
    pub fn hash(&self, plaintext: &str) -> Result<String, PasswordError> {
        Ok(bcrypt::hash(plaintext, self.cost)?)
    }

    pub fn verify(&self, plaintext: &str, stored: &str) -> Verification {
        match HashFormat::detect(stored) {
            HashFormat::Bcrypt => match bcrypt::verify(plaintext, stored) {
                Ok(true) => Verification::Valid {
                    needs_rehash: bcrypt_cost(stored).is_some_and(|c| c < self.cost),
                },
                _ => Verification::Invalid,
            },
            HashFormat::LegacySha256 => {
                let computed = hex::encode(Sha256::digest(plaintext.as_bytes()));
                let stored = stored.to_ascii_lowercase();
                if bool::from(computed.as_bytes().ct_eq(stored.as_bytes())) {
                    Verification::Valid { needs_rehash: true }
                } else {
                    Verification::Invalid
                }
            }
            HashFormat::Unknown => Verification::Invalid,
        }
    }

    /// Spend the time of one bcrypt check without a stored hash.
    pub fn burn(&self, plaintext: &str) {
        let _ = bcrypt::verify(plaintext, &self.dummy_hash);
    }
}

/// Hex SHA-256 in the legacy layout. Only used to seed legacy data.
pub fn legacy_sha256(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

fn bcrypt_cost(stored: &str) -> Option<u32> {
    stored.get(4..6)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> PasswordVerifier {
        PasswordVerifier::new(4).unwrap()
    }

    #[test]
    fn detects_formats() {
        let v = verifier();
        assert_eq!(HashFormat::detect(&v.hash("p@ss").unwrap()), HashFormat::Bcrypt);
        assert_eq!(HashFormat::detect(&legacy_sha256("p@ss")), HashFormat::LegacySha256);
        assert_eq!(HashFormat::detect("plaintext"), HashFormat::Unknown);
        assert_eq!(HashFormat::detect(""), HashFormat::Unknown);
    }

    #[test]
    fn bcrypt_roundtrip() {
        let v = verifier();
        let stored = v.hash("p@ss").unwrap();
        assert_eq!(v.verify("p@ss", &stored), Verification::Valid { needs_rehash: false });
        assert_eq!(v.verify("wrong", &stored), Verification::Invalid);
    }

    #[test]
    fn legacy_hash_verifies_and_asks_for_rehash() {
        let v = verifier();
        let stored = legacy_sha256("p@ss");
        assert_eq!(v.verify("p@ss", &stored), Verification::Valid { needs_rehash: true });
        assert_eq!(v.verify("p@sS", &stored), Verification::Invalid);
        assert_eq!(
            v.verify("p@ss", &stored.to_ascii_uppercase()),
            Verification::Valid { needs_rehash: true }
        );
    }

    #[test]
    fn weaker_bcrypt_cost_asks_for_rehash() {
        let weak = bcrypt::hash("p@ss", 4).unwrap();
        let v = PasswordVerifier::new(5).unwrap();
        assert_eq!(v.verify("p@ss", &weak), Verification::Valid { needs_rehash: true });
    }

    #[test]
    fn unknown_format_never_verifies() {
        let v = verifier();
        assert_eq!(v.verify("p@ss", "p@ss"), Verification::Invalid);
        assert_eq!(v.verify("", "$2b$garbage"), Verification::Invalid);
    }
}
