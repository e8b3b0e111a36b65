//! Signing keys and the external-signer seam.
//!
//! Signing must be a pure function of the input bytes: the transaction
//! lifecycle memoizes serialized payloads and relies on re-signing the same
//! body producing the same signature.

use std::fmt;
use std::hash::{Hash, Hasher};

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("expected {expected} key bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

/// Ed25519 private key.
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut rand::rngs::OsRng))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Self(SigningKey::from_bytes(&bytes)))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    /// Deterministic ed25519 signature over `message`.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.0.sign(message).to_bytes().to_vec()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material stays out of logs.
        write!(f, "PrivateKey({})", self.public_key())
    }
}

/// Ed25519 public key.
#[derive(Debug, Clone, Copy)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        VerifyingKey::from_bytes(&bytes)
            .map(Self)
            .map_err(|e| KeyError::InvalidKey(e.to_string()))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        Signature::from_slice(signature)
            .map(|sig| self.0.verify(message, &sig).is_ok())
            .unwrap_or(false)
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PublicKey {}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state);
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

/// A signing capability, local or remote (e.g. an HSM).
pub trait Signer: Send + Sync {
    fn public_key(&self) -> PublicKey;

    /// Must be a pure function of `message`.
    fn sign(&self, message: &[u8]) -> Vec<u8>;
}

impl Signer for PrivateKey {
    fn public_key(&self) -> PublicKey {
        PrivateKey::public_key(self)
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        PrivateKey::sign(self, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let key = PrivateKey::generate();
        let sig = key.sign(b"payload");
        assert!(key.public_key().verify(b"payload", &sig));
        assert!(!key.public_key().verify(b"other payload", &sig));
    }

    #[test]
    fn test_signing_is_deterministic() {
        let key = PrivateKey::from_bytes(&[7u8; 32]).unwrap();
        assert_eq!(key.sign(b"stable"), key.sign(b"stable"));
    }

    #[test]
    fn test_key_length_checked() {
        assert!(matches!(
            PrivateKey::from_bytes(&[0u8; 16]),
            Err(KeyError::InvalidLength { .. })
        ));
        assert!(matches!(
            PublicKey::from_bytes(&[0u8; 64]),
            Err(KeyError::InvalidLength { .. })
        ));
    }
}
