//! Ed25519 signing for the long-term accessory/controller identities
//! ([HAP] Section 5.6.1, 5.7.1).

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;
use thiserror::Error;
use zeroize::ZeroizeOnDrop;

#[derive(Debug, Error)]
pub enum Ed25519Error {
    #[error("malformed Ed25519 public key")]
    InvalidPublicKey,
    #[error("malformed Ed25519 signature")]
    InvalidSignature,
    #[error("signature verification failed")]
    VerificationFailed,
}

/// A long-term Ed25519 key pair (LTSK + derived LTPK). Generated once,
/// lazily, on first server start, and persisted in `Configuration` key
/// `0x21`.
#[derive(ZeroizeOnDrop)]
pub struct Ed25519KeyPair {
    signing_key: SigningKey,
}

impl std::fmt::Debug for Ed25519KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519KeyPair")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

impl Ed25519KeyPair {
    /// Generates a new key pair from the platform random source.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstructs a key pair from a persisted 32-byte seed (the LTSK as
    /// stored by [HAP] -- the ADK persists only the seed half of the
    /// expanded key, like this crate's `SigningKey::from_bytes`).
    #[must_use]
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    #[must_use]
    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    #[must_use]
    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        Ed25519Signature(self.signing_key.sign(message).to_bytes())
    }
}

/// A 32-byte Ed25519 public key (LTPK), as stored in a pairing record.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Ed25519PublicKey(pub [u8; 32]);

impl std::fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ed25519PublicKey({:02x?})", self.0)
    }
}

impl Ed25519PublicKey {
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Verifies a signature over `message`.
    ///
    /// # Errors
    ///
    /// Returns [`Ed25519Error`] if the stored key or signature bytes are
    /// malformed, or if verification fails. Callers must treat every
    /// variant identically: a generic TLV/HAP-status error, never a
    /// distinguishable one (timing/oracle hardening).
    pub fn verify(&self, message: &[u8], sig: &Ed25519Signature) -> Result<(), Ed25519Error> {
        let key =
            VerifyingKey::from_bytes(&self.0).map_err(|_| Ed25519Error::InvalidPublicKey)?;
        let signature = Signature::from_bytes(&sig.0);
        key.verify(message, &signature)
            .map_err(|_| Ed25519Error::VerificationFailed)
    }
}

impl From<[u8; 32]> for Ed25519PublicKey {
    fn from(v: [u8; 32]) -> Self {
        Self(v)
    }
}

/// A 64-byte Ed25519 signature.
#[derive(Clone, Copy)]
pub struct Ed25519Signature(pub [u8; 64]);

impl std::fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ed25519Signature({:02x?}..)", &self.0[..4])
    }
}

impl Ed25519Signature {
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Ed25519Signature {
    type Error = Ed25519Error;

    fn try_from(v: &[u8]) -> Result<Self, Self::Error> {
        <[u8; 64]>::try_from(v)
            .map(Self)
            .map_err(|_| Ed25519Error::InvalidSignature)
    }
}
