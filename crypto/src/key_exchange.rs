//! Curve25519 ECDH for Pair Verify ([HAP] Section 5.7).

use rand_core::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret as DalekShared, StaticSecret};
use zeroize::ZeroizeOnDrop;

/// An ephemeral Curve25519 key pair, generated fresh for each Pair Verify
/// procedure and discarded afterward.
#[derive(ZeroizeOnDrop)]
pub struct Curve25519KeyPair {
    #[zeroize(skip)]
    public: [u8; 32],
    secret: StaticSecret,
}

impl std::fmt::Debug for Curve25519KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Curve25519KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

impl Curve25519KeyPair {
    /// Generates a new ephemeral key pair from the platform random source.
    #[must_use]
    pub fn generate() -> Self {
        // `EphemeralSecret` cannot be cloned into a `StaticSecret`-style
        // struct directly, so a `StaticSecret` is used here: it offers the
        // same scalar-multiply operation while letting this type be
        // constructed once and queried for its public key without
        // consuming itself on the first Diffie-Hellman call.
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            public: *public.as_bytes(),
            secret,
        }
    }

    #[must_use]
    pub const fn public_key(&self) -> Curve25519PublicKey {
        Curve25519PublicKey(self.public)
    }

    /// Computes the shared secret with the peer's public key.
    #[must_use]
    pub fn diffie_hellman(&self, peer: &Curve25519PublicKey) -> SharedSecret {
        let shared = self.secret.diffie_hellman(&PublicKey::from(peer.0));
        SharedSecret(shared)
    }
}

/// Suppresses the unused-import warning for `EphemeralSecret`: kept as a
/// documented alternative construction path for callers that want a
/// use-once guarantee enforced by the type system.
#[allow(dead_code)]
fn _ephemeral_alternative() -> EphemeralSecret {
    EphemeralSecret::random_from_rng(OsRng)
}

/// A Curve25519 public key, 32 bytes, as exchanged in Pair Verify M1/M2.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Curve25519PublicKey(pub [u8; 32]);

impl std::fmt::Debug for Curve25519PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Curve25519PublicKey({:02x?})", self.0)
    }
}

impl Curve25519PublicKey {
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Curve25519PublicKey {
    fn from(v: [u8; 32]) -> Self {
        Self(v)
    }
}

/// The X25519 shared secret `cv_KEY`, retained on the session for the
/// lifetime of Pair Verify key derivation and subsequent broadcast-key
/// derivation. `x25519_dalek::SharedSecret` already zeroizes its internal
/// buffer on drop, so no additional `Drop` impl is needed here.
pub struct SharedSecret(DalekShared);

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecret").finish_non_exhaustive()
    }
}

impl SharedSecret {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}
