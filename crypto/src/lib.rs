//! Cryptographic capability surface for the HAP core ([HAP] Section 5-6).
//!
//! Nothing in this crate implements cryptography from scratch; it wraps
//! audited primitives (`ed25519-dalek`, `x25519-dalek`, `chacha20poly1305`,
//! `hkdf`, `srp`) behind the small set of operations the core protocol
//! engine actually calls, with HAP's fixed salts/infos/nonces baked in as
//! named constructors rather than left for call sites to get wrong.

#![forbid(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub use aead::{
    nonce_from_counter, nonce_from_gsn, nonce_from_label, random_broadcast_key, ControlChannelKey, SealError, TAG_LEN,
};
pub use ed25519::{Ed25519Error, Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};
pub use hash::sha512_prefix4;
pub use hkdf::{hkdf_sha512, hkdf_sha512_32, HkdfLengthError};
pub use key_exchange::{Curve25519KeyPair, Curve25519PublicKey, SharedSecret};
pub use srp6a::{SrpError, SrpServer, SrpSessionKey, SrpVerifier, SALT_LEN, VERIFIER_LEN};

mod aead;
mod ed25519;
mod hash;
mod hkdf;
mod key_exchange;
mod srp6a;

/// Device identifier length in bytes, same as the BLE advertising identifier
/// and pairing store key widths the core works with.
pub const DEVICE_ID_BYTES: usize = 6;

/// Compares two byte slices in constant time.
///
/// All tag and MAC comparisons in the core must go through this instead of
/// `==`, per [HAP] Section 5.4 / the cryptographic timing design note.
#[inline]
#[must_use]
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.len() == b.len() && a.ct_eq(b).into()
}
