//! HKDF-SHA512 key derivation ([HAP] Section 5.5, used for every
//! `SessionKey`, `Control-*`, and broadcast-key derivation in the core).

use hkdf::Hkdf;
use sha2::Sha512;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("requested HKDF output length exceeds 255 * 64 bytes")]
pub struct HkdfLengthError;

/// Runs HKDF-SHA512 with the given input keying material, salt, and info,
/// filling exactly `out.len()` bytes.
///
/// # Errors
///
/// Returns [`HkdfLengthError`] if `out` is longer than HKDF-SHA512 can
/// produce (never true for any derivation HAP performs, but the bound is
/// enforced rather than asserted so a caller's typo in a buffer size fails
/// cleanly).
pub fn hkdf_sha512(ikm: &[u8], salt: &[u8], info: &[u8], out: &mut [u8]) -> Result<(), HkdfLengthError> {
    let hk = Hkdf::<Sha512>::new(Some(salt), ikm);
    hk.expand(info, out).map_err(|_| HkdfLengthError)
}

/// Derives a fixed-size key via HKDF-SHA512. A thin convenience over
/// [`hkdf_sha512`] for the common 32-byte-output case.
#[must_use]
pub fn hkdf_sha512_32(ikm: &[u8], salt: &[u8], info: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    hkdf_sha512(ikm, salt, info, &mut out).expect("32 bytes is always a valid HKDF-SHA512 length");
    out
}
