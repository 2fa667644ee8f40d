//! SHA-512, used only for the setup-hash computation ([HAP] Section
//! 4.5.2). Every other use of SHA-512 in this crate goes through HKDF.

use sha2::{Digest, Sha512};

/// Returns the first 4 bytes of SHA-512(`data`), the accessory setup hash
/// embedded in advertisements and setup payloads.
#[must_use]
pub fn sha512_prefix4(data: &[u8]) -> [u8; 4] {
    let digest = Sha512::digest(data);
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest[..4]);
    out
}
