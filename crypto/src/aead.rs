//! ChaCha20-Poly1305 AEAD ([HAP] Section 5.5.2), used for every encrypted
//! control channel and for BLE encrypted-notification advertisements.

use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand_core::{OsRng, RngCore};
use thiserror::Error;
use zeroize::ZeroizeOnDrop;

/// Tag length for ChaCha20-Poly1305, used throughout the core for buffer
/// sizing (`plaintext.len() + TAG_LEN`).
pub const TAG_LEN: usize = 16;

/// Generates a fresh 32-byte BLE broadcast encryption key ([HAP] Section
/// 7.3.5.9, `HAP-Protocol-Configuration-Request` Generate-Broadcast-Key).
#[must_use]
pub fn random_broadcast_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

#[derive(Debug, Error)]
#[error("AEAD operation failed (ciphertext forged or key/nonce mismatch)")]
pub struct SealError;

/// A 32-byte ChaCha20-Poly1305 key, used for a session's directional
/// control channel key or the BLE broadcast encryption key. Zeroed on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct ControlChannelKey([u8; 32]);

impl std::fmt::Debug for ControlChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannelKey").finish_non_exhaustive()
    }
}

impl ControlChannelKey {
    #[must_use]
    pub const fn new(key: [u8; 32]) -> Self {
        Self(key)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encrypts `plaintext` in place, appending the 16-byte tag, optionally
    /// authenticating `aad`.
    ///
    /// `nonce` is the HAP 96-bit nonce: either an 8-byte little-endian
    /// counter (control channels) or an expanded GSN (BLE broadcast),
    /// zero-padded into the low/high bytes per the caller's convention.
    ///
    /// # Errors
    ///
    /// Never fails in practice for well-formed inputs; surfaces
    /// [`SealError`] rather than panicking so callers can map it to
    /// `Error::Unknown` uniformly.
    pub fn seal(
        &self,
        nonce: &[u8; 12],
        aad: &[u8],
        buf: &mut Vec<u8>,
    ) -> Result<(), SealError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        cipher
            .encrypt_in_place(Nonce::from_slice(nonce), aad, buf)
            .map_err(|_| SealError)
    }

    /// Decrypts an in-place buffer previously produced by [`Self::seal`].
    ///
    /// # Errors
    ///
    /// Returns [`SealError`] if the tag does not verify; callers must treat
    /// this as an active-attack signal and zero session state (`InvalidData`
    /// per [HAP] Section 5.4 error handling).
    pub fn open(
        &self,
        nonce: &[u8; 12],
        aad: &[u8],
        buf: &mut Vec<u8>,
    ) -> Result<(), SealError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        cipher
            .decrypt_in_place(Nonce::from_slice(nonce), aad, buf)
            .map_err(|_| SealError)
    }
}

/// Expands a little-endian 64-bit counter into a 96-bit nonce, the
/// convention HAP control channels use (4 leading zero bytes, then the
/// 8-byte counter).
#[must_use]
pub fn nonce_from_counter(counter: u64) -> [u8; 12] {
    let mut n = [0u8; 12];
    n[4..].copy_from_slice(&counter.to_le_bytes());
    n
}

/// Expands a 16-bit GSN into the 96-bit nonce used for BLE
/// encrypted-notification advertisements ([HAP] Section 7.4.2.2.2).
#[must_use]
pub fn nonce_from_gsn(gsn: u16) -> [u8; 12] {
    nonce_from_counter(u64::from(gsn))
}

/// Expands one of the fixed 8-byte ASCII Pair Setup/Pair Verify nonces
/// (e.g. `b"PS-Msg05"`) into a 96-bit nonce (left-padded with zero bytes,
/// per [HAP] Section 5.5.2's "zero-padded upper 4 bytes" convention for
/// these textual nonces).
#[must_use]
pub fn nonce_from_label(label: &[u8; 8]) -> [u8; 12] {
    let mut n = [0u8; 12];
    n[4..].copy_from_slice(label);
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counter and GSN nonces must front-pad with zeros, matching the
    /// fixed-label nonces -- all three share byte layout `[0,0,0,0] ++ value`.
    #[test]
    fn counter_nonce_front_pads_with_zero_bytes() {
        let nonce = nonce_from_counter(1);
        assert_eq!(nonce, [0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0]);

        let nonce = nonce_from_counter(0x0102_0304_0506_0708);
        assert_eq!(nonce, [0, 0, 0, 0, 0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn gsn_nonce_matches_counter_nonce_placement() {
        assert_eq!(nonce_from_gsn(0x0102), nonce_from_counter(0x0102));
        assert_eq!(nonce_from_gsn(1), [0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn seal_open_round_trips_under_the_corrected_nonce() {
        let key = ControlChannelKey::new([7u8; 32]);
        let nonce = nonce_from_counter(42);
        let mut buf = b"HAP control channel payload".to_vec();
        key.seal(&nonce, b"aad", &mut buf).unwrap();
        key.open(&nonce, b"aad", &mut buf).unwrap();
        assert_eq!(buf, b"HAP control channel payload");
    }
}
