//! HAP service/characteristic UUIDs and their short-form TLV/advertising
//! encoding ([HAP] Section 6.6.1).
//!
//! Modeled on a `NonZeroU128` newtype with `as_u16`/`as_u32` "is this an
//! assigned short UUID" probes; HAP's base UUID and short-form rule
//! differ from the Bluetooth SIG one, so the constants and the
//! accompanying methods are HAP's own.

use std::fmt::{self, Debug, Display, Formatter};
use std::num::NonZeroU128;
use std::str::FromStr;

/// HAP base UUID `00000000-0000-1000-8000-0026BB765291`
/// ([HAP] Section 6.6.1).
const BASE: u128 = 0x0000_0000_0000_1000_8000_0026_BB76_5291;
const SHIFT: u32 = 96;
const LOW_96_MASK: u128 = (1u128 << SHIFT) - 1;

/// A 128-bit UUID identifying a HAP service, characteristic, or
/// descriptor type.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Uuid(NonZeroU128);

/// The short-form encoding of a UUID that shares HAP's base, per
/// `spec.md` §8 Scenario 7.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShortForm {
    /// The base-relative 32-bit value fits in 16 bits: 2-byte little-endian
    /// encoding.
    Short2([u8; 2]),
    /// The base-relative 32-bit value needs the full 32 bits: 4-byte
    /// little-endian encoding.
    Short4([u8; 4]),
    /// The UUID does not share HAP's base: the full 16-byte big-endian
    /// form is used.
    Full([u8; 16]),
}

impl Uuid {
    /// Creates a UUID from a `u128`. Returns `None` for the all-zero UUID,
    /// which is never valid.
    #[must_use]
    pub const fn new(v: u128) -> Option<Self> {
        match NonZeroU128::new(v) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Creates a HAP UUID from a base-relative 32-bit value, e.g. the
    /// well-known characteristic/service short identifiers.
    #[must_use]
    pub const fn from_short(v: u32) -> Self {
        // SAFETY: BASE has its top 32 bits zero and is itself non-zero, so
        // the result is non-zero for any `v`, including 0.
        unsafe { Self(NonZeroU128::new_unchecked((v as u128) << SHIFT | BASE)) }
    }

    #[must_use]
    pub const fn as_u128(self) -> u128 {
        self.0.get()
    }

    /// Returns the big-endian, dash-free 16-byte wire representation.
    #[must_use]
    pub fn to_be_bytes(self) -> [u8; 16] {
        self.0.get().to_be_bytes()
    }

    /// Returns the short-form TLV/advertising encoding ([HAP] Section
    /// 6.6.1): a 2- or 4-byte little-endian value when the UUID shares
    /// HAP's base UUID, or the full 16-byte form otherwise.
    #[must_use]
    pub fn short_form(self) -> ShortForm {
        let v = self.0.get();
        if v & LOW_96_MASK != BASE {
            return ShortForm::Full(self.to_be_bytes());
        }
        let hi32 = (v >> SHIFT) as u32;
        if hi32 <= u32::from(u16::MAX) {
            ShortForm::Short2((hi32 as u16).to_le_bytes())
        } else {
            ShortForm::Short4(hi32.to_le_bytes())
        }
    }
}

impl Debug for Uuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let v = self.0.get();
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:04X}-{:012X}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & ((1 << 48) - 1)
        )
    }
}

impl Display for Uuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParseUuidError;

impl FromStr for Uuid {
    type Err = ParseUuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.chars().filter(|c| *c != '-').collect();
        if hex.len() != 32 {
            return Err(ParseUuidError);
        }
        let v = u128::from_str_radix(&hex, 16).map_err(|_| ParseUuidError)?;
        Self::new(v).ok_or(ParseUuidError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_form_two_bytes() {
        let u: Uuid = "00000F25-0000-1000-8000-0026BB765291".parse().unwrap();
        assert_eq!(u.short_form(), ShortForm::Short2([0x25, 0x0F]));
    }

    #[test]
    fn non_hap_base_uses_full_form() {
        let u: Uuid = "34AB8811-AC7F-4340-BAC3-FD6A85F9943B".parse().unwrap();
        assert!(matches!(u.short_form(), ShortForm::Full(_)));
    }

    #[test]
    fn from_short_round_trips() {
        let u = Uuid::from_short(0x0F25);
        assert_eq!(u.short_form(), ShortForm::Short2([0x25, 0x0F]));
    }
}
