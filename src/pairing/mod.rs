//! Pairing and session security state machines ([HAP] Section 5,
//! `spec.md` §4.C5-C7).

pub mod pairings;
pub mod setup;
pub mod verify;

/// TLV8 item types shared by Pair Setup, Pair Verify, and Pairings
/// ([HAP] Section 5.16, Table 5-6).
pub mod tlv_type {
    pub const METHOD: u8 = 0x00;
    pub const IDENTIFIER: u8 = 0x01;
    pub const SALT: u8 = 0x02;
    pub const PUBLIC_KEY: u8 = 0x03;
    pub const PROOF: u8 = 0x04;
    pub const ENCRYPTED_DATA: u8 = 0x05;
    pub const STATE: u8 = 0x06;
    pub const ERROR: u8 = 0x07;
    pub const PERMISSIONS: u8 = 0x0B;
    pub const SIGNATURE: u8 = 0x0A;
    pub const FLAGS: u8 = 0x13;
}

/// Pairing method identifiers carried in the M1 `Method` TLV item.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Method {
    PairSetup = 0x00,
    PairSetupWithAuth = 0x01,
    PairVerify = 0x02,
    AddPairing = 0x03,
    RemovePairing = 0x04,
    ListPairings = 0x05,
}

impl TryFrom<u8> for Method {
    type Error = crate::error::Error;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Ok(match v {
            0x00 => Self::PairSetup,
            0x01 => Self::PairSetupWithAuth,
            0x02 => Self::PairVerify,
            0x03 => Self::AddPairing,
            0x04 => Self::RemovePairing,
            0x05 => Self::ListPairings,
            _ => return Err(crate::error::Error::InvalidData),
        })
    }
}

/// Pair Setup `Flags` TLV bits ([HAP] Section 5.6.3).
pub mod flags {
    /// No long-term pairing is to be persisted; Software Authentication
    /// only.
    pub const TRANSIENT: u8 = 0x10;
    /// A Split Pair Setup re-using the previous transient exchange's
    /// setup code.
    pub const SPLIT: u8 = 0x01;
}

/// Serializes a single-item `{State, Error}` TLV response and returns it.
/// Used by every engine's failure path to report a generic error to the
/// controller ([HAP] Section 5.16 Table 5-5) without leaking which
/// verification step failed.
#[must_use]
pub fn error_response(buf: &mut [u8], state: u8, error: crate::error::TlvError) -> usize {
    let mut w = hap_tlv::Writer::new(buf);
    let _ = w.append(tlv_type::STATE, &[state]);
    let _ = w.append(tlv_type::ERROR, &[error as u8]);
    w.len()
}
