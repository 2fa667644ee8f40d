//! Core error kinds ([HAP] Section 1.3 `HAPError` plus the BLE HAP status
//! codes and TLV error codes it is mapped to/from at the transport edges).

use thiserror::Error;

/// Error kinds the core raises (`spec.md` §7).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum Error {
    /// Platform/I-O failure (timer allocation, transport write, ...).
    #[error("unknown platform failure")]
    Unknown,
    /// The operation is not valid for the state machine's current state.
    #[error("operation invalid in current state")]
    InvalidState,
    /// Malformed input from the wire (TLV, PDU, JSON, HTTP).
    #[error("malformed data")]
    InvalidData,
    /// Buffer capacity or timer-slot exhaustion.
    #[error("out of resources")]
    OutOfResources,
    /// Caller lacks the required admin/session permission.
    #[error("not authorized")]
    NotAuthorized,
    /// A conflicting operation is already in progress.
    #[error("busy")]
    Busy,
}

impl From<hap_tlv::Error> for Error {
    fn from(e: hap_tlv::Error) -> Self {
        match e {
            hap_tlv::Error::InvalidData => Self::InvalidData,
            hap_tlv::Error::OutOfResources => Self::OutOfResources,
        }
    }
}

impl From<hap_crypto::SealError> for Error {
    fn from(_: hap_crypto::SealError) -> Self {
        Self::InvalidData
    }
}

/// HAP-BLE PDU status codes ([HAP] Section 7.3.3.3, Table 7-37), the wire
/// representation `Error` is translated into before a BLE response leaves
/// the accessory (`spec.md` §7 Propagation).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum BleStatus {
    Success = 0x00,
    UnsupportedPdu = 0x01,
    MaxProcedures = 0x02,
    InsufficientAuthorization = 0x03,
    InvalidInstanceId = 0x04,
    InsufficientAuthentication = 0x05,
    InvalidRequest = 0x06,
}

impl From<Error> for BleStatus {
    fn from(e: Error) -> Self {
        match e {
            Error::Unknown | Error::InvalidData => Self::UnsupportedPdu,
            Error::InvalidState => Self::InvalidRequest,
            Error::OutOfResources => Self::MaxProcedures,
            Error::NotAuthorized => Self::InsufficientAuthorization,
            Error::Busy => Self::MaxProcedures,
        }
    }
}

/// Generic TLV error codes used by Pair Setup / Pair Verify / Pairings
/// ([HAP] Section 5.16, Table 5-5).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum TlvError {
    Unknown = 0x01,
    Authentication = 0x02,
    Backoff = 0x03,
    MaxPeers = 0x04,
    MaxTries = 0x05,
    Unavailable = 0x06,
    Busy = 0x07,
}

impl From<Error> for TlvError {
    fn from(e: Error) -> Self {
        match e {
            Error::Busy => Self::Busy,
            Error::NotAuthorized => Self::Authentication,
            _ => Self::Unknown,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
