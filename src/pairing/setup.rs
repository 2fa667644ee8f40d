//! Pair Setup engine ([HAP] Section 5.6, `spec.md` §4.C5): the six-message
//! SRP-6a exchange that establishes a long-term pairing (or, with the
//! `Transient` flag, a Software-Authentication-only session).

use std::time::{Duration, Instant};

use hap_crypto::{hkdf_sha512_32, nonce_from_label, ControlChannelKey, Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature, SrpServer, SrpVerifier};
use tracing::debug;

use crate::error::{Error, Result, TlvError};
use crate::store::PairingRecord;

use super::{error_response, flags, tlv_type, Method};

/// Wall-clock deadline for a single Pair Setup attempt ([HAP] Section
/// 5.6, `spec.md` §5).
pub const TIMEOUT: Duration = Duration::from_secs(30);

/// Consecutive failed Pair Setup attempts after which new attempts are
/// refused until a pairing succeeds.
pub const MAX_UNSUCCESSFUL_ATTEMPTS: u8 = 100;

/// Per-session bookkeeping: which step of the exchange this session has
/// reached. The cryptographic state for the single in-flight attempt
/// lives in [`PairSetupEngine`], since `spec.md` §3 only allows one
/// concurrent attempt server-wide.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Step {
    #[default]
    Idle,
    M1Received,
    M3Received,
    M5Received,
    Complete,
    Failed,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PairSetupState {
    pub step: Step,
}

const SALT_PS_ENCRYPT: &[u8] = b"Pair-Setup-Encrypt-Salt";
const INFO_PS_ENCRYPT: &[u8] = b"Pair-Setup-Encrypt-Info";
const SALT_CONTROLLER_SIGN: &[u8] = b"Pair-Setup-Controller-Sign-Salt";
const INFO_CONTROLLER_SIGN: &[u8] = b"Pair-Setup-Controller-Sign-Info";
const SALT_ACCESSORY_SIGN: &[u8] = b"Pair-Setup-Accessory-Sign-Salt";
const INFO_ACCESSORY_SIGN: &[u8] = b"Pair-Setup-Accessory-Sign-Info";
const NONCE_M5: &[u8; 8] = b"PS-Msg05";
const NONCE_M6: &[u8; 8] = b"PS-Msg06";

struct ActiveAttempt {
    session: u64,
    deadline: Instant,
    srp: Option<SrpServer>,
    session_key: Option<ControlChannelKey>,
    flags: u8,
    keep_setup_info: bool,
}

/// The single, server-wide Pair Setup state machine.
#[derive(Default)]
pub struct PairSetupEngine {
    active: Option<ActiveAttempt>,
}

impl std::fmt::Debug for PairSetupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairSetupEngine")
            .field("in_progress", &self.active.is_some())
            .finish()
    }
}

/// The result of a successful M5: a pairing to persist (unless
/// transient) and whether the session should become transient.
pub struct M5Outcome {
    pub response: Vec<u8>,
    pub pairing: Option<PairingRecord>,
    pub is_transient: bool,
}

impl PairSetupEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the in-flight attempt (if any) has exceeded its
    /// 30-second deadline. Callers poll this from the server's tick and
    /// call [`Self::reset`] accordingly, bumping the lockout counter
    /// themselves (only the caller holds the store).
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.active.as_ref().is_some_and(|a| now >= a.deadline)
    }

    #[must_use]
    pub fn owner(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.session)
    }

    pub fn reset(&mut self) {
        self.active = None;
    }

    /// M1: SRP Start Request. Begins the exchange if no other Pair Setup
    /// is in progress and the lockout threshold has not been reached.
    ///
    /// # Errors
    ///
    /// - [`Error::Busy`] if another session's Pair Setup is in progress.
    /// - [`Error::NotAuthorized`] if the unsuccessful-attempts lockout is
    ///   active.
    /// - [`Error::InvalidData`] for a malformed M1 body.
    pub fn handle_m1(
        &mut self,
        session: u64,
        body: &[u8],
        now: Instant,
        setup_info: SrpVerifier,
        b_priv: [u8; 64],
        unsuccessful_attempts: u8,
    ) -> Result<Vec<u8>> {
        if unsuccessful_attempts >= MAX_UNSUCCESSFUL_ATTEMPTS {
            return Err(Error::NotAuthorized);
        }
        if let Some(active) = &self.active {
            if active.session != session {
                return Err(Error::Busy);
            }
        }
        let mut r = hap_tlv::Reader::new(body)?;
        let state = r.get(tlv_type::STATE).ok_or(Error::InvalidData)?;
        if state.first() != Some(&1) {
            return Err(Error::InvalidData);
        }
        let method_byte = r.get(tlv_type::METHOD).and_then(|v| v.first().copied());
        let method = method_byte.map(Method::try_from).transpose()?;
        if !matches!(method, Some(Method::PairSetup | Method::PairSetupWithAuth)) {
            return Err(Error::InvalidData);
        }
        let pair_flags = r.get(tlv_type::FLAGS).and_then(|v| v.first().copied()).unwrap_or(0);
        let keep_setup_info = pair_flags & flags::TRANSIENT != 0;

        let srp = SrpServer::start(setup_info.salt, setup_info.verifier, b_priv);
        let mut resp = vec![0u8; 8 + srp.salt().len() + 4 + srp.public_b().len()];
        let len = {
            let mut w = hap_tlv::Writer::new(&mut resp);
            w.append(tlv_type::STATE, &[2])?;
            w.append(tlv_type::SALT, srp.salt())?;
            w.append(tlv_type::PUBLIC_KEY, srp.public_b())?;
            w.len()
        };
        resp.truncate(len);

        self.active = Some(ActiveAttempt {
            session,
            deadline: now + TIMEOUT,
            srp: Some(srp),
            session_key: None,
            flags: pair_flags,
            keep_setup_info,
        });
        debug!(transient = keep_setup_info, "Pair Setup M1 accepted");
        Ok(resp)
    }

    /// M3: SRP Verify Request -> M4.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if this session has no in-flight M1, or
    /// [`Error::InvalidData`] if the proof does not verify (the
    /// unsuccessful-attempts counter is the caller's responsibility to
    /// bump, since only the caller knows the store).
    pub fn handle_m3(&mut self, session: u64, body: &[u8]) -> Result<Vec<u8>> {
        let active = self.take_owned(session)?;
        let srp = active.srp.ok_or(Error::InvalidState)?;
        let mut r = hap_tlv::Reader::new(body)?;
        let state = r.get(tlv_type::STATE).ok_or(Error::InvalidData)?;
        if state.first() != Some(&3) {
            return Err(Error::InvalidData);
        }
        let a_pub = r.get(tlv_type::PUBLIC_KEY).ok_or(Error::InvalidData)?;
        let m1 = r.get(tlv_type::PROOF).ok_or(Error::InvalidData)?;

        let (session_key_material, m2) = srp
            .verify_client(&a_pub, &m1)
            .map_err(|_| Error::InvalidData)?;
        let session_key = hkdf_sha512_32(session_key_material.as_bytes(), SALT_PS_ENCRYPT, INFO_PS_ENCRYPT);

        let mut resp = vec![0u8; 8 + m2.len()];
        let len = {
            let mut w = hap_tlv::Writer::new(&mut resp);
            w.append(tlv_type::STATE, &[4])?;
            w.append(tlv_type::PROOF, &m2)?;
            w.len()
        };
        resp.truncate(len);

        self.active = Some(ActiveAttempt {
            session,
            deadline: active.deadline,
            srp: None,
            session_key: Some(ControlChannelKey::new(session_key)),
            flags: active.flags,
            keep_setup_info: active.keep_setup_info,
        });
        Ok(resp)
    }

    /// M5: Exchange Request -> M6. Verifies the controller's identity,
    /// persists the pairing (unless `Transient`), and returns the
    /// accessory's own signed identity.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] without an in-flight M3, [`Error::InvalidData`]
    /// for a malformed body or signature mismatch.
    pub fn handle_m5(
        &mut self,
        session: u64,
        body: &[u8],
        device_id: [u8; 6],
        ltsk: &Ed25519KeyPair,
    ) -> Result<M5Outcome> {
        let active = self.take_owned(session)?;
        let session_key = active.session_key.ok_or(Error::InvalidState)?;
        let mut r = hap_tlv::Reader::new(body)?;
        let state = r.get(tlv_type::STATE).ok_or(Error::InvalidData)?;
        if state.first() != Some(&5) {
            return Err(Error::InvalidData);
        }
        let mut encrypted = r.get(tlv_type::ENCRYPTED_DATA).ok_or(Error::InvalidData)?;
        let nonce = nonce_from_label(NONCE_M5);
        session_key.open(&nonce, &[], &mut encrypted)?;

        let mut sub = hap_tlv::Reader::new(&encrypted)?;
        let identifier = sub.get(tlv_type::IDENTIFIER).ok_or(Error::InvalidData)?;
        let public_key = sub.get(tlv_type::PUBLIC_KEY).ok_or(Error::InvalidData)?;
        let signature_bytes = sub.get(tlv_type::SIGNATURE).ok_or(Error::InvalidData)?;
        let controller_ltpk = Ed25519PublicKey(
            <[u8; 32]>::try_from(public_key.as_slice()).map_err(|_| Error::InvalidData)?,
        );
        let signature =
            Ed25519Signature::try_from(signature_bytes.as_slice()).map_err(|_| Error::InvalidData)?;

        let x = hkdf_sha512_32(session_key.as_bytes(), SALT_CONTROLLER_SIGN, INFO_CONTROLLER_SIGN);
        let mut msg = Vec::with_capacity(32 + identifier.len() + public_key.len());
        msg.extend_from_slice(&x);
        msg.extend_from_slice(&identifier);
        msg.extend_from_slice(&public_key);
        controller_ltpk
            .verify(&msg, &signature)
            .map_err(|_| Error::InvalidData)?;

        // M6: sign the accessory's own identity and return it encrypted.
        let acc_x = hkdf_sha512_32(session_key.as_bytes(), SALT_ACCESSORY_SIGN, INFO_ACCESSORY_SIGN);
        let acc_ltpk = ltsk.public_key();
        let mut acc_msg = Vec::with_capacity(32 + device_id.len() + 32);
        acc_msg.extend_from_slice(&acc_x);
        acc_msg.extend_from_slice(&device_id);
        acc_msg.extend_from_slice(acc_ltpk.as_bytes());
        let acc_sig = ltsk.sign(&acc_msg);

        let mut inner = vec![0u8; 8 + device_id.len() + 8 + 32 + 8 + 64];
        let inner_len = {
            let mut w = hap_tlv::Writer::new(&mut inner);
            w.append(tlv_type::IDENTIFIER, &device_id)?;
            w.append(tlv_type::PUBLIC_KEY, acc_ltpk.as_bytes())?;
            w.append(tlv_type::SIGNATURE, acc_sig.as_bytes())?;
            w.len()
        };
        let mut inner_enc = inner[..inner_len].to_vec();
        let nonce6 = nonce_from_label(NONCE_M6);
        session_key.seal(&nonce6, &[], &mut inner_enc)?;

        let mut resp = vec![0u8; 8 + inner_enc.len() + 4];
        let resp_len = {
            let mut w = hap_tlv::Writer::new(&mut resp);
            w.append(tlv_type::STATE, &[6])?;
            w.append(tlv_type::ENCRYPTED_DATA, &inner_enc)?;
            w.len()
        };
        resp.truncate(resp_len);

        let is_transient = active.flags & flags::TRANSIENT != 0;
        let pairing = (!is_transient).then(|| PairingRecord::new(&identifier, controller_ltpk, true));

        Ok(M5Outcome {
            response: resp,
            pairing,
            is_transient,
        })
    }

    /// Whether the last completed (or active) attempt requested the
    /// previous setup code be kept for a subsequent Split Pair Setup.
    #[must_use]
    pub fn keep_setup_info(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.keep_setup_info)
    }

    fn take_owned(&mut self, session: u64) -> Result<ActiveAttempt> {
        match &self.active {
            Some(a) if a.session == session => Ok(self.active.take().unwrap()),
            Some(_) => Err(Error::Busy),
            None => Err(Error::InvalidState),
        }
    }
}

/// Builds a generic-error M2/M4/M6-shaped response after any state
/// deviation, malformed TLV, or verification failure ([HAP] Section
/// 5.16).
#[must_use]
pub fn authentication_failed_response(state: u8) -> Vec<u8> {
    let mut buf = [0u8; 8];
    let len = error_response(&mut buf, state, TlvError::Authentication);
    buf[..len].to_vec()
}
