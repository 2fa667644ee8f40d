//! Pair Verify engine ([HAP] Section 5.7, `spec.md` §4.C6): the
//! four-message ECDH exchange that (re-)secures a session's control
//! channel against an already-established long-term pairing.

use hap_crypto::{
    hkdf_sha512_32, Curve25519KeyPair, Curve25519PublicKey, Ed25519KeyPair, Ed25519PublicKey,
    Ed25519Signature, SharedSecret,
};
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::{KeyValueStore, Store};

use super::tlv_type;

const SALT_PV_ENCRYPT: &[u8] = b"Pair-Verify-Encrypt-Salt";
const INFO_PV_ENCRYPT: &[u8] = b"Pair-Verify-Encrypt-Info";
const NONCE_M2: &[u8; 8] = b"PV-Msg02";
const NONCE_M3: &[u8; 8] = b"PV-Msg03";
const SALT_CONTROL: &[u8] = b"Control-Salt";
const INFO_READ: &[u8] = b"Control-Read-Encryption-Key";
const INFO_WRITE: &[u8] = b"Control-Write-Encryption-Key";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
enum Step {
    #[default]
    Idle,
    M1Received,
    Complete,
}

/// Per-session Pair Verify progress. Unlike Pair Setup, a distinct Pair
/// Verify exchange runs independently per session, so all state fits on
/// the session itself.
#[derive(Debug, Default)]
pub struct PairVerifyState {
    step: Step,
    accessory_keys: Option<Curve25519KeyPair>,
    controller_public: Option<Curve25519PublicKey>,
    shared_secret: Option<SharedSecret>,
    session_key: Option<hap_crypto::ControlChannelKey>,
}

impl PairVerifyState {
    #[must_use]
    pub fn step(&self) -> &'static str {
        match self.step {
            Step::Idle => "idle",
            Step::M1Received => "m1-received",
            Step::Complete => "complete",
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// M1: Verify Start Request -> M2. Generates an ephemeral Curve25519
    /// key pair, signs the accessory's identity with the long-term key,
    /// and returns the signed, encrypted M2 body.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidData`] for a malformed M1 body.
    pub fn handle_m1(
        &mut self,
        body: &[u8],
        device_id: [u8; 6],
        ltsk: &Ed25519KeyPair,
    ) -> Result<Vec<u8>> {
        let mut r = hap_tlv::Reader::new(body)?;
        let state = r.get(tlv_type::STATE).ok_or(Error::InvalidData)?;
        if state.first() != Some(&1) {
            return Err(Error::InvalidData);
        }
        let controller_public_bytes = r.get(tlv_type::PUBLIC_KEY).ok_or(Error::InvalidData)?;
        let controller_public = Curve25519PublicKey::from(
            <[u8; 32]>::try_from(controller_public_bytes.as_slice()).map_err(|_| Error::InvalidData)?,
        );

        let accessory_keys = Curve25519KeyPair::generate();
        let shared_secret = accessory_keys.diffie_hellman(&controller_public);
        let session_key_material =
            hkdf_sha512_32(shared_secret.as_bytes(), SALT_PV_ENCRYPT, INFO_PV_ENCRYPT);
        let session_key = hap_crypto::ControlChannelKey::new(session_key_material);

        let mut sign_msg = Vec::with_capacity(32 + device_id.len() + 32);
        sign_msg.extend_from_slice(accessory_keys.public_key().as_bytes());
        sign_msg.extend_from_slice(&device_id);
        sign_msg.extend_from_slice(controller_public.as_bytes());
        let signature = ltsk.sign(&sign_msg);

        let mut inner = vec![0u8; 8 + device_id.len() + 8 + 64];
        let inner_len = {
            let mut w = hap_tlv::Writer::new(&mut inner);
            w.append(tlv_type::IDENTIFIER, &device_id)?;
            w.append(tlv_type::SIGNATURE, signature.as_bytes())?;
            w.len()
        };
        let mut inner_enc = inner[..inner_len].to_vec();
        let nonce = hap_crypto::nonce_from_label(NONCE_M2);
        session_key.seal(&nonce, &[], &mut inner_enc)?;

        let mut resp = vec![0u8; 8 + 32 + 8 + inner_enc.len()];
        let resp_len = {
            let mut w = hap_tlv::Writer::new(&mut resp);
            w.append(tlv_type::STATE, &[2])?;
            w.append(tlv_type::PUBLIC_KEY, accessory_keys.public_key().as_bytes())?;
            w.append(tlv_type::ENCRYPTED_DATA, &inner_enc)?;
            w.len()
        };
        resp.truncate(resp_len);

        self.step = Step::M1Received;
        self.accessory_keys = Some(accessory_keys);
        self.controller_public = Some(controller_public);
        self.shared_secret = Some(shared_secret);
        self.session_key = Some(session_key);
        debug!("Pair Verify M1 accepted");
        Ok(resp)
    }

    /// M3: Verify Finish Request. Decrypts and verifies the controller's
    /// signature against its stored long-term public key, and derives
    /// the two directional control-channel keys.
    ///
    /// Returns the M4 response, the pairing id that authenticated the
    /// session, the retained ECDH shared secret (`cv_KEY`), and the
    /// accessory-to-controller / controller-to-accessory channel keys.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] without an in-flight M1, [`Error::NotAuthorized`]
    /// if the claimed identifier has no pairing record, [`Error::InvalidData`]
    /// for any other malformed or unverifiable input.
    pub fn handle_m3<S: KeyValueStore>(
        &mut self,
        body: &[u8],
        store: &Store<S>,
    ) -> Result<(
        Vec<u8>,
        u8,
        SharedSecret,
        hap_crypto::ControlChannelKey,
        hap_crypto::ControlChannelKey,
    )> {
        if self.step != Step::M1Received {
            return Err(Error::InvalidState);
        }
        let session_key = self.session_key.take().ok_or(Error::InvalidState)?;
        let accessory_keys = self.accessory_keys.take().ok_or(Error::InvalidState)?;
        let controller_public = self.controller_public.take().ok_or(Error::InvalidState)?;
        let shared_secret = self.shared_secret.take().ok_or(Error::InvalidState)?;

        let mut r = hap_tlv::Reader::new(body)?;
        let state = r.get(tlv_type::STATE).ok_or(Error::InvalidData)?;
        if state.first() != Some(&3) {
            return Err(Error::InvalidData);
        }
        let mut encrypted = r.get(tlv_type::ENCRYPTED_DATA).ok_or(Error::InvalidData)?;
        let nonce = hap_crypto::nonce_from_label(NONCE_M3);
        session_key.open(&nonce, &[], &mut encrypted)?;

        let mut sub = hap_tlv::Reader::new(&encrypted)?;
        let identifier = sub.get(tlv_type::IDENTIFIER).ok_or(Error::InvalidData)?;
        let signature_bytes = sub.get(tlv_type::SIGNATURE).ok_or(Error::InvalidData)?;
        let signature =
            Ed25519Signature::try_from(signature_bytes.as_slice()).map_err(|_| Error::InvalidData)?;

        let pairing_id = store
            .pairing_ids()
            .into_iter()
            .find(|&id| store.pairing(id).is_some_and(|p| p.identifier() == identifier.as_slice()))
            .ok_or(Error::NotAuthorized)?;
        let record = store.pairing(pairing_id).ok_or(Error::NotAuthorized)?;
        let controller_ltpk: Ed25519PublicKey = record.public_key();

        let mut msg = Vec::with_capacity(32 + identifier.len() + 32);
        msg.extend_from_slice(controller_public.as_bytes());
        msg.extend_from_slice(&identifier);
        msg.extend_from_slice(accessory_keys.public_key().as_bytes());
        controller_ltpk
            .verify(&msg, &signature)
            .map_err(|_| Error::InvalidData)?;

        let read_key_material = hkdf_sha512_32(shared_secret.as_bytes(), SALT_CONTROL, INFO_READ);
        let read_key = hap_crypto::ControlChannelKey::new(read_key_material);
        let write_key_material = hkdf_sha512_32(shared_secret.as_bytes(), SALT_CONTROL, INFO_WRITE);
        let write_key = hap_crypto::ControlChannelKey::new(write_key_material);

        let mut resp = [0u8; 8];
        let len = {
            let mut w = hap_tlv::Writer::new(&mut resp);
            w.append(tlv_type::STATE, &[4])?;
            w.len()
        };

        self.step = Step::Complete;
        Ok((resp[..len].to_vec(), pairing_id, shared_secret, read_key, write_key))
    }
}
