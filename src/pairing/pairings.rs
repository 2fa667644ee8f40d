//! Pairings Add/Remove/List engine ([HAP] Section 5.8-5.11, `spec.md`
//! §4.C7). Always runs over an already-secured, admin session; the
//! per-message dispatcher is expected to have checked
//! `Session::controller_is_admin` before calling in.

use hap_crypto::Ed25519PublicKey;
use tracing::info;

use crate::error::{Error, Result, TlvError};
use crate::store::{KeyValueStore, PairingRecord, Store};

use super::{error_response, tlv_type, Method};

const PERMISSIONS_ADMIN: u8 = 0x01;

/// The outcome of a successful Remove Pairing: whether the last admin
/// pairing was just removed, which ([HAP] Section 5.10) requires the
/// caller to additionally expire the broadcast key and tear down every
/// other active session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RemoveOutcome {
    pub removed_id: u8,
    pub last_admin_removed: bool,
}

/// Parses and dispatches an Add/Remove/List Pairings request body
/// against `store`, writing the TLV8 response into `response`.
///
/// # Errors
///
/// [`Error::InvalidData`] for a malformed request, [`Error::OutOfResources`]
/// if `response` is too small for the result.
pub fn handle_add<S: KeyValueStore>(body: &[u8], store: &mut Store<S>, response: &mut Vec<u8>) -> Result<()> {
    let mut r = hap_tlv::Reader::new(body)?;
    require_method(&mut r, Method::AddPairing)?;
    let identifier = r.get(tlv_type::IDENTIFIER).ok_or(Error::InvalidData)?;
    let public_key_bytes = r.get(tlv_type::PUBLIC_KEY).ok_or(Error::InvalidData)?;
    let permissions = r.get(tlv_type::PERMISSIONS).and_then(|v| v.first().copied()).unwrap_or(0);
    let public_key = Ed25519PublicKey(
        <[u8; 32]>::try_from(public_key_bytes.as_slice()).map_err(|_| Error::InvalidData)?,
    );
    let is_admin = permissions & PERMISSIONS_ADMIN != 0;

    let existing_id = store
        .pairing_ids()
        .into_iter()
        .find(|&id| store.pairing(id).is_some_and(|p| p.identifier() == identifier.as_slice()));

    let id = match existing_id {
        Some(id) => {
            // Re-adding an existing controller updates its public key and
            // permissions rather than creating a second record ([HAP]
            // Section 5.9.1).
            id
        }
        None => store.next_pairing_id().ok_or(Error::OutOfResources)?,
    };
    store.set_pairing(id, &PairingRecord::new(&identifier, public_key, is_admin));
    info!(pairing_id = id, is_admin, "added pairing");

    write_state_response(response, 2)
}

/// # Errors
///
/// Same as [`handle_add`].
pub fn handle_remove<S: KeyValueStore>(
    body: &[u8],
    store: &mut Store<S>,
    response: &mut Vec<u8>,
) -> Result<RemoveOutcome> {
    let mut r = hap_tlv::Reader::new(body)?;
    require_method(&mut r, Method::RemovePairing)?;
    let identifier = r.get(tlv_type::IDENTIFIER).ok_or(Error::InvalidData)?;

    let target_id = store
        .pairing_ids()
        .into_iter()
        .find(|&id| store.pairing(id).is_some_and(|p| p.identifier() == identifier.as_slice()));

    let Some(target_id) = target_id else {
        write_state_response(response, 2)?;
        return Ok(RemoveOutcome {
            removed_id: 0,
            last_admin_removed: false,
        });
    };

    let was_admin = store.pairing(target_id).is_some_and(|p| p.is_admin());
    store.remove_pairing(target_id);

    let last_admin_removed = was_admin && store.admin_pairing_count() == 0;
    if last_admin_removed {
        // [HAP] Section 5.10: removing the last admin controller wipes
        // every remaining pairing and the broadcast key.
        info!("last admin pairing removed, clearing all pairings");
        store.pairing_reset();
    }

    write_state_response(response, 2)?;
    Ok(RemoveOutcome {
        removed_id: target_id,
        last_admin_removed,
    })
}

/// # Errors
///
/// Same as [`handle_add`].
pub fn handle_list<S: KeyValueStore>(body: &[u8], store: &Store<S>, response: &mut Vec<u8>) -> Result<()> {
    let mut r = hap_tlv::Reader::new(body)?;
    require_method(&mut r, Method::ListPairings)?;

    let ids = store.pairing_ids();
    let mut estimate = 8;
    for &id in &ids {
        if let Some(p) = store.pairing(id) {
            estimate += 8 + p.identifier().len() + 8 + 32 + 8 + 1 + 8;
        }
    }
    response.clear();
    response.resize(estimate, 0);
    let mut w = hap_tlv::Writer::new(response);
    w.append(tlv_type::STATE, &[2])?;
    for (i, &id) in ids.iter().enumerate() {
        let Some(p) = store.pairing(id) else { continue };
        if i > 0 {
            // A zero-length `Separator` item delimits successive
            // pairings in a List Pairings response ([HAP] Section 5.11.2).
            w.append(0xFF, &[])?;
        }
        w.append(tlv_type::IDENTIFIER, p.identifier())?;
        w.append(tlv_type::PUBLIC_KEY, p.public_key().as_bytes())?;
        let perms = if p.is_admin() { PERMISSIONS_ADMIN } else { 0 };
        w.append(tlv_type::PERMISSIONS, &[perms])?;
    }
    let len = w.len();
    response.truncate(len);
    Ok(())
}

fn require_method(r: &mut hap_tlv::Reader<'_>, expected: Method) -> Result<()> {
    let state = r.get(tlv_type::STATE).ok_or(Error::InvalidData)?;
    if state.first() != Some(&1) {
        return Err(Error::InvalidData);
    }
    let method_byte = r.get(tlv_type::METHOD).and_then(|v| v.first().copied()).ok_or(Error::InvalidData)?;
    let method = Method::try_from(method_byte)?;
    if method != expected {
        return Err(Error::InvalidData);
    }
    Ok(())
}

fn write_state_response(response: &mut Vec<u8>, state: u8) -> Result<()> {
    response.clear();
    response.resize(8, 0);
    let mut w = hap_tlv::Writer::new(response);
    w.append(tlv_type::STATE, &[state])?;
    let len = w.len();
    response.truncate(len);
    Ok(())
}

/// Builds a generic-error `{State, Error}` response for any Pairings
/// failure, mirroring Pair Setup/Pair Verify's error reporting.
#[must_use]
pub fn error_tlv(state: u8, error: TlvError) -> Vec<u8> {
    let mut buf = [0u8; 8];
    let len = error_response(&mut buf, state, error);
    buf[..len].to_vec()
}
