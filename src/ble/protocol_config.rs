//! `ProtocolConfiguration` and `CharacteristicConfiguration` BLE opcodes
//! ([HAP] Section 7.3.5.8-7.3.5.9, `spec.md` §4.C10). Unlike
//! `CharacteristicRead`/`CharacteristicWrite`, these two PDUs are engine
//! responsibilities: they read and mutate the accessory's own persisted
//! broadcast state rather than an application characteristic value.

use crate::error::{BleStatus, Result};
use crate::session::Session;
use crate::store::{CharacteristicBroadcastConfig, KeyValueStore, Store};

/// Protocol Configuration request TLV types ([HAP] Table 7-32).
mod request_tlv {
    pub const GENERATE_BROADCAST_ENCRYPTION_KEY: u8 = 0x01;
    pub const GET_ALL_PARAMS: u8 = 0x02;
    pub const SET_ACCESSORY_ADVERTISING_IDENTIFIER: u8 = 0x03;
}

/// Protocol Configuration response TLV types ([HAP] Table 7-34).
mod response_tlv {
    pub const CURRENT_STATE_NUMBER: u8 = 0x01;
    pub const CURRENT_CONFIG_NUMBER: u8 = 0x02;
    pub const ACCESSORY_ADVERTISING_IDENTIFIER: u8 = 0x03;
    pub const BROADCAST_ENCRYPTION_KEY: u8 = 0x04;
}

/// Characteristic Configuration request/response TLV types ([HAP] Tables
/// 7-39/7-40).
mod char_config_tlv {
    pub const PROPERTIES: u8 = 0x01;
    pub const BROADCAST_INTERVAL: u8 = 0x02;
}

/// Characteristic Configuration request `Properties` bit 0: enable
/// broadcast notification.
const PROPERTIES_BROADCAST_NOTIFY: u8 = 1 << 0;

/// Handles a `HAP-Protocol-Configuration-Request` ([HAP] Section
/// 7.3.5.9). Requires a secure, non-transient, admin session; the caller
/// is expected to have already checked the owning service supports
/// configuration.
pub fn handle_protocol_configuration<S: KeyValueStore>(
    session: &Session,
    store: &mut Store<S>,
    body: &[u8],
) -> Result<(BleStatus, Vec<u8>)> {
    if session.is_transient() || !session.is_secured(store) || !session.controller_is_admin(store) {
        return Ok((BleStatus::UnsupportedPdu, Vec::new()));
    }

    let mut r = match hap_tlv::Reader::new(body) {
        Ok(r) => r,
        Err(_) => return Ok((BleStatus::InvalidRequest, Vec::new())),
    };

    let generate_key = r.get(request_tlv::GENERATE_BROADCAST_ENCRYPTION_KEY).is_some();
    let get_all = r.get(request_tlv::GET_ALL_PARAMS).is_some();
    let advertising_id = r
        .get(request_tlv::SET_ACCESSORY_ADVERTISING_IDENTIFIER)
        .map(|v| <[u8; 6]>::try_from(v.as_slice()));

    if matches!(advertising_id, Some(Err(_))) {
        return Ok((BleStatus::InvalidRequest, Vec::new()));
    }
    let advertising_id = advertising_id.and_then(Result::ok);

    if generate_key {
        let mut params = store.broadcast_params();
        params.key = hap_crypto::random_broadcast_key();
        params.key_expiration_gsn = crate::store::key_expiration_gsn(store.gsn());
        if let Some(id) = advertising_id {
            params.advertising_id = Some(id);
        }
        store.set_broadcast_params(&params);
    } else if let Some(id) = advertising_id {
        let mut params = store.broadcast_params();
        params.advertising_id = Some(id);
        store.set_broadcast_params(&params);
    }

    if !get_all {
        return Ok((BleStatus::Success, Vec::new()));
    }

    let mut response = vec![0u8; 64];
    let gsn = store.gsn();
    let cn = store.configuration_number();
    let params = store.broadcast_params();
    let device_id = store.device_id().unwrap_or_default();
    let advertising_id = params.advertising_id.unwrap_or(device_id);

    let mut w = hap_tlv::Writer::new(&mut response);
    w.append(response_tlv::CURRENT_STATE_NUMBER, &gsn.value().to_le_bytes())?;
    let wrapped_cn = super::advertiser::wrapped_config_number(cn);
    w.append(response_tlv::CURRENT_CONFIG_NUMBER, &[wrapped_cn])?;
    w.append(response_tlv::ACCESSORY_ADVERTISING_IDENTIFIER, &advertising_id)?;
    if params.is_active() {
        w.append(response_tlv::BROADCAST_ENCRYPTION_KEY, &params.key)?;
    }
    let len = w.len();
    response.truncate(len);
    Ok((BleStatus::Success, response))
}

/// Handles a `HAP-Characteristic-Configuration-Request` ([HAP] Section
/// 7.3.5.8): enables or disables broadcast notification for the
/// characteristic bound to this procedure, with a persisted interval.
/// Requires a secure, non-transient session.
pub fn handle_characteristic_configuration<S: KeyValueStore>(
    session: &Session,
    store: &mut Store<S>,
    iid: u64,
    body: &[u8],
) -> Result<(BleStatus, Vec<u8>)> {
    if session.is_transient() || !session.is_secured(store) {
        return Ok((BleStatus::UnsupportedPdu, Vec::new()));
    }

    let mut r = match hap_tlv::Reader::new(body) {
        Ok(r) => r,
        Err(_) => return Ok((BleStatus::InvalidRequest, Vec::new())),
    };

    let mut config = store.characteristic_broadcast_config(iid);
    if let Some(props) = r.get(char_config_tlv::PROPERTIES).and_then(|v| v.first().copied()) {
        config.enabled = props & PROPERTIES_BROADCAST_NOTIFY != 0;
    }
    if let Some(interval) = r.get(char_config_tlv::BROADCAST_INTERVAL).and_then(|v| v.first().copied()) {
        config.interval = interval;
    }
    if store.set_characteristic_broadcast_config(iid, config).is_err() {
        return Ok((BleStatus::InvalidRequest, Vec::new()));
    }

    let mut response = vec![0u8; 8];
    let mut w = hap_tlv::Writer::new(&mut response);
    let props = if config.enabled { PROPERTIES_BROADCAST_NOTIFY } else { 0 };
    w.append(char_config_tlv::PROPERTIES, &[props])?;
    w.append(char_config_tlv::BROADCAST_INTERVAL, &[config.interval])?;
    let len = w.len();
    response.truncate(len);
    Ok((BleStatus::Success, response))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::session::Transport;
    use crate::store::{Domain, PairingRecord};

    #[derive(Debug, Default)]
    struct MemStore(HashMap<(u8, u8), Vec<u8>>);

    impl KeyValueStore for MemStore {
        fn get(&self, domain: Domain, key: u8) -> Option<Vec<u8>> {
            self.0.get(&(domain as u8, key)).cloned()
        }
        fn set(&mut self, domain: Domain, key: u8, value: &[u8]) {
            self.0.insert((domain as u8, key), value.to_vec());
        }
        fn remove(&mut self, domain: Domain, key: u8) {
            self.0.remove(&(domain as u8, key));
        }
        fn keys(&self, domain: Domain) -> Vec<u8> {
            self.0.keys().filter(|(d, _)| *d == domain as u8).map(|(_, k)| *k).collect()
        }
    }

    fn dummy_cv_key() -> hap_crypto::SharedSecret {
        let a = hap_crypto::Curve25519KeyPair::generate();
        let b = hap_crypto::Curve25519KeyPair::generate();
        a.diffie_hellman(&b.public_key())
    }

    fn secure_session(pairing_id: Option<u8>, is_transient: bool) -> Session {
        let mut session = Session::create(Transport::Ble(Default::default()));
        session.secure(
            pairing_id,
            is_transient,
            dummy_cv_key(),
            hap_crypto::ControlChannelKey::new([0u8; 32]),
            hap_crypto::ControlChannelKey::new([1u8; 32]),
        );
        session
    }

    fn secured_admin_session(store: &mut Store<MemStore>) -> Session {
        let pk = hap_crypto::Ed25519PublicKey([1u8; 32]);
        store.set_pairing(0, &PairingRecord::new(b"ctrl", pk, true));
        secure_session(Some(0), false)
    }

    #[test]
    fn non_admin_session_is_rejected() {
        let mut store = Store::new(MemStore::default());
        let pk = hap_crypto::Ed25519PublicKey([2u8; 32]);
        store.set_pairing(0, &PairingRecord::new(b"ctrl", pk, false));
        let session = secure_session(Some(0), false);

        let (status, body) = handle_protocol_configuration(&session, &mut store, &[]).unwrap();
        assert_eq!(status, BleStatus::UnsupportedPdu);
        assert!(body.is_empty());
    }

    #[test]
    fn generate_key_persists_an_active_broadcast_key() {
        let mut store = Store::new(MemStore::default());
        let session = secured_admin_session(&mut store);
        let mut body = [0u8; 8];
        let mut w = hap_tlv::Writer::new(&mut body);
        w.append(request_tlv::GENERATE_BROADCAST_ENCRYPTION_KEY, &[]).unwrap();
        let len = w.len();

        let (status, _) = handle_protocol_configuration(&session, &mut store, &body[..len]).unwrap();
        assert_eq!(status, BleStatus::Success);
        assert!(store.broadcast_params().is_active());
    }

    #[test]
    fn get_all_params_reports_current_state_and_config_number() {
        let mut store = Store::new(MemStore::default());
        let session = secured_admin_session(&mut store);
        let mut body = [0u8; 8];
        let mut w = hap_tlv::Writer::new(&mut body);
        w.append(request_tlv::GET_ALL_PARAMS, &[]).unwrap();
        let len = w.len();

        let (status, resp) = handle_protocol_configuration(&session, &mut store, &body[..len]).unwrap();
        assert_eq!(status, BleStatus::Success);
        let mut r = hap_tlv::Reader::new(&resp).unwrap();
        assert!(r.get(response_tlv::CURRENT_STATE_NUMBER).is_some());
        assert!(r.get(response_tlv::CURRENT_CONFIG_NUMBER).is_some());
        assert!(r.get(response_tlv::ACCESSORY_ADVERTISING_IDENTIFIER).is_some());
    }

    #[test]
    fn characteristic_configuration_enables_broadcast_and_echoes_interval() {
        let mut store = Store::new(MemStore::default());
        let session = secured_admin_session(&mut store);
        let mut body = [0u8; 8];
        let mut w = hap_tlv::Writer::new(&mut body);
        w.append(char_config_tlv::PROPERTIES, &[PROPERTIES_BROADCAST_NOTIFY]).unwrap();
        w.append(char_config_tlv::BROADCAST_INTERVAL, &[2]).unwrap();
        let len = w.len();

        let (status, resp) = handle_characteristic_configuration(&session, &mut store, 9, &body[..len]).unwrap();
        assert_eq!(status, BleStatus::Success);
        let config = store.characteristic_broadcast_config(9);
        assert!(config.enabled);
        assert_eq!(config.interval, 2);
        let mut r = hap_tlv::Reader::new(&resp).unwrap();
        assert_eq!(r.get(char_config_tlv::PROPERTIES).unwrap(), vec![PROPERTIES_BROADCAST_NOTIFY]);
    }

    #[test]
    fn transient_session_is_rejected_for_characteristic_configuration() {
        let mut store = Store::new(MemStore::default());
        let session = secure_session(None, true);
        let (status, body) = handle_characteristic_configuration(&session, &mut store, 9, &[]).unwrap();
        assert_eq!(status, BleStatus::UnsupportedPdu);
        assert!(body.is_empty());
    }
}
