//! Persistent pairing store ([HAP] Section `HAP+KeyValueStoreDomains.h`,
//! `spec.md` §4.C3 and §6).
//!
//! The engine never touches a filesystem or database directly; it consumes
//! the narrow typed `(domain, key) -> bytes` [`KeyValueStore`] trait (§6)
//! and layers the HAP-specific record formats (pairing records, GSN,
//! broadcast parameters, ...) on top.

use hap_crypto::Ed25519PublicKey;

use crate::error::{Error, Result};

/// Key-value store domains ([HAP] `HAP+KeyValueStoreDomains.h`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Domain {
    /// Manufacturing-provisioned data; never purged by a reset.
    Provisioning = 0x80,
    /// Runtime configuration; cleared on factory reset.
    Configuration = 0x90,
    /// Per-characteristic broadcast/event configuration; cleared on
    /// factory reset.
    CharacteristicConfiguration = 0x92,
    /// Controller pairings; cleared on factory reset or pairing reset.
    Pairings = 0xA0,
}

/// Keys within [`Domain::Configuration`] the core reads and writes.
pub mod config_key {
    pub const DEVICE_ID: u8 = 0x00;
    pub const FIRMWARE_VERSION: u8 = 0x10;
    pub const CONFIGURATION_NUMBER: u8 = 0x20;
    pub const LTSK: u8 = 0x21;
    pub const UNSUCCESSFUL_AUTH_ATTEMPTS: u8 = 0x22;
    pub const BLE_GSN: u8 = 0x40;
    pub const BLE_BROADCAST_PARAMETERS: u8 = 0x41;
}

/// The narrow persistence interface the core requires (§6). Implementors
/// own the actual storage medium (flash key-value region, file, ...);
/// every write here is required by `spec.md` §5 to be individually
/// atomic and never interleaved with another write to the same key across
/// a suspension point.
pub trait KeyValueStore: std::fmt::Debug {
    fn get(&self, domain: Domain, key: u8) -> Option<Vec<u8>>;
    fn set(&mut self, domain: Domain, key: u8, value: &[u8]);
    fn remove(&mut self, domain: Domain, key: u8);
    /// Lists the keys currently present in `domain`, for enumerating
    /// pairings.
    fn keys(&self, domain: Domain) -> Vec<u8>;
    /// Removes every key in `domain`.
    fn purge_domain(&mut self, domain: Domain) {
        for key in self.keys(domain) {
            self.remove(domain, key);
        }
    }
}

/// 70-byte on-disk pairing record ([HAP] Section 5.1, `spec.md` §3).
#[derive(Clone, Eq, PartialEq)]
pub struct PairingRecord {
    identifier: [u8; 36],
    identifier_len: u8,
    public_key: [u8; 32],
    permissions: u8,
}

/// Permission bitmap bit 0: the controller is an admin.
const PERM_ADMIN: u8 = 1 << 0;

pub const PAIRING_RECORD_LEN: usize = 70;

impl PairingRecord {
    /// # Panics
    ///
    /// Panics if `identifier` is longer than 36 bytes; the identifier
    /// space (HAP pairing identifiers) never exceeds that in practice and
    /// callers at the pairing engine boundary already validate it.
    #[must_use]
    pub fn new(identifier: &[u8], public_key: Ed25519PublicKey, is_admin: bool) -> Self {
        assert!(identifier.len() <= 36, "pairing identifier too long");
        let mut id = [0u8; 36];
        id[..identifier.len()].copy_from_slice(identifier);
        Self {
            identifier: id,
            identifier_len: identifier.len() as u8,
            public_key: *public_key.as_bytes(),
            permissions: if is_admin { PERM_ADMIN } else { 0 },
        }
    }

    #[must_use]
    pub fn identifier(&self) -> &[u8] {
        &self.identifier[..self.identifier_len as usize]
    }

    #[must_use]
    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.public_key)
    }

    #[must_use]
    pub const fn is_admin(&self) -> bool {
        self.permissions & PERM_ADMIN != 0
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; PAIRING_RECORD_LEN] {
        let mut out = [0u8; PAIRING_RECORD_LEN];
        out[..36].copy_from_slice(&self.identifier);
        out[36] = self.identifier_len;
        out[37..69].copy_from_slice(&self.public_key);
        out[69] = self.permissions;
        out
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] if `bytes` is not exactly
    /// [`PAIRING_RECORD_LEN`] long or the encoded identifier length
    /// exceeds 36.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PAIRING_RECORD_LEN {
            return Err(Error::InvalidData);
        }
        let identifier_len = bytes[36];
        if identifier_len > 36 {
            return Err(Error::InvalidData);
        }
        let mut identifier = [0u8; 36];
        identifier.copy_from_slice(&bytes[..36]);
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&bytes[37..69]);
        Ok(Self {
            identifier,
            identifier_len,
            public_key,
            permissions: bytes[69],
        })
    }
}

impl std::fmt::Debug for PairingRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingRecord")
            .field("identifier_len", &self.identifier_len)
            .field("is_admin", &self.is_admin())
            .finish_non_exhaustive()
    }
}

/// BLE Global State Number ([HAP] Section 7.4.2.2, `spec.md` §3/§4.C11).
/// Starts at 1, never takes the value 0, wraps `0xFFFF -> 1`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Gsn {
    value: u16,
    did_increment: bool,
}

impl Gsn {
    #[must_use]
    pub const fn new(value: u16, did_increment: bool) -> Self {
        Self {
            value: if value == 0 { 1 } else { value },
            did_increment,
        }
    }

    #[must_use]
    pub const fn value(self) -> u16 {
        self.value
    }

    #[must_use]
    pub const fn did_increment(self) -> bool {
        self.did_increment
    }

    /// Advances the GSN by one, wrapping `0xFFFF` to `1` (never `0`).
    #[must_use]
    pub const fn incremented(self) -> Self {
        let next = if self.value == 0xFFFF { 1 } else { self.value + 1 };
        Self {
            value: next,
            did_increment: true,
        }
    }

    /// Clears the per-cycle increment flag (called when a new
    /// connect/disconnect cycle starts).
    #[must_use]
    pub const fn cycle_reset(self) -> Self {
        Self {
            value: self.value,
            did_increment: false,
        }
    }

    pub fn to_bytes(self) -> [u8; 3] {
        let mut out = [0u8; 3];
        out[..2].copy_from_slice(&self.value.to_le_bytes());
        out[2] = u8::from(self.did_increment);
        out
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] if `bytes` is not exactly 3 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let [lo, hi, flag] = <[u8; 3]>::try_from(bytes).map_err(|_| Error::InvalidData)?;
        Ok(Self::new(u16::from_le_bytes([lo, hi]), flag != 0))
    }
}

impl Default for Gsn {
    fn default() -> Self {
        Self::new(1, false)
    }
}

/// Computes the GSN value at which a freshly generated broadcast key
/// expires.
///
/// `spec.md` §9 flags this exact arithmetic as an open question: the
/// original's comment cites `2^15 - 1 = 32767` but its code computes
/// `currentGSN + 32766`. We follow the code (the interoperability-visible
/// behavior), not the comment, and record the decision in `DESIGN.md`.
#[must_use]
pub fn key_expiration_gsn(current: Gsn) -> u16 {
    let mut v = (u32::from(current.value()) + 32766) % 0xFFFF;
    if v == 0 {
        v = 1;
    }
    v as u16
}

/// BLE broadcast encryption parameters ([HAP] Section 7.4.2.3,
/// `spec.md` §3).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BroadcastParams {
    /// `0` means no broadcast key is configured.
    pub key_expiration_gsn: u16,
    pub key: [u8; 32],
    pub advertising_id: Option<[u8; 6]>,
}

impl BroadcastParams {
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.key_expiration_gsn != 0
    }

    pub fn to_bytes(&self) -> [u8; 41] {
        let mut out = [0u8; 41];
        out[..2].copy_from_slice(&self.key_expiration_gsn.to_le_bytes());
        out[2..34].copy_from_slice(&self.key);
        out[34] = u8::from(self.advertising_id.is_some());
        if let Some(id) = self.advertising_id {
            out[35..41].copy_from_slice(&id);
        }
        out
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] if `bytes` is not exactly 41 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 41 {
            return Err(Error::InvalidData);
        }
        let key_expiration_gsn = u16::from_le_bytes([bytes[0], bytes[1]]);
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes[2..34]);
        let advertising_id = (bytes[34] != 0).then(|| {
            let mut id = [0u8; 6];
            id.copy_from_slice(&bytes[35..41]);
            id
        });
        Ok(Self {
            key_expiration_gsn,
            key,
            advertising_id,
        })
    }
}

/// Per-characteristic broadcast-notification configuration ([HAP] Section
/// 7.3.5.8, `spec.md` §4.C10), stored under
/// [`Domain::CharacteristicConfiguration`] keyed by the characteristic's
/// instance id truncated to a byte — this store's key space is one byte
/// per domain, same as every other table here.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CharacteristicBroadcastConfig {
    pub enabled: bool,
    /// Broadcast interval, encoded as the controller sent it ([HAP] Table
    /// 7-41 Characteristic Configuration Parameter Types).
    pub interval: u8,
}

impl CharacteristicBroadcastConfig {
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 2] {
        [self.enabled as u8, self.interval]
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] if `bytes` is not exactly 2 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let [enabled, interval] = <[u8; 2]>::try_from(bytes).map_err(|_| Error::InvalidData)?;
        Ok(Self { enabled: enabled != 0, interval })
    }
}

/// Typed view over a [`KeyValueStore`] implementing the HAP-specific
/// record layouts and lifecycle rules.
#[derive(Debug)]
pub struct Store<S> {
    inner: S,
}

impl<S: KeyValueStore> Store<S> {
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    #[must_use]
    pub fn device_id(&self) -> Option<[u8; 6]> {
        let v = self
            .inner
            .get(Domain::Configuration, config_key::DEVICE_ID)?;
        <[u8; 6]>::try_from(v.as_slice()).ok()
    }

    pub fn set_device_id(&mut self, id: [u8; 6]) {
        self.inner
            .set(Domain::Configuration, config_key::DEVICE_ID, &id);
    }

    #[must_use]
    pub fn configuration_number(&self) -> u32 {
        self.inner
            .get(Domain::Configuration, config_key::CONFIGURATION_NUMBER)
            .and_then(|v| <[u8; 4]>::try_from(v.as_slice()).ok())
            .map_or(1, u32::from_le_bytes)
    }

    /// Bumps the Configuration Number, as required whenever the attribute
    /// schema changes.
    pub fn increment_configuration_number(&mut self) -> u32 {
        let next = self.configuration_number().wrapping_add(1).max(1);
        self.inner.set(
            Domain::Configuration,
            config_key::CONFIGURATION_NUMBER,
            &next.to_le_bytes(),
        );
        next
    }

    #[must_use]
    pub fn ltsk_seed(&self) -> Option<[u8; 32]> {
        let v = self.inner.get(Domain::Configuration, config_key::LTSK)?;
        <[u8; 32]>::try_from(v.as_slice()).ok()
    }

    pub fn set_ltsk_seed(&mut self, seed: [u8; 32]) {
        self.inner
            .set(Domain::Configuration, config_key::LTSK, &seed);
    }

    #[must_use]
    pub fn unsuccessful_auth_attempts(&self) -> u8 {
        self.inner
            .get(Domain::Configuration, config_key::UNSUCCESSFUL_AUTH_ATTEMPTS)
            .and_then(|v| v.first().copied())
            .unwrap_or(0)
    }

    pub fn increment_unsuccessful_auth_attempts(&mut self) -> u8 {
        let next = self.unsuccessful_auth_attempts().saturating_add(1);
        self.inner.set(
            Domain::Configuration,
            config_key::UNSUCCESSFUL_AUTH_ATTEMPTS,
            &[next],
        );
        next
    }

    pub fn clear_unsuccessful_auth_attempts(&mut self) {
        self.inner
            .remove(Domain::Configuration, config_key::UNSUCCESSFUL_AUTH_ATTEMPTS);
    }

    #[must_use]
    pub fn gsn(&self) -> Gsn {
        self.inner
            .get(Domain::Configuration, config_key::BLE_GSN)
            .and_then(|v| Gsn::from_bytes(&v).ok())
            .unwrap_or_default()
    }

    pub fn set_gsn(&mut self, gsn: Gsn) {
        self.inner
            .set(Domain::Configuration, config_key::BLE_GSN, &gsn.to_bytes());
    }

    #[must_use]
    pub fn broadcast_params(&self) -> BroadcastParams {
        self.inner
            .get(Domain::Configuration, config_key::BLE_BROADCAST_PARAMETERS)
            .and_then(|v| BroadcastParams::from_bytes(&v).ok())
            .unwrap_or_default()
    }

    pub fn set_broadcast_params(&mut self, params: &BroadcastParams) {
        self.inner.set(
            Domain::Configuration,
            config_key::BLE_BROADCAST_PARAMETERS,
            &params.to_bytes(),
        );
    }

    /// Expires the broadcast key: zeroes it and clears the expiration GSN.
    pub fn expire_broadcast_key(&mut self) {
        self.set_broadcast_params(&BroadcastParams::default());
    }

    #[must_use]
    pub fn characteristic_broadcast_config(&self, iid: u64) -> CharacteristicBroadcastConfig {
        let Ok(key) = u8::try_from(iid) else {
            return CharacteristicBroadcastConfig::default();
        };
        self.inner
            .get(Domain::CharacteristicConfiguration, key)
            .and_then(|v| CharacteristicBroadcastConfig::from_bytes(&v).ok())
            .unwrap_or_default()
    }

    /// # Errors
    ///
    /// Returns [`Error::OutOfResources`] if `iid` does not fit this store's
    /// single-byte per-domain key space.
    pub fn set_characteristic_broadcast_config(&mut self, iid: u64, config: CharacteristicBroadcastConfig) -> Result<()> {
        let key = u8::try_from(iid).map_err(|_| Error::OutOfResources)?;
        self.inner.set(Domain::CharacteristicConfiguration, key, &config.to_bytes());
        Ok(())
    }

    #[must_use]
    pub fn pairing(&self, id: u8) -> Option<PairingRecord> {
        let bytes = self.inner.get(Domain::Pairings, id)?;
        PairingRecord::from_bytes(&bytes).ok()
    }

    pub fn set_pairing(&mut self, id: u8, record: &PairingRecord) {
        self.inner.set(Domain::Pairings, id, &record.to_bytes());
    }

    pub fn remove_pairing(&mut self, id: u8) {
        self.inner.remove(Domain::Pairings, id);
    }

    #[must_use]
    pub fn pairing_ids(&self) -> Vec<u8> {
        let mut ids = self.inner.keys(Domain::Pairings);
        ids.sort_unstable();
        ids
    }

    /// Finds the first free pairing-store key, `0..=255`.
    #[must_use]
    pub fn next_pairing_id(&self) -> Option<u8> {
        let used = self.pairing_ids();
        (0..=u8::MAX).find(|id| !used.contains(id))
    }

    #[must_use]
    pub fn is_paired(&self) -> bool {
        !self.pairing_ids().is_empty()
    }

    #[must_use]
    pub fn admin_pairing_count(&self) -> usize {
        self.pairing_ids()
            .iter()
            .filter_map(|&id| self.pairing(id))
            .filter(PairingRecord::is_admin)
            .count()
    }

    /// Clears `Configuration`, `CharacteristicConfiguration`, and
    /// `Pairings`, leaving `Provisioning` intact ([HAP] factory reset,
    /// `spec.md` §7).
    pub fn factory_reset(&mut self) {
        self.inner.purge_domain(Domain::Configuration);
        self.inner
            .purge_domain(Domain::CharacteristicConfiguration);
        self.inner.purge_domain(Domain::Pairings);
    }

    /// Clears only `Pairings` and expires the broadcast key.
    pub fn pairing_reset(&mut self) {
        self.inner.purge_domain(Domain::Pairings);
        self.expire_broadcast_key();
    }

    /// Imports a legacy Device ID. Fails if one is already present
    /// ([HAP] `HAPLegacyImport.c`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if a Device ID is already stored.
    pub fn import_device_id(&mut self, id: [u8; 6]) -> Result<()> {
        if self.device_id().is_some() {
            return Err(Error::InvalidState);
        }
        self.set_device_id(id);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if a Configuration Number is
    /// already stored.
    pub fn import_configuration_number(&mut self, cn: u32) -> Result<()> {
        if self
            .inner
            .get(Domain::Configuration, config_key::CONFIGURATION_NUMBER)
            .is_some()
        {
            return Err(Error::InvalidState);
        }
        self.inner.set(
            Domain::Configuration,
            config_key::CONFIGURATION_NUMBER,
            &cn.to_le_bytes(),
        );
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if an LTSK is already stored.
    pub fn import_ltsk(&mut self, seed: [u8; 32]) -> Result<()> {
        if self.ltsk_seed().is_some() {
            return Err(Error::InvalidState);
        }
        self.set_ltsk_seed(seed);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if a counter is already stored.
    pub fn import_unsuccessful_auth_attempts(&mut self, count: u8) -> Result<()> {
        if self
            .inner
            .get(Domain::Configuration, config_key::UNSUCCESSFUL_AUTH_ATTEMPTS)
            .is_some()
        {
            return Err(Error::InvalidState);
        }
        self.inner.set(
            Domain::Configuration,
            config_key::UNSUCCESSFUL_AUTH_ATTEMPTS,
            &[count],
        );
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if a pairing record already exists
    /// at `id`.
    pub fn import_pairing(&mut self, id: u8, record: &PairingRecord) -> Result<()> {
        if self.pairing(id).is_some() {
            return Err(Error::InvalidState);
        }
        self.set_pairing(id, record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

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
            self.0
                .keys()
                .filter(|(d, _)| *d == domain as u8)
                .map(|(_, k)| *k)
                .collect()
        }
    }

    #[test]
    fn gsn_wraps_and_never_returns_zero() {
        let gsn = Gsn::new(0xFFFF, false);
        assert_eq!(gsn.incremented().value(), 1);
        assert_ne!(Gsn::new(0, false).value(), 0);
    }

    #[test]
    fn factory_reset_keeps_provisioning_clears_rest() {
        let mut store = Store::new(MemStore::default());
        store.inner_mut().set(Domain::Provisioning, 0x01, b"serial");
        store.set_device_id([1, 2, 3, 4, 5, 6]);
        let pk = Ed25519PublicKey([7u8; 32]);
        store.set_pairing(0, &PairingRecord::new(b"ctrl", pk, true));
        store.factory_reset();
        assert!(store.inner().get(Domain::Provisioning, 0x01).is_some());
        assert!(store.device_id().is_none());
        assert!(store.pairing(0).is_none());
    }

    #[test]
    fn pairing_reset_only_clears_pairings_and_expires_key() {
        let mut store = Store::new(MemStore::default());
        store.set_broadcast_params(&BroadcastParams {
            key_expiration_gsn: 100,
            key: [9u8; 32],
            advertising_id: None,
        });
        let pk = Ed25519PublicKey([1u8; 32]);
        store.set_pairing(0, &PairingRecord::new(b"ctrl", pk, true));
        store.pairing_reset();
        assert!(store.pairing(0).is_none());
        assert!(!store.broadcast_params().is_active());
    }

    #[test]
    fn legacy_import_rejects_duplicate_device_id() {
        let mut store = Store::new(MemStore::default());
        store.import_device_id([1; 6]).unwrap();
        assert_eq!(store.import_device_id([2; 6]), Err(Error::InvalidState));
    }

    #[test]
    fn pairing_record_round_trips_through_bytes() {
        let pk = Ed25519PublicKey([0xAB; 32]);
        let rec = PairingRecord::new(b"controller-1", pk, true);
        let bytes = rec.to_bytes();
        assert_eq!(bytes.len(), PAIRING_RECORD_LEN);
        let back = PairingRecord::from_bytes(&bytes).unwrap();
        assert_eq!(back.identifier(), b"controller-1");
        assert!(back.is_admin());
    }

    #[test]
    fn characteristic_broadcast_config_round_trips_and_defaults_when_absent() {
        let mut store = Store::new(MemStore::default());
        assert_eq!(store.characteristic_broadcast_config(9), CharacteristicBroadcastConfig::default());
        store
            .set_characteristic_broadcast_config(9, CharacteristicBroadcastConfig { enabled: true, interval: 2 })
            .unwrap();
        assert_eq!(
            store.characteristic_broadcast_config(9),
            CharacteristicBroadcastConfig { enabled: true, interval: 2 }
        );
    }

    #[test]
    fn characteristic_broadcast_config_rejects_iid_outside_byte_key_space() {
        let mut store = Store::new(MemStore::default());
        assert_eq!(
            store.set_characteristic_broadcast_config(300, CharacteristicBroadcastConfig::default()),
            Err(Error::OutOfResources)
        );
    }
}
