//! Accessory server lifecycle ([HAP] `HAPAccessoryServer.c`, `spec.md`
//! §4.C14).

use std::time::Instant;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::event::BroadcastOverride;
use crate::platform::{BlePeripheralManager, BonjourPublisher, TxtRecords};
use crate::session::{Session, Transport};
use crate::setup::{Mode, SetupInfoManager};
use crate::store::{KeyValueStore, Store};

/// Server lifecycle states (`spec.md` §4.C14).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Idle,
    Running,
    /// Orderly shutdown in progress: sessions invalidated, waiting on
    /// any BLE safe-to-disconnect timers before returning to `Idle`.
    Stopping,
}

/// Static accessory configuration passed into [`AccessoryServer::new`],
/// analogous to a builder struct taking configuration explicitly rather
/// than reading globals.
#[derive(Clone, Debug)]
pub struct Config {
    pub category: u8,
    pub device_name: String,
    pub model: String,
    pub manufacturer: String,
    pub serial_number: String,
    pub firmware_version: String,
    pub supports_ip: bool,
    pub supports_ble: bool,
}

impl Config {
    fn transport_flags(&self) -> u8 {
        let mut flags = 0;
        if self.supports_ip {
            flags |= crate::setup::flags::IP;
        }
        if self.supports_ble {
            flags |= crate::setup::flags::BLE;
        }
        flags
    }
}

/// One process-wide accessory server instance ([HAP] Section 1,
/// `spec.md` §9 "Global mutable state": intentionally a singleton, but
/// passed explicitly to every caller for testability rather than
/// reached for as ambient global state).
#[derive(Debug)]
pub struct AccessoryServer<S: KeyValueStore> {
    state: State,
    store: Store<S>,
    config: Config,
    setup_info: Option<SetupInfoManager>,
    broadcast_override: BroadcastOverride,
    was_paired: bool,
}

impl<S: KeyValueStore> AccessoryServer<S> {
    #[must_use]
    pub fn new(store: Store<S>, config: Config, setup_info: Option<SetupInfoManager>) -> Self {
        let was_paired = store.is_paired();
        Self {
            state: State::Idle,
            store,
            config,
            setup_info,
            broadcast_override: BroadcastOverride::default(),
            was_paired,
        }
    }

    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub fn is_paired(&self) -> bool {
        self.store.is_paired()
    }

    #[must_use]
    pub const fn store(&self) -> &Store<S> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store<S> {
        &mut self.store
    }

    #[must_use]
    pub const fn broadcast_override(&self) -> &BroadcastOverride {
        &self.broadcast_override
    }

    pub fn broadcast_override_mut(&mut self) -> &mut BroadcastOverride {
        &mut self.broadcast_override
    }

    #[must_use]
    pub fn setup_info(&self) -> Option<&SetupInfoManager> {
        self.setup_info.as_ref()
    }

    pub fn setup_info_mut(&mut self) -> Option<&mut SetupInfoManager> {
        self.setup_info.as_mut()
    }

    /// Starts the server: loads or generates the LTSK, validates the
    /// store, arms dynamic setup-code generation, opens the configured
    /// transports, and publishes service discovery.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the server is not [`State::Idle`]
    /// or the pairing store has not been provisioned with a Device ID.
    /// Propagates a platform failure from `bonjour`/`ble`.
    pub fn start<B: BlePeripheralManager, D: BonjourPublisher>(
        &mut self,
        now: Instant,
        mut ble: Option<&mut B>,
        mut bonjour: Option<&mut D>,
    ) -> Result<()> {
        if self.state != State::Idle {
            return Err(Error::InvalidState);
        }
        if self.store.device_id().is_none() {
            return Err(Error::InvalidState);
        }
        self.ensure_ltsk();

        if let Some(mgr) = &mut self.setup_info {
            if matches!(mgr.mode(), Mode::Display | Mode::DisplayAndNfc) {
                mgr.arm_refresh(now);
            }
        }

        if let Some(d) = bonjour.as_deref_mut() {
            d.publish("_hap._tcp", 0, &self.txt_records())?;
        }
        if let Some(b) = ble.as_deref_mut() {
            b.advertise(crate::ble::advertiser::FAST_INITIAL, &[], &[])?;
        }

        self.state = State::Running;
        info!(category = self.config.category, "accessory server started");
        self.on_updated_state();
        Ok(())
    }

    /// Requests orderly shutdown: invalidates every session and stops
    /// BLE advertising. The server stays [`State::Stopping`] until
    /// [`Self::finish_stop`] confirms every BLE session's
    /// safe-to-disconnect timer has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the server is not
    /// [`State::Running`]. Propagates a platform failure from `ble`.
    pub fn stop<B: BlePeripheralManager>(&mut self, sessions: &mut [Session], mut ble: Option<&mut B>) -> Result<()> {
        if self.state != State::Running {
            return Err(Error::InvalidState);
        }
        self.state = State::Stopping;
        for session in sessions.iter_mut() {
            session.invalidate(true);
        }
        if let Some(b) = ble.as_deref_mut() {
            b.stop_advertising()?;
        }
        debug!("accessory server stopping, waiting on safe-to-disconnect timers");
        Ok(())
    }

    /// True once no session still has a pending BLE safe-to-disconnect
    /// deadline, i.e. [`Self::finish_stop`] may be called.
    #[must_use]
    pub fn shutdown_complete(sessions: &[Session], now: Instant) -> bool {
        sessions.iter().all(|s| match s.transport() {
            Transport::Ble(ble) => ble.timers.safe_to_disconnect_deadline.map_or(true, |d| now >= d),
            Transport::Ip(_) => true,
        })
    }

    /// Completes a shutdown begun with [`Self::stop`], returning to
    /// [`State::Idle`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the server is not
    /// [`State::Stopping`].
    pub fn finish_stop(&mut self) -> Result<()> {
        if self.state != State::Stopping {
            return Err(Error::InvalidState);
        }
        self.state = State::Idle;
        info!("accessory server stopped");
        self.on_updated_state();
        Ok(())
    }

    /// Bumps the Configuration Number, required whenever the attribute
    /// database schema changes.
    pub fn bump_configuration_number(&mut self) -> u32 {
        let next = self.store.increment_configuration_number();
        self.on_updated_state();
        next
    }

    fn ensure_ltsk(&mut self) {
        if self.store.ltsk_seed().is_none() {
            let pair = hap_crypto::Ed25519KeyPair::generate();
            self.store.set_ltsk_seed(pair.seed());
            debug!("generated a new accessory long-term key pair");
        }
    }

    fn txt_records(&self) -> TxtRecords {
        TxtRecords {
            model: self.config.model.clone(),
            protocol_version: "1.1".to_string(),
            device_id: self
                .store
                .device_id()
                .map(|id| {
                    id.iter()
                        .map(|b| format!("{b:02X}"))
                        .collect::<Vec<_>>()
                        .join(":")
                })
                .unwrap_or_default(),
            configuration_number: self.store.configuration_number(),
            state_number: 1,
            feature_flags: 0,
            category: self.config.category,
            status_flags: u8::from(!self.store.is_paired()),
            setup_hash: None,
        }
    }

    /// Invokes the `handleUpdatedState` callback whenever `state` or
    /// paired-ness has changed since construction/the last call ([HAP]
    /// Section 1, `spec.md` §4.C14).
    fn on_updated_state(&mut self) {
        let now_paired = self.store.is_paired();
        if now_paired != self.was_paired {
            self.was_paired = now_paired;
        }
        debug!(state = ?self.state, paired = now_paired, "server state updated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{BleConnection, TxtRecords as Txt};
    use std::collections::HashMap;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct MemStore(HashMap<(u8, u8), Vec<u8>>);

    impl KeyValueStore for MemStore {
        fn get(&self, domain: crate::store::Domain, key: u8) -> Option<Vec<u8>> {
            self.0.get(&(domain as u8, key)).cloned()
        }
        fn set(&mut self, domain: crate::store::Domain, key: u8, value: &[u8]) {
            self.0.insert((domain as u8, key), value.to_vec());
        }
        fn remove(&mut self, domain: crate::store::Domain, key: u8) {
            self.0.remove(&(domain as u8, key));
        }
        fn keys(&self, domain: crate::store::Domain) -> Vec<u8> {
            self.0.keys().filter(|(d, _)| *d == domain as u8).map(|(_, k)| *k).collect()
        }
    }

    #[derive(Debug, Default)]
    struct NoopBle;
    impl BlePeripheralManager for NoopBle {
        fn advertise(&mut self, _interval: Duration, _adv_data: &[u8], _scan_response: &[u8]) -> Result<()> {
            Ok(())
        }
        fn stop_advertising(&mut self) -> Result<()> {
            Ok(())
        }
        fn send_indication(&mut self, _connection: BleConnection, _characteristic_iid: u64) -> Result<()> {
            Ok(())
        }
        fn disconnect(&mut self, _connection: BleConnection) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct NoopBonjour;
    impl BonjourPublisher for NoopBonjour {
        fn publish(&mut self, _service: &str, _port: u16, _txt: &Txt) -> Result<()> {
            Ok(())
        }
        fn update_txt(&mut self, _txt: &Txt) -> Result<()> {
            Ok(())
        }
        fn unpublish(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn test_config() -> Config {
        Config {
            category: 5,
            device_name: "Test Lock".to_string(),
            model: "Acme1,1".to_string(),
            manufacturer: "Acme".to_string(),
            serial_number: "0001".to_string(),
            firmware_version: "1.0".to_string(),
            supports_ip: true,
            supports_ble: false,
        }
    }

    #[test]
    fn start_requires_a_provisioned_device_id() {
        let store = Store::new(MemStore::default());
        let mut server = AccessoryServer::new(store, test_config(), None);
        let now = Instant::now();
        let result = server.start::<NoopBle, NoopBonjour>(now, None, None);
        assert_eq!(result, Err(Error::InvalidState));
        assert_eq!(server.state(), State::Idle);
    }

    #[test]
    fn start_generates_ltsk_and_transitions_to_running() {
        let mut store = Store::new(MemStore::default());
        store.set_device_id([1, 2, 3, 4, 5, 6]);
        let mut server = AccessoryServer::new(store, test_config(), None);
        let now = Instant::now();
        server.start::<NoopBle, NoopBonjour>(now, None, None).unwrap();
        assert_eq!(server.state(), State::Running);
        assert!(server.store().ltsk_seed().is_some());
    }

    #[test]
    fn double_start_is_rejected() {
        let mut store = Store::new(MemStore::default());
        store.set_device_id([1, 2, 3, 4, 5, 6]);
        let mut server = AccessoryServer::new(store, test_config(), None);
        let now = Instant::now();
        server.start::<NoopBle, NoopBonjour>(now, None, None).unwrap();
        assert_eq!(server.start::<NoopBle, NoopBonjour>(now, None, None), Err(Error::InvalidState));
    }

    #[test]
    fn stop_invalidates_sessions_and_waits_on_ble_timers() {
        let mut store = Store::new(MemStore::default());
        store.set_device_id([1, 2, 3, 4, 5, 6]);
        let mut server = AccessoryServer::new(store, test_config(), None);
        let now = Instant::now();
        server.start::<NoopBle, NoopBonjour>(now, None, None).unwrap();

        let ble_session = Session::create(Transport::Ble(crate::session::BleSession {
            timers: crate::session::BleTimers {
                safe_to_disconnect_deadline: Some(now + Duration::from_secs(2)),
                ..Default::default()
            },
            ..Default::default()
        }));
        let mut sessions = [ble_session];
        server.stop::<NoopBle>(&mut sessions, None).unwrap();
        assert_eq!(server.state(), State::Stopping);
        assert!(!AccessoryServer::<MemStore>::shutdown_complete(&sessions, now));
        assert!(AccessoryServer::<MemStore>::shutdown_complete(
            &sessions,
            now + Duration::from_secs(2)
        ));
        server.finish_stop().unwrap();
        assert_eq!(server.state(), State::Idle);
    }
}
