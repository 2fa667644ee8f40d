//! Event dispatcher ([HAP] Section 6.8/7.4.5, `spec.md` §4.C13): routes
//! a characteristic value change to subscribed sessions by transport.

use std::time::Instant;

use crate::ble::advertiser::{advance_gsn, EVENT_WINDOW};
use crate::error::Result;
use crate::session::{Session, Transport};
use crate::store::{KeyValueStore, Store};

/// Routes a value change to every IP session subscribed to `(aid, iid)`,
/// queuing it for that session's next notification-timer tick.
pub fn dispatch_ip_change(sessions: &mut [Session], aid: u64, iid: u64, value: &[u8]) {
    for session in sessions {
        if let Transport::Ip(ip) = session.transport_mut() {
            if ip.subscriptions.contains(&(aid, iid)) {
                ip.queue_notification(aid, iid, value.to_vec());
            }
        }
    }
}

/// Drains one session's coalesced notification batch, ready to be
/// framed as an `EVENT/1.0` message by `ip::event_batch`.
pub fn ip_notification_batch(session: &mut Session) -> Vec<(u64, u64, Vec<u8>)> {
    match session.transport_mut() {
        Transport::Ip(ip) => ip.drain_notifications(),
        Transport::Ble(_) => Vec::new(),
    }
}

/// Whether the BLE session should emit a GATT indication for `iid`, and
/// advances the session's connected-event GSN exactly once.
///
/// `suppress` is true when this value change originated from the write
/// currently being handled on this same session ([HAP] Section 7.4.5:
/// an accessory never indicates a change back to the controller that
/// caused it).
///
/// # Errors
///
/// Propagates a GSN-store write failure (never expected in practice).
pub fn dispatch_ble_connected_change<S: KeyValueStore>(
    session: &mut Session,
    store: &mut Store<S>,
    iid: u64,
    suppress: bool,
) -> Result<bool> {
    let subscribed = match session.transport() {
        Transport::Ble(ble) => ble.ccc_subscriptions.contains(&iid),
        Transport::Ip(_) => false,
    };
    if !subscribed || suppress {
        return Ok(false);
    }
    note_connected_change(session, store)?;
    Ok(true)
}

/// Advances the GSN exactly once per connected session, on the first
/// connected-event-eligible change ([HAP] Section 7.4.2.2).
///
/// # Errors
///
/// Propagates a GSN-store write failure (never expected in practice).
pub fn note_connected_change<S: KeyValueStore>(session: &mut Session, store: &mut Store<S>) -> Result<()> {
    let Transport::Ble(ble) = session.transport_mut() else {
        return Ok(());
    };
    if ble.gsn_advanced {
        return Ok(());
    }
    let gsn = store.gsn();
    let mut broadcast = store.broadcast_params();
    let next = advance_gsn(gsn, &mut broadcast)?;
    store.set_gsn(next);
    store.set_broadcast_params(&broadcast);
    ble.gsn_advanced = true;
    Ok(())
}

/// Advances the GSN once per disconnected coalescing cycle (an
/// arbitrary burst of disconnected-event changes shares one increment
/// until a controller connects, tracked via [`crate::store::Gsn::did_increment`]).
///
/// # Errors
///
/// Propagates a GSN-store write failure (never expected in practice).
pub fn note_disconnected_change<S: KeyValueStore>(store: &mut Store<S>) -> Result<()> {
    let gsn = store.gsn();
    if gsn.did_increment() {
        return Ok(());
    }
    let mut broadcast = store.broadcast_params();
    let next = advance_gsn(gsn, &mut broadcast)?;
    store.set_gsn(next);
    store.set_broadcast_params(&broadcast);
    Ok(())
}

/// Starts a new connect/disconnect coalescing cycle: clears the
/// did-increment flag so the next disconnected-event burst gets its own
/// increment.
pub fn begin_coalescing_cycle<S: KeyValueStore>(store: &mut Store<S>) {
    store.set_gsn(store.gsn().cycle_reset());
}

/// Tracks the 3-second encrypted-notification advertisement override
/// for a single broadcast-configured characteristic ([HAP] Section
/// 7.4.2.3, `spec.md` §4.C13 "BLE broadcasted").
#[derive(Debug, Default)]
pub struct BroadcastOverride {
    pending: Option<(u64, Vec<u8>, Instant)>,
}

impl BroadcastOverride {
    /// Records a broadcast-eligible change, (re)starting the 3-second
    /// window. A change during an active window refreshes the value and
    /// extends the deadline rather than queuing a second override.
    pub fn note_change(&mut self, iid: u64, value: Vec<u8>, now: Instant) {
        self.pending = Some((iid, value, now + EVENT_WINDOW));
    }

    /// The characteristic/value to advertise in place of the regular
    /// payload, if the window is still open.
    #[must_use]
    pub fn active(&self, now: Instant) -> Option<(u64, &[u8])> {
        self.pending
            .as_ref()
            .filter(|(_, _, until)| now < *until)
            .map(|(iid, value, _)| (*iid, value.as_slice()))
    }

    /// Clears the override once its window has elapsed.
    pub fn expire_if_due(&mut self, now: Instant) {
        if self.pending.as_ref().is_some_and(|(_, _, until)| now >= *until) {
            self.pending = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{BleSession, IpSession};
    use crate::store::Domain;
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
            self.0.keys().filter(|(d, _)| *d == domain as u8).map(|(_, k)| *k).collect()
        }
    }

    #[test]
    fn ip_notification_coalesces_repeated_change_to_latest_value() {
        let mut session = Session::create(Transport::Ip(IpSession {
            subscriptions: vec![(1, 10)],
            ..Default::default()
        }));
        dispatch_ip_change(std::slice::from_mut(&mut session), 1, 10, b"1");
        dispatch_ip_change(std::slice::from_mut(&mut session), 1, 10, b"0");
        let batch = ip_notification_batch(&mut session);
        assert_eq!(batch, vec![(1, 10, b"0".to_vec())]);
        assert!(ip_notification_batch(&mut session).is_empty());
    }

    #[test]
    fn unsubscribed_ip_session_gets_no_notification() {
        let mut session = Session::create(Transport::Ip(IpSession::default()));
        dispatch_ip_change(std::slice::from_mut(&mut session), 1, 10, b"1");
        assert!(ip_notification_batch(&mut session).is_empty());
    }

    #[test]
    fn connected_change_advances_gsn_once_per_session() {
        let mut store = Store::new(MemStore::default());
        let mut session = Session::create(Transport::Ble(BleSession {
            ccc_subscriptions: vec![10],
            ..Default::default()
        }));
        let first = store.gsn();
        assert!(dispatch_ble_connected_change(&mut session, &mut store, 10, false).unwrap());
        let after_one = store.gsn();
        assert_eq!(after_one.value(), first.value() + 1);
        assert!(dispatch_ble_connected_change(&mut session, &mut store, 10, false).unwrap());
        assert_eq!(store.gsn().value(), after_one.value());
    }

    #[test]
    fn connected_change_suppressed_for_originating_write() {
        let mut store = Store::new(MemStore::default());
        let mut session = Session::create(Transport::Ble(BleSession {
            ccc_subscriptions: vec![10],
            ..Default::default()
        }));
        let before = store.gsn();
        assert!(!dispatch_ble_connected_change(&mut session, &mut store, 10, true).unwrap());
        assert_eq!(store.gsn(), before);
    }

    #[test]
    fn disconnected_burst_advances_gsn_exactly_once_per_cycle() {
        let mut store = Store::new(MemStore::default());
        let before = store.gsn();
        note_disconnected_change(&mut store).unwrap();
        note_disconnected_change(&mut store).unwrap();
        note_disconnected_change(&mut store).unwrap();
        assert_eq!(store.gsn().value(), before.value() + 1);
        begin_coalescing_cycle(&mut store);
        note_disconnected_change(&mut store).unwrap();
        assert_eq!(store.gsn().value(), before.value() + 2);
    }

    #[test]
    fn broadcast_override_extends_window_on_refresh() {
        let mut over = BroadcastOverride::default();
        let now = Instant::now();
        over.note_change(5, vec![1], now);
        assert!(over.active(now).is_some());
        let almost_expired = now + EVENT_WINDOW - std::time::Duration::from_millis(1);
        over.note_change(5, vec![2], almost_expired);
        assert_eq!(over.active(almost_expired).unwrap().1, &[2]);
        assert!(over.active(almost_expired + EVENT_WINDOW - std::time::Duration::from_millis(1)).is_some());
    }

    #[test]
    fn broadcast_override_expires_after_window() {
        let mut over = BroadcastOverride::default();
        let now = Instant::now();
        over.note_change(5, vec![1], now);
        over.expire_if_due(now + EVENT_WINDOW);
        assert!(over.active(now + EVENT_WINDOW).is_none());
    }
}
