//! Per-controller session state ([HAP] `HAPSession.c`, `spec.md` §3/§4.C4).
//!
//! `HAPSession` is an opaque struct downcast by transport; here it is
//! re-expressed as a tagged union (`Transport::Ip`/`Transport::Ble`)
//! around a shared [`Common`] block, the same shape a tagged
//! `EventType::{Hci,Le}` decode uses elsewhere in this codebase's
//! lineage.

use hap_crypto::{ControlChannelKey, Ed25519PublicKey, SharedSecret};
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::pairing::{setup::PairSetupState, verify::PairVerifyState};
use crate::store::{KeyValueStore, Store};

/// A directional encryption channel: a 32-byte key and a strictly
/// monotonic 64-bit nonce counter. Never reused after a counter value has
/// been consumed, even across `encrypt`/`decrypt` failures.
#[derive(Debug)]
pub struct ChannelState {
    key: ControlChannelKey,
    counter: u64,
}

impl ChannelState {
    #[must_use]
    pub const fn new(key: ControlChannelKey) -> Self {
        Self { key, counter: 0 }
    }

    #[must_use]
    pub const fn counter(&self) -> u64 {
        self.counter
    }
}

/// Per-session BLE timers ([HAP] `HAPBLESession.h`). Only populated for
/// [`Transport::Ble`] sessions; modeled as explicit deadlines rather than
/// live platform timer handles, so the server owns cancellation and no
/// timer callback can observe a session after it is torn down.
#[derive(Clone, Copy, Debug, Default)]
pub struct BleTimers {
    pub link_deadline: Option<std::time::Instant>,
    pub procedure_deadline: Option<std::time::Instant>,
    pub safe_to_disconnect_deadline: Option<std::time::Instant>,
}

/// Fields specific to an IP-transport session.
#[derive(Debug, Default)]
pub struct IpSession {
    /// Characteristics this session is subscribed to for events.
    pub subscriptions: Vec<(u64, u64)>,
    /// Value changes queued since the last notification-timer tick
    /// ([HAP] Section 6.8, `spec.md` §4.C13: one batch per session per
    /// tick). Keyed by `(aid, iid)`; a repeated change coalesces to its
    /// latest value rather than growing the batch.
    pending: Vec<(u64, u64, Vec<u8>)>,
}

impl IpSession {
    /// Queues `value` for `(aid, iid)`, replacing any pending change for
    /// the same characteristic.
    pub fn queue_notification(&mut self, aid: u64, iid: u64, value: Vec<u8>) {
        if let Some(slot) = self.pending.iter_mut().find(|(a, i, _)| *a == aid && *i == iid) {
            slot.2 = value;
        } else {
            self.pending.push((aid, iid, value));
        }
    }

    /// Drains the pending batch for this tick.
    pub fn drain_notifications(&mut self) -> Vec<(u64, u64, Vec<u8>)> {
        std::mem::take(&mut self.pending)
    }

    #[must_use]
    pub fn has_pending_notifications(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Fields specific to a BLE-transport session.
#[derive(Debug, Default)]
pub struct BleSession {
    pub timers: BleTimers,
    /// Set when the BLE link has been told to disconnect and must no
    /// longer accept new procedures ([HAP] `isTerminal`).
    pub is_terminal: bool,
    /// Characteristics with event notification enabled on their CCC for
    /// this connection.
    pub ccc_subscriptions: Vec<u64>,
    /// Set once this connected session has advanced the GSN for its
    /// first connected-event-eligible change ([HAP] Section 7.4.2.2,
    /// `spec.md` §4.C13: exactly one increment per connected session).
    pub gsn_advanced: bool,
}

/// The transport a session is bound to, carrying transport-specific
/// state.
#[derive(Debug)]
pub enum Transport {
    Ip(IpSession),
    Ble(BleSession),
}

impl Transport {
    #[must_use]
    pub const fn is_ble(&self) -> bool {
        matches!(self, Self::Ble(_))
    }
}

/// Fields shared by every session regardless of transport.
#[derive(Debug)]
struct Common {
    transport: Transport,
    active: bool,
    is_transient: bool,
    pairing_id: Option<u8>,
    cv_key: Option<SharedSecret>,
    controller_to_accessory: Option<ChannelState>,
    accessory_to_controller: Option<ChannelState>,
    pair_setup: PairSetupState,
    pair_verify: PairVerifyState,
}

/// A single controller session ([HAP] `HAPSession.c`, `spec.md` §3/§4.C4).
#[derive(Debug)]
pub struct Session(Common);

impl Session {
    #[must_use]
    pub fn create(transport: Transport) -> Self {
        Self(Common {
            transport,
            active: false,
            is_transient: false,
            pairing_id: None,
            cv_key: None,
            controller_to_accessory: None,
            accessory_to_controller: None,
            pair_setup: PairSetupState::default(),
            pair_verify: PairVerifyState::default(),
        })
    }

    #[must_use]
    pub const fn transport(&self) -> &Transport {
        &self.0.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.0.transport
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.0.active
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.0.is_transient
    }

    #[must_use]
    pub const fn pairing_id(&self) -> Option<u8> {
        self.0.pairing_id
    }

    #[must_use]
    pub fn cv_key(&self) -> Option<&SharedSecret> {
        self.0.cv_key.as_ref()
    }

    pub const fn pair_setup_state(&self) -> &PairSetupState {
        &self.0.pair_setup
    }

    pub fn pair_setup_state_mut(&mut self) -> &mut PairSetupState {
        &mut self.0.pair_setup
    }

    pub const fn pair_verify_state(&self) -> &PairVerifyState {
        &self.0.pair_verify
    }

    pub fn pair_verify_state_mut(&mut self) -> &mut PairVerifyState {
        &mut self.0.pair_verify
    }

    /// Marks Pair Verify complete: activates the session with the given
    /// directional keys and shared secret, and records which pairing
    /// authenticated it (`None` for a transient session).
    pub fn secure(
        &mut self,
        pairing_id: Option<u8>,
        is_transient: bool,
        cv_key: SharedSecret,
        read_key: ControlChannelKey,
        write_key: ControlChannelKey,
    ) {
        self.0.active = true;
        self.0.is_transient = is_transient;
        self.0.pairing_id = pairing_id;
        self.0.cv_key = Some(cv_key);
        self.0.accessory_to_controller = Some(ChannelState::new(read_key));
        self.0.controller_to_accessory = Some(ChannelState::new(write_key));
    }

    /// Zeroes all key material, marks the session inactive, and (if
    /// `terminate_link` and this is a BLE session) marks the link
    /// terminal so the procedure layer rejects further requests pending
    /// disconnection.
    pub fn invalidate(&mut self, terminate_link: bool) {
        trace!(is_ble = self.0.transport.is_ble(), terminate_link, "invalidating session");
        self.0.active = false;
        self.0.is_transient = false;
        self.0.pairing_id = None;
        self.0.cv_key = None;
        self.0.controller_to_accessory = None;
        self.0.accessory_to_controller = None;
        self.0.pair_setup = PairSetupState::default();
        self.0.pair_verify = PairVerifyState::default();
        if terminate_link {
            if let Transport::Ble(ble) = &mut self.0.transport {
                ble.is_terminal = true;
            }
        }
    }

    /// True iff the session is active and (transient, or its pairing
    /// record still exists in the store) -- re-checked on every access
    /// per `spec.md` §3 invariants.
    #[must_use]
    pub fn is_secured<S: KeyValueStore>(&self, store: &Store<S>) -> bool {
        self.0.active
            && (self.0.is_transient
                || self
                    .0
                    .pairing_id
                    .is_some_and(|id| store.pairing(id).is_some()))
    }

    /// Consults the pairing record's permission bit. Returns `false` for
    /// transient or unsecured sessions.
    #[must_use]
    pub fn controller_is_admin<S: KeyValueStore>(&self, store: &Store<S>) -> bool {
        self.0
            .pairing_id
            .and_then(|id| store.pairing(id))
            .is_some_and(|p| p.is_admin())
    }

    /// Encrypts one control-channel message and advances the
    /// accessory-to-controller counter. The counter only advances on
    /// success: an encrypt failure here means nothing was sent, so no
    /// nonce was spent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the session has no active
    /// accessory-to-controller channel.
    pub fn encrypt_control(&mut self, plain: &[u8]) -> Result<Vec<u8>> {
        let chan = self
            .0
            .accessory_to_controller
            .as_mut()
            .ok_or(Error::InvalidState)?;
        let nonce = hap_crypto::nonce_from_counter(chan.counter);
        let mut buf = plain.to_vec();
        chan.key.seal(&nonce, &[], &mut buf)?;
        chan.counter += 1;
        Ok(buf)
    }

    /// Decrypts one control-channel message. Advances the
    /// controller-to-accessory counter and, on failure, zeroes the entire
    /// session (`spec.md` §4.C4: a decryption failure is treated as an
    /// active attack).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] on AEAD verification failure, or
    /// [`Error::InvalidState`] if there is no active channel.
    pub fn decrypt_control(&mut self, cipher_and_tag: &[u8]) -> Result<Vec<u8>> {
        let chan = self
            .0
            .controller_to_accessory
            .as_mut()
            .ok_or(Error::InvalidState)?;
        let nonce = hap_crypto::nonce_from_counter(chan.counter);
        let mut buf = cipher_and_tag.to_vec();
        let result = chan.key.open(&nonce, &[], &mut buf);
        chan.counter += 1;
        match result {
            Ok(()) => Ok(buf),
            Err(_) => {
                warn!("control channel decryption failed, invalidating session");
                self.invalidate(true);
                Err(Error::InvalidData)
            }
        }
    }
}
