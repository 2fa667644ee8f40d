//! BLE procedure: binds a session to one characteristic for the
//! duration of a transaction ([HAP] Section 7.3.4, `spec.md` §4.C10).

use std::time::{Duration, Instant};

use crate::error::{BleStatus, Error, Result};
use crate::session::Session;
use crate::store::{KeyValueStore, Store};

use super::pdu::Opcode;
use super::protocol_config::{handle_characteristic_configuration, handle_protocol_configuration};
use super::transaction::{Transaction, WriteOutcome};

/// Procedure timeout ([HAP] Section 7.3.4, `spec.md` §5).
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Characteristics that implicitly drop any existing secure session on
/// first write ([HAP] Section 7.3.5.2; `spec.md` §4.C10 "state-session
/// invariant"). The procedure layer is told which IIDs these are by the
/// attribute database; the engine only enforces the rule once told.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CharacteristicInfo {
    pub iid: u64,
    pub drops_security_session: bool,
}

/// A pending Timed Write: the body and deadline stashed by
/// `CharacteristicTimedWrite`, consumed by a matching
/// `CharacteristicExecuteWrite` ([HAP] Section 7.3.5.2).
struct TimedWrite {
    iid: u64,
    body: Vec<u8>,
    deadline: Instant,
}

/// Timed Write TTL ([HAP] Section 7.3.5.2 "Timed Write Procedures").
pub const TIMED_WRITE_TTL: Duration = Duration::from_secs(10);

pub struct Procedure {
    transaction: Transaction,
    deadline: Option<Instant>,
    timed_write: Option<TimedWrite>,
}

impl Default for Procedure {
    fn default() -> Self {
        Self {
            transaction: Transaction::new(),
            deadline: None,
            timed_write: None,
        }
    }
}

/// What the caller should do after a GATT write reaches the procedure
/// layer.
pub enum Outcome {
    /// More fragments are needed before the request can be dispatched.
    NeedMoreData,
    /// The request was handled; `response` is ready for the next GATT
    /// read(s) via [`Procedure::handle_read`].
    Handled,
}

impl Procedure {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    /// Feeds one GATT write, dispatching to `dispatch` once the request
    /// is fully reassembled. `dispatch` receives the opcode, instance
    /// id, and body, and returns the response body plus status.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if the session is terminal (link pending
    /// disconnection) or the transaction layer rejects the write.
    pub fn handle_write<S: KeyValueStore>(
        &mut self,
        bytes: &[u8],
        now: Instant,
        session: &mut Session,
        store: &mut Store<S>,
        char_info: impl Fn(u64) -> Option<CharacteristicInfo>,
        dispatch: impl FnOnce(&mut Session, &mut Store<S>, u8, u64, Vec<u8>) -> (BleStatus, Vec<u8>),
    ) -> Result<Outcome> {
        if let crate::session::Transport::Ble(ble) = session.transport() {
            if ble.is_terminal {
                return Err(Error::InvalidState);
            }
        }
        self.deadline = Some(now + TIMEOUT);

        match self.transaction.handle_write(bytes)? {
            WriteOutcome::Incomplete => Ok(Outcome::NeedMoreData),
            WriteOutcome::Complete { opcode, tid, iid, body } => {
                if let Some(info) = char_info(iid) {
                    if info.drops_security_session {
                        session.invalidate(false);
                    }
                }
                let op = Opcode::try_from(opcode);
                let (status, resp_body) = match op {
                    Ok(Opcode::CharacteristicTimedWrite) => self.begin_timed_write(now, iid, body),
                    Ok(Opcode::CharacteristicExecuteWrite) => {
                        match self.take_timed_write(iid, now) {
                            Some(stashed) => dispatch(session, store, Opcode::CharacteristicWrite as u8, iid, stashed),
                            None => (BleStatus::UnsupportedPdu, Vec::new()),
                        }
                    }
                    Ok(Opcode::ProtocolConfiguration) => {
                        handle_protocol_configuration(session, store, &body)?
                    }
                    Ok(Opcode::CharacteristicConfiguration) => {
                        handle_characteristic_configuration(session, store, iid, &body)?
                    }
                    Ok(_) => dispatch(session, store, opcode, iid, body),
                    Err(_) => (BleStatus::UnsupportedPdu, Vec::new()),
                };
                self.transaction.set_response(tid, status as u8, resp_body);
                self.deadline = None;
                Ok(Outcome::Handled)
            }
        }
    }

    fn begin_timed_write(&mut self, now: Instant, iid: u64, body: Vec<u8>) -> (BleStatus, Vec<u8>) {
        self.timed_write = Some(TimedWrite {
            iid,
            body,
            deadline: now + TIMED_WRITE_TTL,
        });
        (BleStatus::Success, Vec::new())
    }

    fn take_timed_write(&mut self, iid: u64, now: Instant) -> Option<Vec<u8>> {
        let tw = self.timed_write.take()?;
        if tw.iid != iid || now >= tw.deadline {
            return None;
        }
        Some(tw.body)
    }

    /// Produces the next response chunk for a GATT read.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if no response is pending.
    pub fn handle_read(&mut self, max_len: usize) -> Result<Vec<u8>> {
        self.transaction.handle_read(max_len)
    }
}
