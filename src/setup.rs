//! Setup-info manager ([HAP] Section 4, `spec.md` §4.C12): setup
//! code/ID/hash generation, display/NFC lifecycle, setup payload
//! encoding.

use std::time::{Duration, Instant};

use hap_crypto::{SALT_LEN, VERIFIER_LEN};

use crate::error::{Error, Result};
use crate::util;

/// `HAPAccessorySetupInfo_DynamicRefreshInterval` ([HAP]
/// `HAPAccessorySetupInfo.c`): how often a display-generated setup code
/// is replaced while not locked for a pairing attempt.
pub const DYNAMIC_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// NFC pairing-mode auto-exit window ([HAP] Section 4.3, `spec.md`
/// §4.C12 mode 3).
pub const NFC_AUTO_EXIT: Duration = Duration::from_secs(5 * 60);

/// SRP setup info: the 16-byte salt and 384-byte verifier Pair Setup's
/// M1/M2 exchange consumes.
#[derive(Clone)]
pub struct SetupInfo {
    pub salt: [u8; SALT_LEN],
    pub verifier: [u8; VERIFIER_LEN],
}

impl std::fmt::Debug for SetupInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupInfo").finish_non_exhaustive()
    }
}

/// A validated `XXX-XX-XXX` setup code.
#[derive(Clone, Eq, PartialEq)]
pub struct SetupCode(String);

impl std::fmt::Debug for SetupCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SetupCode(..)")
    }
}

impl SetupCode {
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] if `code` is not a well-formed,
    /// non-degenerate `XXX-XX-XXX` setup code.
    pub fn new(code: &str) -> Result<Self> {
        if !util::is_valid_setup_code(code) {
            return Err(Error::InvalidData);
        }
        Ok(Self(code.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The code's 8 decimal digits packed as an integer, `0..=99_999_999`
    /// (`spec.md` §4.C12 setup payload encoding).
    #[must_use]
    pub fn as_integer(&self) -> u32 {
        self.0
            .bytes()
            .filter(u8::is_ascii_digit)
            .fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'))
    }
}

/// A validated 4-character setup ID (uppercase `A-Z0-9`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SetupId([u8; 4]);

impl SetupId {
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] if `id` is not exactly 4 bytes of
    /// uppercase letters or digits.
    pub fn new(id: &str) -> Result<Self> {
        let bytes = id.as_bytes();
        if bytes.len() != 4 || !bytes.iter().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()) {
            return Err(Error::InvalidData);
        }
        let mut out = [0u8; 4];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

/// Which peripherals drive the setup-info lifecycle ([HAP] Section 4.3,
/// `spec.md` §4.C12).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    /// No display, no NFC: static values on the label only.
    None,
    /// Display only: randomly generated code, refreshed periodically.
    Display,
    /// NFC only: a static platform-provided code, explicit pairing-mode
    /// entry/exit.
    Nfc,
    /// Display and NFC together.
    DisplayAndNfc,
}

/// Setup payload flag bits ([HAP] Section 5.4, Table 5-4).
pub mod flags {
    pub const IP: u8 = 1 << 0;
    pub const BLE: u8 = 1 << 1;
    pub const WAC: u8 = 1 << 2;
}

const PAYLOAD_VERSION: u64 = 0;
const PAYLOAD_WIDTH: usize = 9;
const BASE36_ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

fn encode_base36(mut value: u64, width: usize) -> String {
    let mut digits = vec![b'0'; width];
    for slot in digits.iter_mut().rev() {
        *slot = BASE36_ALPHABET[(value % 36) as usize];
        value /= 36;
    }
    String::from_utf8(digits).expect("base36 alphabet is ASCII")
}

fn payload_integer(category: u8, flags: u8, setup_code: u32) -> u64 {
    (PAYLOAD_VERSION << 43)
        | (u64::from(category) << 31)
        | (u64::from(flags) << 27)
        | u64::from(setup_code & 0x07FF_FFFF)
}

/// Builds the `X-HM://...` setup payload string ([HAP] Section 5.4,
/// `spec.md` §4.C12).
#[must_use]
pub fn setup_payload(category: u8, flags: u8, setup_code: &SetupCode, setup_id: SetupId) -> String {
    let n = payload_integer(category, flags, setup_code.as_integer());
    format!("X-HM://{}{}", encode_base36(n, PAYLOAD_WIDTH), setup_id.as_str())
}

/// Builds the non-pairable variant of the setup payload, embedding only
/// category and flags (`setup_code` integer field is zero) — published
/// when the accessory has no setup code available at all ([HAP]
/// `HAPAccessorySetupInfo.c` `SynchronizeDisplayAndNFC`, `SPEC_FULL.md`
/// §C).
#[must_use]
pub fn non_pairable_payload(category: u8, flags: u8, setup_id: SetupId) -> String {
    let n = payload_integer(category, flags, 0);
    format!("X-HM://{}{}", encode_base36(n, PAYLOAD_WIDTH), setup_id.as_str())
}

/// Tracks a display/NFC-driven accessory setup code's lifecycle across
/// the modes `spec.md` §4.C12 describes.
#[derive(Debug)]
pub struct SetupInfoManager {
    mode: Mode,
    setup_id: SetupId,
    code: Option<SetupCode>,
    info: Option<SetupInfo>,
    /// Frozen for the duration of a pairing attempt (`lockSetupInfo`).
    locked: bool,
    next_refresh: Option<Instant>,
    nfc_exit: Option<Instant>,
}

impl SetupInfoManager {
    #[must_use]
    pub fn new(mode: Mode, setup_id: SetupId) -> Self {
        Self {
            mode,
            setup_id,
            code: None,
            info: None,
            locked: false,
            next_refresh: None,
            nfc_exit: None,
        }
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn setup_code(&self) -> Option<&SetupCode> {
        self.code.as_ref()
    }

    #[must_use]
    pub fn setup_info(&self) -> Option<&SetupInfo> {
        self.info.as_ref()
    }

    /// Loads a platform-static or freshly generated `(code, info)` pair.
    /// Modes 2/4 (display) call this from a random generator on every
    /// refresh; modes 3/4 (NFC) load the platform's fixed code once.
    pub fn set_code(&mut self, code: SetupCode, info: SetupInfo) {
        self.code = Some(code);
        self.info = Some(info);
    }

    pub fn clear_code(&mut self) {
        self.code = None;
        self.info = None;
    }

    /// Freezes the current code for the duration of a pairing attempt
    /// (`lockSetupInfo`); a display refresh due during the lock is
    /// deferred until [`Self::unlock`].
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    /// Arms the next display-refresh deadline ([HAP] Section 4.3,
    /// `DYNAMIC_REFRESH_INTERVAL`). Called whenever a new code is
    /// generated in [`Mode::Display`]/[`Mode::DisplayAndNfc`].
    pub fn arm_refresh(&mut self, now: Instant) {
        self.next_refresh = Some(now + DYNAMIC_REFRESH_INTERVAL);
    }

    /// Returns whether a display-mode refresh is due. Never fires while
    /// [`Self::is_locked`].
    #[must_use]
    pub fn refresh_due(&self, now: Instant) -> bool {
        !self.locked
            && matches!(self.mode, Mode::Display | Mode::DisplayAndNfc)
            && self.next_refresh.is_some_and(|d| now >= d)
    }

    /// Enters NFC pairing mode, arming the 5-minute auto-exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] outside [`Mode::Nfc`]/
    /// [`Mode::DisplayAndNfc`].
    pub fn enter_nfc_pairing_mode(&mut self, now: Instant) -> Result<()> {
        if !matches!(self.mode, Mode::Nfc | Mode::DisplayAndNfc) {
            return Err(Error::InvalidState);
        }
        self.nfc_exit = Some(now + NFC_AUTO_EXIT);
        Ok(())
    }

    pub fn exit_nfc_pairing_mode(&mut self) {
        self.nfc_exit = None;
    }

    #[must_use]
    pub fn in_nfc_pairing_mode(&self, now: Instant) -> bool {
        self.nfc_exit.is_some_and(|d| now < d)
    }

    #[must_use]
    pub fn nfc_auto_exit_due(&self, now: Instant) -> bool {
        self.nfc_exit.is_some_and(|d| now >= d)
    }

    /// Builds the payload to publish: the pairable setup payload while a
    /// code is available and (for NFC) pairing mode is active, else the
    /// non-pairable "restart accessory" payload ([HAP] Section 4.3,
    /// `SPEC_FULL.md` §C).
    #[must_use]
    pub fn current_payload(&self, category: u8, transport_flags: u8, now: Instant) -> String {
        let pairable = match self.mode {
            Mode::None => false,
            Mode::Display => self.code.is_some(),
            Mode::Nfc | Mode::DisplayAndNfc => self.code.is_some() && self.in_nfc_pairing_mode(now),
        };
        match (pairable, &self.code) {
            (true, Some(code)) => setup_payload(category, transport_flags, code, self.setup_id),
            _ => non_pairable_payload(category, transport_flags, self.setup_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_code_integer_packs_digits_in_order() {
        let code = SetupCode::new("123-45-679").unwrap();
        assert_eq!(code.as_integer(), 12_345_679);
    }

    #[test]
    fn setup_code_rejects_forbidden_patterns() {
        assert!(SetupCode::new("123-45-678").is_err());
        assert!(SetupCode::new("000-00-000").is_err());
        assert!(SetupCode::new("12x-45-679").is_err());
    }

    #[test]
    fn setup_id_requires_four_uppercase_alnum_chars() {
        assert!(SetupId::new("7OSX").is_ok());
        assert!(SetupId::new("7osx").is_err());
        assert!(SetupId::new("7OS").is_err());
    }

    #[test]
    fn setup_payload_has_fixed_prefix_and_width() {
        let code = SetupCode::new("123-45-679").unwrap();
        let id = SetupId::new("7OSX").unwrap();
        let payload = setup_payload(2, flags::IP, &code, id);
        assert!(payload.starts_with("X-HM://"));
        assert_eq!(payload.len(), "X-HM://".len() + PAYLOAD_WIDTH + 4);
        assert!(payload.ends_with("7OSX"));
    }

    #[test]
    fn non_pairable_payload_differs_from_pairable_for_same_code() {
        let code = SetupCode::new("123-45-679").unwrap();
        let id = SetupId::new("7OSX").unwrap();
        let a = setup_payload(2, flags::IP, &code, id);
        let b = non_pairable_payload(2, flags::IP, id);
        assert_ne!(a, b);
    }

    #[test]
    fn display_mode_refresh_is_suppressed_while_locked() {
        let id = SetupId::new("7OSX").unwrap();
        let mut mgr = SetupInfoManager::new(Mode::Display, id);
        let now = Instant::now();
        mgr.arm_refresh(now);
        mgr.lock();
        assert!(!mgr.refresh_due(now + DYNAMIC_REFRESH_INTERVAL));
        mgr.unlock();
        assert!(mgr.refresh_due(now + DYNAMIC_REFRESH_INTERVAL));
    }

    #[test]
    fn nfc_pairing_mode_auto_exits_after_window() {
        let id = SetupId::new("7OSX").unwrap();
        let mut mgr = SetupInfoManager::new(Mode::Nfc, id);
        let now = Instant::now();
        mgr.enter_nfc_pairing_mode(now).unwrap();
        assert!(mgr.in_nfc_pairing_mode(now));
        assert!(!mgr.nfc_auto_exit_due(now));
        assert!(mgr.nfc_auto_exit_due(now + NFC_AUTO_EXIT));
    }

    #[test]
    fn mode_none_never_enters_nfc_pairing_mode() {
        let id = SetupId::new("7OSX").unwrap();
        let mut mgr = SetupInfoManager::new(Mode::None, id);
        assert_eq!(mgr.enter_nfc_pairing_mode(Instant::now()), Err(Error::InvalidState));
    }
}
