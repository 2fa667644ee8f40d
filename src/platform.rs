//! External interfaces the core consumes but never implements (`spec.md`
//! §6): BLE peripheral manager, IP transport, HTTP/1.1 and JSON readers,
//! Bonjour/DNS-SD publication, and platform timers/randomness. Every
//! trait here names a collaborator the engine calls into or is called
//! from; none of them touch a network socket or OS timer themselves.

use std::time::{Duration, Instant};

use crate::error::Result;

/// Opaque BLE connection handle, owned by the peripheral manager.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct BleConnection(pub u32);

/// Bluetooth LE peripheral manager ([HAP] Section 7, `spec.md` §6).
///
/// The inbound direction (`onConnect`/`onDisconnect`/`onGattWrite`/
/// `onGattRead`) is not a trait the core implements against; the
/// platform calls directly into the accessory server's own methods
/// (`spec.md` §4.C14), the same way a Bluetooth host state machine is
/// driven directly from raw HCI events rather than through a generic
/// callback trait.
pub trait BlePeripheralManager {
    /// Starts advertising `adv_data`/`scan_response` at `interval`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unknown`](crate::error::Error::Unknown) on a
    /// controller/radio failure.
    fn advertise(&mut self, interval: Duration, adv_data: &[u8], scan_response: &[u8]) -> Result<()>;

    /// # Errors
    ///
    /// Returns [`Error::Unknown`](crate::error::Error::Unknown) on a
    /// controller/radio failure.
    fn stop_advertising(&mut self) -> Result<()>;

    /// Emits a GATT indication for `characteristic_iid` on `connection`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unknown`](crate::error::Error::Unknown) if the
    /// connection is gone or the controller rejects the indication.
    fn send_indication(&mut self, connection: BleConnection, characteristic_iid: u64) -> Result<()>;

    /// # Errors
    ///
    /// Returns [`Error::Unknown`](crate::error::Error::Unknown) on a
    /// controller/radio failure.
    fn disconnect(&mut self, connection: BleConnection) -> Result<()>;
}

/// Opaque IP stream handle, owned by the transport implementation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct IpStream(pub u32);

/// IP transport ([HAP] Section 6, `spec.md` §6). One HTTP/1.1 request
/// per exchange; bodies are `application/hap+json`,
/// `application/pairing+tlv8`, or `application/octet-stream`.
pub trait IpTransport {
    /// # Errors
    ///
    /// Returns [`Error::Unknown`](crate::error::Error::Unknown) if the
    /// listening socket cannot be opened (port in use, out of handles).
    fn listen(&mut self, port: u16) -> Result<()>;

    /// Non-blocking: `Ok(None)` if no connection is pending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unknown`](crate::error::Error::Unknown) on a
    /// listener-level failure.
    fn accept(&mut self) -> Result<Option<IpStream>>;

    /// # Errors
    ///
    /// Returns [`Error::Unknown`](crate::error::Error::Unknown) on a
    /// socket read error; `Ok(0)` signals orderly close.
    fn read(&mut self, stream: IpStream, buf: &mut [u8]) -> Result<usize>;

    /// # Errors
    ///
    /// Returns [`Error::Unknown`](crate::error::Error::Unknown) on a
    /// socket write error.
    fn write(&mut self, stream: IpStream, buf: &[u8]) -> Result<usize>;

    /// # Errors
    ///
    /// Returns [`Error::Unknown`](crate::error::Error::Unknown) if the
    /// stream is already closed.
    fn close(&mut self, stream: IpStream) -> Result<()>;
}

/// One token or terminal event emitted by the HTTP/1.1 reader (`spec.md`
/// §6: `methodToken, uriToken, versionToken, statusToken, reasonToken,
/// headerNameToken, headerValueToken, done, error`).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HttpEvent {
    Method(Vec<u8>),
    Uri(Vec<u8>),
    Version(Vec<u8>),
    Status(Vec<u8>),
    Reason(Vec<u8>),
    HeaderName(Vec<u8>),
    HeaderValue(Vec<u8>),
    Done,
    Error,
}

/// States of the byte-at-a-time HTTP/1.1 reader state machine (`spec.md`
/// §6, `util_http_reader` module). Listed for the external
/// implementation's benefit; the core dispatches only on the
/// [`HttpEvent`]s it emits, never on which state produced them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HttpReaderState {
    ExpectingMethod,
    ReadingMethod,
    CompletedMethod,
    ExpectingUri,
    ReadingUri,
    ExpectingVersion,
    ReadingVersion,
    ExpectingHeaderName,
    ReadingHeaderName,
    ExpectingHeaderValue,
    ReadingHeaderValue,
    ReadingFoldedHeaderValue,
    EndingHeaderLines,
    Done,
    Error,
}

/// Pure byte-at-a-time HTTP/1.1 tokenizer ([HAP]
/// `HAPAccessoryServer+IP.c` `HAPIPByteBuffer` reader, `spec.md` §6).
/// Token character classes follow RFC 7230 (method tokens exclude
/// separators/CTL/SPACE; header values support quoted-string `\`
/// escapes and CRLF-SP/TAB line folding).
pub trait HttpReader {
    fn state(&self) -> HttpReaderState;

    /// Feeds one byte, returning an event if one was completed.
    fn feed(&mut self, byte: u8) -> Option<HttpEvent>;
}

/// One event emitted by the streaming JSON tokenizer (`spec.md` §6).
#[derive(Clone, Debug, PartialEq)]
pub enum JsonEvent {
    BeginObject { offset: usize },
    EndObject { offset: usize },
    BeginArray { offset: usize },
    EndArray { offset: usize },
    String { value: String, offset: usize },
    /// The number's raw decimal token, not a pre-parsed `f64`: HAP
    /// characteristic values range up to `u64::MAX`, which an `f64`
    /// cannot represent exactly, so precision-sensitive parsing
    /// (`ip::json`) is left to the consumer.
    Number { raw: String, offset: usize },
    True { offset: usize },
    False { offset: usize },
    Null { offset: usize },
    Error,
}

/// Stream-based JSON tokenizer the `ip::json` write-request helpers
/// consume (`spec.md` §6, `SPEC_FULL.md` §C).
pub trait JsonReader {
    fn feed(&mut self, byte: u8) -> Option<JsonEvent>;
}

/// Bonjour/DNS-SD TXT record fields ([HAP] Section 6.3, `spec.md` §6).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TxtRecords {
    pub model: String,
    pub protocol_version: String,
    pub device_id: String,
    pub configuration_number: u32,
    pub state_number: u8,
    pub feature_flags: u8,
    pub category: u8,
    pub status_flags: u8,
    pub setup_hash: Option<[u8; 4]>,
}

impl TxtRecords {
    /// Renders the record set as `key=value` pairs in the order `spec.md`
    /// §6 lists them, `sh` base64-encoded and present only when set.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            ("md", self.model.clone()),
            ("pv", self.protocol_version.clone()),
            ("id", self.device_id.clone()),
            ("c#", self.configuration_number.to_string()),
            ("s#", self.state_number.to_string()),
            ("ff", self.feature_flags.to_string()),
            ("ci", self.category.to_string()),
            ("sf", self.status_flags.to_string()),
        ];
        if let Some(hash) = self.setup_hash {
            out.push(("sh", base64_encode(&hash)));
        }
        out
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0];
        let b1 = chunk.get(1).copied();
        let b2 = chunk.get(2).copied();
        out.push(ALPHABET[(b0 >> 2) as usize] as char);
        out.push(ALPHABET[(((b0 & 0x03) << 4) | (b1.unwrap_or(0) >> 4)) as usize] as char);
        out.push(if let Some(b1) = b1 {
            ALPHABET[(((b1 & 0x0F) << 2) | (b2.unwrap_or(0) >> 6)) as usize] as char
        } else {
            '='
        });
        out.push(if let Some(b2) = b2 { ALPHABET[(b2 & 0x3F) as usize] as char } else { '=' });
    }
    out
}

/// Bonjour/DNS-SD publication ([HAP] Section 6.3, `spec.md` §6).
pub trait BonjourPublisher {
    /// # Errors
    ///
    /// Returns [`Error::Unknown`](crate::error::Error::Unknown) if the
    /// mDNS responder cannot register the service.
    fn publish(&mut self, service: &str, port: u16, txt: &TxtRecords) -> Result<()>;

    /// # Errors
    ///
    /// Returns [`Error::Unknown`](crate::error::Error::Unknown) if the
    /// service is not currently published.
    fn update_txt(&mut self, txt: &TxtRecords) -> Result<()>;

    /// # Errors
    ///
    /// Returns [`Error::Unknown`](crate::error::Error::Unknown) if the
    /// service is not currently published.
    fn unpublish(&mut self) -> Result<()>;
}

/// Monotonic clock the server consults for timer deadlines. Kept as a
/// trait (rather than calling `Instant::now()` directly) so tests can
/// substitute a controlled clock, matching how `Procedure`/`Transaction`
/// already take `now: Instant` as a parameter instead of sampling it.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// System clock `Clock` implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Cryptographically secure random byte source ([HAP] Section 5.4),
/// used to generate setup codes/IDs and Ed25519/Curve25519 key seeds.
/// AEAD nonces never go through this: they are derived deterministically
/// from the session/GSN counters (`hap_crypto::nonce_from_*`).
pub trait RandomSource {
    fn fill(&mut self, buf: &mut [u8]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txt_records_render_in_bonjour_key_order_without_hash() {
        let txt = TxtRecords {
            model: "Acme1,1".into(),
            protocol_version: "1.1".into(),
            device_id: "AA:BB:CC:DD:EE:FF".into(),
            configuration_number: 2,
            state_number: 1,
            feature_flags: 0,
            category: 5,
            status_flags: 1,
            setup_hash: None,
        };
        let pairs = txt.to_pairs();
        assert_eq!(pairs.iter().map(|(k, _)| *k).collect::<Vec<_>>(), vec!["md", "pv", "id", "c#", "s#", "ff", "ci", "sf"]);
    }

    #[test]
    fn txt_records_include_base64_hash_when_present() {
        let txt = TxtRecords {
            setup_hash: Some([0xC9, 0xFE, 0x1B, 0xCF]),
            ..Default::default()
        };
        let pairs = txt.to_pairs();
        let (_, hash) = pairs.iter().find(|(k, _)| *k == "sh").unwrap();
        assert_eq!(hash, "yf4bzw==");
    }
}
