//! BLE advertisement builder and GSN lifecycle ([HAP] Section 7.4,
//! `spec.md` §4.C11).

use std::time::Duration;

use hap_crypto::ControlChannelKey;

use crate::error::Result;
use crate::store::{BroadcastParams, Gsn};

/// Apple Company ID used in manufacturer-specific advertising data
/// ([HAP] Section 7.4.2.1).
pub const COMPANY_ID: u16 = 0x004C;
/// Manufacturer data type for the regular advertisement format.
pub const TYPE_REGULAR: u8 = 0x06;
/// Manufacturer data type for the encrypted-notification format.
pub const TYPE_ENCRYPTED_NOTIFICATION: u8 = 0x11;
/// Fixed compatibility version byte ([HAP] Section 7.4.2.1, `spec.md`
/// §9 open question: preserved verbatim, no versioning hook).
pub const COMPATIBILITY_VERSION: u8 = 0x02;

/// Status flag bit 0: accessory not yet paired with any controller.
pub const STATUS_NOT_PAIRED: u8 = 1 << 0;

/// GAP AD structure type: Flags ([CSS] Part A, Section 1.3).
pub const AD_TYPE_FLAGS: u8 = 0x01;
/// GAP AD structure type: Shortened Local Name.
pub const AD_TYPE_SHORT_LOCAL_NAME: u8 = 0x08;
/// GAP AD structure type: Complete Local Name.
pub const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
/// GAP AD structure type: Manufacturer Specific Data.
pub const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// LE General Discoverable Mode flag bit.
pub const FLAG_LE_GENERAL_DISCOVERABLE: u8 = 1 << 1;
/// BR/EDR Not Supported flag bit.
pub const FLAG_BR_EDR_NOT_SUPPORTED: u8 = 1 << 2;

/// Maximum combined length of AD structures in one advertising payload
/// (legacy advertising PDU budget).
pub const MAX_AD_PAYLOAD_LEN: usize = 31;

/// Wraps `payload` in a length-prefixed GAP AD structure: `{len, type,
/// payload}` where `len` covers `type` plus `payload`.
fn ad_structure(ad_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + payload.len());
    out.push((payload.len() + 1) as u8);
    out.push(ad_type);
    out.extend_from_slice(payload);
    out
}

/// The flags AD structure every HAP-BLE advertisement opens with:
/// `LE General Discoverable Mode | BR/EDR Not Supported` ([HAP] Section
/// 7.4.2, `spec.md` §4.C11).
#[must_use]
pub fn flags_ad() -> Vec<u8> {
    ad_structure(AD_TYPE_FLAGS, &[FLAG_LE_GENERAL_DISCOVERABLE | FLAG_BR_EDR_NOT_SUPPORTED])
}

/// Wraps already-built manufacturer data (the output of
/// [`regular_manufacturer_data`] or
/// [`encrypted_notification_manufacturer_data`]) in its AD structure.
#[must_use]
pub fn manufacturer_data_ad(manufacturer_data: &[u8]) -> Vec<u8> {
    ad_structure(AD_TYPE_MANUFACTURER_DATA, manufacturer_data)
}

/// Fast-initial advertising window after server start.
pub const FAST_INITIAL: Duration = Duration::from_secs(30);
/// Fast-reconnect advertising window after a disconnect.
pub const FAST_RECONNECT: Duration = Duration::from_secs(3);
/// Advertising interval during fast windows.
pub const FAST_INTERVAL_MS: u32 = 20;
/// Width of the broadcasted/disconnected-event coalescing window.
pub const EVENT_WINDOW: Duration = Duration::from_secs(3);

/// Wraps a 32-bit Configuration Number into the single advertised byte
/// ([HAP] Section 7.4.2.1: `((CN - 1) mod 255) + 1`).
#[must_use]
pub fn wrapped_config_number(cn: u32) -> u8 {
    (((cn.wrapping_sub(1)) % 255) + 1) as u8
}

/// Builds the regular advertisement's manufacturer data payload.
///
/// `setup_hash` is the optional 4-byte hash ([HAP] Section 7.4.2.1);
/// omitted when the platform has not computed one (no display/NFC/QR).
#[must_use]
pub fn regular_manufacturer_data(
    device_id: [u8; 6],
    category: u16,
    gsn: Gsn,
    configuration_number: u32,
    is_paired: bool,
    setup_hash: Option<[u8; 4]>,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&COMPANY_ID.to_le_bytes());
    out.push(TYPE_REGULAR);
    let subtype_len = 13 + if setup_hash.is_some() { 4 } else { 0 };
    out.push(subtype_len as u8);
    let status = if is_paired { 0 } else { STATUS_NOT_PAIRED };
    out.push(status);
    out.extend_from_slice(&device_id);
    out.extend_from_slice(&category.to_le_bytes());
    out.extend_from_slice(&gsn.value().to_le_bytes());
    out.push(wrapped_config_number(configuration_number));
    out.push(COMPATIBILITY_VERSION);
    if let Some(hash) = setup_hash {
        out.extend_from_slice(&hash);
    }
    out
}

/// Builds the encrypted-notification manufacturer data payload ([HAP]
/// Section 7.4.2.2.2). `value` is zero-padded/truncated to 8 bytes per
/// the fixed-width broadcast value encoding.
///
/// # Errors
///
/// Propagates AEAD failure (never expected for a well-formed key/nonce).
pub fn encrypted_notification_manufacturer_data(
    advertising_id: [u8; 6],
    gsn: Gsn,
    characteristic_iid: u16,
    value: &[u8],
    broadcast_key: &ControlChannelKey,
) -> Result<Vec<u8>> {
    let mut padded = [0u8; 8];
    let n = value.len().min(8);
    padded[..n].copy_from_slice(&value[..n]);

    let mut plain = Vec::with_capacity(12);
    plain.extend_from_slice(&gsn.value().to_le_bytes());
    plain.extend_from_slice(&characteristic_iid.to_le_bytes());
    plain.extend_from_slice(&padded);

    let nonce = hap_crypto::nonce_from_gsn(gsn.value());
    let mut buf = plain.clone();
    broadcast_key.seal(&nonce, &advertising_id, &mut buf)?;
    // Only a 4-byte truncated tag is carried on the wire.
    let tag_start = buf.len() - hap_crypto::TAG_LEN;
    let ciphertext = &buf[..tag_start];
    let tag = &buf[tag_start..tag_start + 4];

    let mut out = Vec::with_capacity(3 + 6 + ciphertext.len() + 4);
    out.extend_from_slice(&COMPANY_ID.to_le_bytes());
    out.push(TYPE_ENCRYPTED_NOTIFICATION);
    out.extend_from_slice(&advertising_id);
    out.extend_from_slice(ciphertext);
    out.extend_from_slice(tag);
    Ok(out)
}

/// Broadcast value types permitted on the wire ([HAP] Section 7.4.2.2.2:
/// string/TLV8/data are rejected).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BroadcastValue {
    Bool(bool),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Int32(i32),
    Float(f32),
}

impl BroadcastValue {
    #[must_use]
    pub fn to_bytes(self) -> Vec<u8> {
        match self {
            Self::Bool(b) => vec![u8::from(b)],
            Self::UInt8(v) => vec![v],
            Self::UInt16(v) => v.to_le_bytes().to_vec(),
            Self::UInt32(v) => v.to_le_bytes().to_vec(),
            Self::UInt64(v) => v.to_le_bytes().to_vec(),
            Self::Int32(v) => v.to_le_bytes().to_vec(),
            Self::Float(v) => v.to_bits().to_le_bytes().to_vec(),
        }
    }
}

/// GSN lifecycle: advances the GSN exactly once per eligible event and
/// expires the broadcast key on wraparound past `key_expiration_gsn`.
///
/// # Errors
///
/// [`Error::InvalidState`] is never returned today; kept `Result` so the
/// store-backed caller can layer its own persistence failure handling.
pub fn advance_gsn(gsn: Gsn, broadcast: &mut BroadcastParams) -> Result<Gsn> {
    let next = gsn.incremented();
    if broadcast.is_active() && next.value() == broadcast.key_expiration_gsn {
        broadcast.key_expiration_gsn = 0;
        broadcast.key = [0u8; 32];
    }
    Ok(next)
}

/// Assembles the full advertising payload and scan-response payload from a
/// flags AD, a manufacturer data AD, and the accessory's name ([HAP]
/// Section 7.4.2, `spec.md` §4.C11: "A local-name AD follows; if full name
/// does not fit, the short-name AD is used in the adv payload and the full
/// name appears in the scan response.").
///
/// Truncates the name to the nearest UTF-8 character boundary when a
/// shortened form is needed; never splits a multi-byte code point.
#[must_use]
pub fn build_regular_advertisement(manufacturer_data: &[u8], name: &str) -> (Vec<u8>, Vec<u8>) {
    let mut adv = flags_ad();
    adv.extend_from_slice(&manufacturer_data_ad(manufacturer_data));

    let complete_name = ad_structure(AD_TYPE_COMPLETE_LOCAL_NAME, name.as_bytes());
    if adv.len() + complete_name.len() <= MAX_AD_PAYLOAD_LEN {
        adv.extend_from_slice(&complete_name);
        return (adv, Vec::new());
    }

    let budget = MAX_AD_PAYLOAD_LEN.saturating_sub(adv.len() + 2);
    let mut short = name.as_bytes();
    while short.len() > budget || std::str::from_utf8(short).is_err() {
        short = &short[..short.len().saturating_sub(1)];
        if short.is_empty() {
            break;
        }
    }
    adv.extend_from_slice(&ad_structure(AD_TYPE_SHORT_LOCAL_NAME, short));
    (adv, complete_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_number_wraps_at_255() {
        assert_eq!(wrapped_config_number(1), 1);
        assert_eq!(wrapped_config_number(255), 255);
        assert_eq!(wrapped_config_number(256), 1);
    }

    #[test]
    fn regular_payload_has_expected_length_without_hash() {
        let data = regular_manufacturer_data([1, 2, 3, 4, 5, 6], 5, Gsn::default(), 1, false, None);
        assert_eq!(data.len(), 16);
    }

    #[test]
    fn gsn_advance_expires_key_on_reaching_expiration_value() {
        let gsn = Gsn::new(10, false);
        let mut params = BroadcastParams {
            key_expiration_gsn: 11,
            key: [9u8; 32],
            advertising_id: None,
        };
        let next = advance_gsn(gsn, &mut params).unwrap();
        assert_eq!(next.value(), 11);
        assert!(!params.is_active());
    }

    #[test]
    fn short_name_fits_in_adv_payload() {
        let data = regular_manufacturer_data([1, 2, 3, 4, 5, 6], 5, Gsn::default(), 1, false, None);
        let mfg = manufacturer_data_ad(&data);
        assert_eq!(flags_ad(), vec![0x02, 0x01, 0x06]);
        assert_eq!(mfg[0] as usize, mfg.len() - 1);
    }

    #[test]
    fn full_name_fits_adv_payload_has_empty_scan_response() {
        let data = regular_manufacturer_data([1, 2, 3, 4, 5, 6], 5, Gsn::default(), 1, false, None);
        let (adv, scan_response) = build_regular_advertisement(&data, "Lamp");
        assert!(scan_response.is_empty());
        assert!(adv.len() <= MAX_AD_PAYLOAD_LEN);
        assert_eq!(adv[0], 0x02);
        assert_eq!(adv[1], AD_TYPE_FLAGS);
    }

    #[test]
    fn long_name_falls_back_to_short_name_with_full_name_in_scan_response() {
        let data = regular_manufacturer_data([1, 2, 3, 4, 5, 6], 5, Gsn::default(), 1, false, Some([0xAA; 4]));
        let long_name = "A Very Long Accessory Display Name That Cannot Fit";
        let (adv, scan_response) = build_regular_advertisement(&data, long_name);
        assert!(adv.len() <= MAX_AD_PAYLOAD_LEN);

        // Walk the AD structures in `adv` and confirm the last one is a
        // shortened local name, truncated (not the full string).
        let mut offset = 0;
        let mut last_type = None;
        let mut last_payload: &[u8] = &[];
        while offset < adv.len() {
            let len = adv[offset] as usize;
            last_type = Some(adv[offset + 1]);
            last_payload = &adv[offset + 2..offset + 1 + len];
            offset += 1 + len;
        }
        assert_eq!(last_type, Some(AD_TYPE_SHORT_LOCAL_NAME));
        assert!(last_payload.len() < long_name.len());
        assert!(std::str::from_utf8(last_payload).is_ok());

        assert!(!scan_response.is_empty());
        assert_eq!(scan_response[1], AD_TYPE_COMPLETE_LOCAL_NAME);
        assert_eq!(&scan_response[2..], long_name.as_bytes());
    }
}
