//! Small self-contained validators used across the core: UTF-8
//! well-formedness, setup-code format, and the setup-hash primitive
//! (`spec.md` §4.C12, §8).

/// Validates `bytes` as well-formed UTF-8 per Unicode 6.0 Table 3-7.
///
/// This is deliberately not `std::str::from_utf8`: the ADK's original
/// exhaustive UTF-8 test table is stricter about certain overlong/
/// surrogate-adjacent byte ranges in a way that differs subtly from
/// Rust's own validator, so the core reimplements the byte-class state
/// machine directly rather than risk silently accepting a sequence the
/// original would reject (or vice versa).
#[must_use]
pub fn is_valid_utf8(bytes: &[u8]) -> bool {
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i];
        let len = match b0 {
            0x00..=0x7F => 1,
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => return false,
        };
        if i + len > bytes.len() {
            return false;
        }
        let ok = match len {
            1 => true,
            2 => is_continuation(bytes[i + 1]),
            3 => {
                let b1 = bytes[i + 1];
                let b1_ok = match b0 {
                    0xE0 => (0xA0..=0xBF).contains(&b1),
                    0xED => (0x80..=0x9F).contains(&b1),
                    _ => is_continuation(b1),
                };
                b1_ok && is_continuation(bytes[i + 2])
            }
            4 => {
                let b1 = bytes[i + 1];
                let b1_ok = match b0 {
                    0xF0 => (0x90..=0xBF).contains(&b1),
                    0xF4 => (0x80..=0x8F).contains(&b1),
                    _ => is_continuation(b1),
                };
                b1_ok && is_continuation(bytes[i + 2]) && is_continuation(bytes[i + 3])
            }
            _ => unreachable!(),
        };
        if !ok {
            return false;
        }
        i += len;
    }
    true
}

const fn is_continuation(b: u8) -> bool {
    b & 0xC0 == 0x80
}

/// Setup codes forbidden outright regardless of the all-repeated-digits
/// rule ([HAP] Section 4.3.1, `spec.md` §6 CLI).
const FORBIDDEN_SETUP_CODES: &[&str] = &["123-45-678", "876-54-321"];

/// Validates a setup code's `XXX-XX-XXX` format and rejects the
/// degenerate values HAP disallows: all eight digits identical, and the
/// two sequential patterns.
#[must_use]
pub fn is_valid_setup_code(code: &str) -> bool {
    let bytes = code.as_bytes();
    if bytes.len() != 10 {
        return false;
    }
    let digit_positions = [0, 1, 2, 4, 5, 7, 8, 9];
    if bytes[3] != b'-' || bytes[6] != b'-' {
        return false;
    }
    let mut digits = [0u8; 8];
    for (slot, &pos) in digit_positions.iter().enumerate() {
        let b = bytes[pos];
        if !b.is_ascii_digit() {
            return false;
        }
        digits[slot] = b;
    }
    if digits.iter().all(|&d| d == digits[0]) {
        return false;
    }
    if FORBIDDEN_SETUP_CODES.contains(&code) {
        return false;
    }
    true
}

/// Computes the 4-byte accessory setup hash ([HAP] Section 4.5.2):
/// the first 4 bytes of SHA-512 over the concatenation of the 4-character
/// setup ID and the colon-separated device ID string.
#[must_use]
pub fn setup_hash(setup_id: &str, device_id_string: &str) -> [u8; 4] {
    let mut data = Vec::with_capacity(setup_id.len() + device_id_string.len());
    data.extend_from_slice(setup_id.as_bytes());
    data.extend_from_slice(device_id_string.as_bytes());
    hap_crypto::sha512_prefix4(&data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolated_continuation_byte_is_invalid() {
        assert!(!is_valid_utf8(&[0xA4]));
    }

    #[test]
    fn four_byte_gothic_letter_is_valid() {
        assert!(is_valid_utf8(&[0xF0, 0x90, 0x8C, 0xB2]));
    }

    #[test]
    fn agrees_with_std_on_a_sample_of_ascii_and_multibyte_text() {
        let samples: &[&str] = &["hello", "héllo wörld", "日本語", "🏠🔑"];
        for s in samples {
            assert!(is_valid_utf8(s.as_bytes()));
        }
    }

    #[test]
    fn all_repeated_digits_rejected() {
        assert!(!is_valid_setup_code("000-00-000"));
        assert!(!is_valid_setup_code("999-99-999"));
    }

    #[test]
    fn sequential_patterns_rejected() {
        assert!(!is_valid_setup_code("123-45-678"));
        assert!(!is_valid_setup_code("876-54-321"));
    }

    #[test]
    fn well_formed_code_accepted() {
        assert!(is_valid_setup_code("123-45-679"));
    }

    #[test]
    fn setup_hash_matches_known_vectors() {
        let h1 = setup_hash("7OSX", "E1:91:1A:70:85:AA");
        assert_eq!(hex_upper(&h1), "C9FE1BCF");
        let h2 = setup_hash("7OSX", "C8:D8:58:C6:63:F5");
        assert_eq!(hex_upper(&h2), "EF5D8E9B");
    }

    fn hex_upper(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02X}")).collect()
    }
}
