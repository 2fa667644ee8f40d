//! IP transport helpers ([HAP] Section 6.7-6.8, `spec.md` §4.C13,
//! `SPEC_FULL.md` §C): `/characteristics` write-request JSON parsing and
//! `EVENT/1.0` notification batch framing. Neither a JSON parser nor an
//! HTTP server lives here; both build on the external reader interfaces
//! in [`crate::platform`].

use crate::error::{Error, Result};
use crate::platform::JsonEvent;

/// A JSON number's raw decimal token, classified without precision loss
/// ([HAP] Section 6.8, `spec.md` §8 Scenario 5): negative tokens parse
/// signed, non-negative tokens parse unsigned (so `u64::MAX` round-trips
/// exactly), and any token carrying a fraction or exponent parses as a
/// float.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum JsonNumber {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
}

impl JsonNumber {
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] if `raw` is not a valid JSON number
    /// token, or an integer token overflows 64 bits.
    pub fn from_token(raw: &str) -> Result<Self> {
        if raw.contains(['.', 'e', 'E']) {
            return raw.parse::<f64>().map(Self::Float).map_err(|_| Error::InvalidData);
        }
        if raw.starts_with('-') {
            return raw.parse::<i64>().map(Self::Signed).map_err(|_| Error::InvalidData);
        }
        raw.parse::<u64>().map(Self::Unsigned).map_err(|_| Error::InvalidData)
    }
}

/// A minimal JSON value tree, built from a flat [`JsonEvent`] stream so
/// the write-request parser can walk it by key rather than by token
/// position.
#[derive(Clone, Debug, PartialEq)]
enum JsonValue {
    Object(Vec<(String, JsonValue)>),
    Array(Vec<JsonValue>),
    String(String),
    Number(String),
    Bool(bool),
    Null,
}

fn build_value(events: &[JsonEvent], pos: usize) -> Result<(JsonValue, usize)> {
    match events.get(pos).ok_or(Error::InvalidData)? {
        JsonEvent::BeginObject { .. } => build_object(events, pos + 1),
        JsonEvent::BeginArray { .. } => build_array(events, pos + 1),
        JsonEvent::String { value, .. } => Ok((JsonValue::String(value.clone()), pos + 1)),
        JsonEvent::Number { raw, .. } => Ok((JsonValue::Number(raw.clone()), pos + 1)),
        JsonEvent::True { .. } => Ok((JsonValue::Bool(true), pos + 1)),
        JsonEvent::False { .. } => Ok((JsonValue::Bool(false), pos + 1)),
        JsonEvent::Null { .. } => Ok((JsonValue::Null, pos + 1)),
        JsonEvent::EndObject { .. } | JsonEvent::EndArray { .. } | JsonEvent::Error => Err(Error::InvalidData),
    }
}

fn build_object(events: &[JsonEvent], mut pos: usize) -> Result<(JsonValue, usize)> {
    let mut members = Vec::new();
    loop {
        match events.get(pos).ok_or(Error::InvalidData)? {
            JsonEvent::EndObject { .. } => return Ok((JsonValue::Object(members), pos + 1)),
            JsonEvent::String { value, .. } => {
                let key = value.clone();
                let (val, next) = build_value(events, pos + 1)?;
                members.push((key, val));
                pos = next;
            }
            _ => return Err(Error::InvalidData),
        }
    }
}

fn build_array(events: &[JsonEvent], mut pos: usize) -> Result<(JsonValue, usize)> {
    let mut items = Vec::new();
    loop {
        if matches!(events.get(pos), Some(JsonEvent::EndArray { .. })) {
            return Ok((JsonValue::Array(items), pos + 1));
        }
        let (val, next) = build_value(events, pos)?;
        items.push(val);
        pos = next;
    }
}

/// One `{aid, iid, value}` entry of a `/characteristics` write request.
#[derive(Clone, Debug, PartialEq)]
pub struct CharacteristicWrite {
    pub aid: u64,
    pub iid: u64,
    pub value: JsonNumber,
}

/// A parsed `/characteristics` write request body ([HAP] Section 6.8.3).
#[derive(Clone, Debug, PartialEq)]
pub struct WriteRequest {
    pub characteristics: Vec<CharacteristicWrite>,
    /// The request's Timed Write PID, if present.
    pub pid: Option<u64>,
}

fn expect_unsigned(value: JsonValue) -> Result<u64> {
    let JsonValue::Number(raw) = value else { return Err(Error::InvalidData) };
    match JsonNumber::from_token(&raw)? {
        JsonNumber::Unsigned(v) => Ok(v),
        _ => Err(Error::InvalidData),
    }
}

fn expect_number(value: JsonValue) -> Result<JsonNumber> {
    let JsonValue::Number(raw) = value else { return Err(Error::InvalidData) };
    JsonNumber::from_token(&raw)
}

fn parse_characteristic_write(value: JsonValue) -> Result<CharacteristicWrite> {
    let JsonValue::Object(members) = value else { return Err(Error::InvalidData) };
    let mut aid = None;
    let mut iid = None;
    let mut val = None;
    for (key, v) in members {
        match key.as_str() {
            "aid" => aid = Some(expect_unsigned(v)?),
            "iid" => iid = Some(expect_unsigned(v)?),
            "value" => val = Some(expect_number(v)?),
            _ => {}
        }
    }
    Ok(CharacteristicWrite {
        aid: aid.ok_or(Error::InvalidData)?,
        iid: iid.ok_or(Error::InvalidData)?,
        value: val.ok_or(Error::InvalidData)?,
    })
}

/// Parses a `/characteristics` PUT body from its tokenized event stream
/// ([HAP] `HAPJSONUtils.c`, `spec.md` §8 Scenarios 3-5).
///
/// # Errors
///
/// Returns [`Error::InvalidData`] if the body is not a well-formed
/// write-request object, a `characteristics` entry is missing `aid`/
/// `iid`/`value`, or the top-level `pid` member appears more than once.
pub fn parse_write_request(events: &[JsonEvent]) -> Result<WriteRequest> {
    let (root, _) = build_value(events, 0)?;
    let JsonValue::Object(members) = root else { return Err(Error::InvalidData) };

    if members.iter().filter(|(k, _)| k == "pid").count() > 1 {
        return Err(Error::InvalidData);
    }

    let mut characteristics = Vec::new();
    let mut pid = None;
    for (key, value) in members {
        match key.as_str() {
            "characteristics" => {
                let JsonValue::Array(items) = value else { return Err(Error::InvalidData) };
                for item in items {
                    characteristics.push(parse_characteristic_write(item)?);
                }
            }
            "pid" => pid = Some(expect_unsigned(value)?),
            _ => {}
        }
    }
    Ok(WriteRequest { characteristics, pid })
}

/// Builds the `EVENT/1.0 200 OK` notification batch for one session's
/// coalesced changes ([HAP] `HAPAccessoryServer+IP.c`, `SPEC_FULL.md`
/// §C). `value_json` is each change's already-serialized JSON value
/// token; characteristic-specific formatting is out of scope here.
#[must_use]
pub fn event_batch(changes: &[(u64, u64, String)]) -> Vec<u8> {
    let mut body = String::from(r#"{"characteristics":["#);
    for (i, (aid, iid, value_json)) in changes.iter().enumerate() {
        if i > 0 {
            body.push(',');
        }
        body.push_str(&format!(r#"{{"aid":{aid},"iid":{iid},"value":{value_json}}}"#));
    }
    body.push_str("]}");

    let mut out = Vec::new();
    out.extend_from_slice(b"EVENT/1.0 200 OK\r\n");
    out.extend_from_slice(b"Content-Type: application/hap+json\r\n");
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    out.extend_from_slice(body.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn str_ev(s: &str) -> JsonEvent {
        JsonEvent::String { value: s.to_string(), offset: 0 }
    }
    fn num_ev(s: &str) -> JsonEvent {
        JsonEvent::Number { raw: s.to_string(), offset: 0 }
    }

    /// Scenario 3: three writes plus a single top-level `pid`.
    #[test]
    fn scenario_3_write_request_parses_three_characteristics_and_pid() {
        let events = vec![
            JsonEvent::BeginObject { offset: 0 },
            str_ev("characteristics"),
            JsonEvent::BeginArray { offset: 0 },
            JsonEvent::BeginObject { offset: 0 },
            str_ev("aid"),
            num_ev("2"),
            str_ev("iid"),
            num_ev("6"),
            str_ev("value"),
            num_ev("1"),
            JsonEvent::EndObject { offset: 0 },
            JsonEvent::BeginObject { offset: 0 },
            str_ev("aid"),
            num_ev("2"),
            str_ev("iid"),
            num_ev("7"),
            str_ev("value"),
            num_ev("3"),
            JsonEvent::EndObject { offset: 0 },
            JsonEvent::BeginObject { offset: 0 },
            str_ev("aid"),
            num_ev("2"),
            str_ev("iid"),
            num_ev("8"),
            str_ev("value"),
            num_ev("4"),
            JsonEvent::EndObject { offset: 0 },
            JsonEvent::EndArray { offset: 0 },
            str_ev("pid"),
            num_ev("11122333"),
            JsonEvent::EndObject { offset: 0 },
        ];
        let req = parse_write_request(&events).unwrap();
        assert_eq!(req.pid, Some(11_122_333));
        assert_eq!(req.characteristics.len(), 3);
        assert_eq!(req.characteristics[0].aid, 2);
        assert_eq!(req.characteristics[0].iid, 6);
        assert_eq!(req.characteristics[0].value, JsonNumber::Unsigned(1));
        assert_eq!(req.characteristics[2].iid, 8);
        assert_eq!(req.characteristics[2].value, JsonNumber::Unsigned(4));
    }

    /// Scenario 4: a duplicate top-level `pid` is rejected.
    #[test]
    fn scenario_4_duplicate_pid_is_rejected() {
        let events = vec![
            JsonEvent::BeginObject { offset: 0 },
            str_ev("pid"),
            num_ev("1"),
            str_ev("pid"),
            num_ev("2"),
            JsonEvent::EndObject { offset: 0 },
        ];
        assert_eq!(parse_write_request(&events), Err(Error::InvalidData));
    }

    /// Scenario 5: numeric typing across the signed/unsigned boundary.
    #[test]
    fn scenario_5_numeric_typing_matches_sign_and_range() {
        let cases: &[(&str, JsonNumber)] = &[
            ("-2147483648", JsonNumber::Signed(-2_147_483_648)),
            ("-1", JsonNumber::Signed(-1)),
            ("0", JsonNumber::Unsigned(0)),
            ("1", JsonNumber::Unsigned(1)),
            ("2147483648", JsonNumber::Unsigned(2_147_483_648)),
            ("4294967296", JsonNumber::Unsigned(4_294_967_296)),
            ("9223372036854775808", JsonNumber::Unsigned(9_223_372_036_854_775_808)),
            ("18446744073709551615", JsonNumber::Unsigned(18_446_744_073_709_551_615)),
        ];
        for (raw, expected) in cases {
            assert_eq!(JsonNumber::from_token(raw).unwrap(), *expected);
        }
    }

    #[test]
    fn event_batch_frames_one_change_as_event_1_0() {
        let changes = vec![(1u64, 10u64, "true".to_string())];
        let bytes = event_batch(&changes);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("EVENT/1.0 200 OK\r\n"));
        assert!(text.ends_with(r#"{"characteristics":[{"aid":1,"iid":10,"value":true}]}"#));
    }

    #[test]
    fn missing_required_member_is_rejected() {
        let events = vec![
            JsonEvent::BeginObject { offset: 0 },
            str_ev("characteristics"),
            JsonEvent::BeginArray { offset: 0 },
            JsonEvent::BeginObject { offset: 0 },
            str_ev("aid"),
            num_ev("2"),
            JsonEvent::EndObject { offset: 0 },
            JsonEvent::EndArray { offset: 0 },
            JsonEvent::EndObject { offset: 0 },
        ];
        assert_eq!(parse_write_request(&events), Err(Error::InvalidData));
    }
}
