//! Shared MQTT payload parsing helpers.

use hapcan::Frame;
use serde_json::Value;

/// Interpret a payload as UTF-8 text, trimmed of surrounding whitespace.
pub fn text(payload: &[u8]) -> Option<&str> {
    std::str::from_utf8(payload).ok().map(str::trim)
}

/// Parse a decimal or `0x`-prefixed hexadecimal integer.
pub fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

/// Parse an integer and validate it against an inclusive range.
pub fn parse_int_in(s: &str, min: i64, max: i64) -> Option<i64> {
    parse_int(s).filter(|v| (min..=max).contains(v))
}

/// Parse a float and validate it against an inclusive range.
pub fn parse_f64_in(s: &str, min: f64, max: f64) -> Option<f64> {
    s.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| *v >= min && *v <= max)
}

/// Parse exactly `count` comma-separated integers, each within min..=max.
pub fn parse_csv_in(s: &str, count: usize, min: i64, max: i64) -> Option<Vec<u8>> {
    let values: Vec<i64> = s
        .split(',')
        .map(|part| parse_int_in(part, min, max))
        .collect::<Option<_>>()?;
    if values.len() == count {
        Some(values.into_iter().map(|v| v as u8).collect())
    } else {
        None
    }
}

/// Parse the payload as a JSON object.
pub fn json_object(payload: &[u8]) -> Option<Value> {
    serde_json::from_slice::<Value>(payload)
        .ok()
        .filter(Value::is_object)
}

/// Read an integer field from a JSON object, validated to 0..=255.
pub fn json_byte(value: &Value, field: &str) -> Option<u8> {
    value
        .get(field)
        .and_then(Value::as_i64)
        .filter(|v| (0..=255).contains(v))
        .map(|v| v as u8)
}

/// Apply a set of `INSTRn` JSON fields to frame data positions.
///
/// Every listed field is required and must be in 0..=255; any missing or
/// out-of-range field invalidates the whole payload.
pub fn apply_instructions(
    frame: &mut Frame,
    value: &Value,
    fields: &[(&str, usize)],
) -> bool {
    for (name, position) in fields {
        match json_byte(value, name) {
            Some(byte) => frame.data[*position] = byte,
            None => return false,
        }
    }
    true
}
