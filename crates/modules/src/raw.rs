//! Raw passthrough: verbatim frame <-> JSON translation on a configured
//! topic pair, bypassing the routing table.

use crate::{payload, DecodeError};
use hapcan::Frame;
use serde_json::json;

/// Serialize an application frame into the twelve-field JSON shape.
pub fn state_payload(frame: &Frame) -> String {
    json!({
        "Frame": frame.frametype,
        "Flags": frame.flags,
        "Module": frame.module,
        "Group": frame.group,
        "D0": frame.data[0],
        "D1": frame.data[1],
        "D2": frame.data[2],
        "D3": frame.data[3],
        "D4": frame.data[4],
        "D5": frame.data[5],
        "D6": frame.data[6],
        "D7": frame.data[7],
    })
    .to_string()
}

/// Parse the twelve-field JSON shape back into a frame.
///
/// Every field is required; `Frame` must fit 12 bits and `Flags` one bit.
pub fn command_frame(payload_bytes: &[u8]) -> Result<Frame, DecodeError> {
    let value = payload::json_object(payload_bytes).ok_or(DecodeError::InvalidPayload)?;
    let frametype = value
        .get("Frame")
        .and_then(serde_json::Value::as_i64)
        .filter(|v| (0..=0xFFF).contains(v))
        .ok_or(DecodeError::InvalidPayload)? as u16;
    let flags = value
        .get("Flags")
        .and_then(serde_json::Value::as_i64)
        .filter(|v| (0..=1).contains(v))
        .ok_or(DecodeError::InvalidPayload)? as u8;
    let module = payload::json_byte(&value, "Module").ok_or(DecodeError::InvalidPayload)?;
    let group = payload::json_byte(&value, "Group").ok_or(DecodeError::InvalidPayload)?;

    let mut frame = Frame {
        frametype,
        flags,
        module,
        group,
        data: [0; hapcan::DATA_LEN],
    };
    for (index, field) in ["D0", "D1", "D2", "D3", "D4", "D5", "D6", "D7"]
        .iter()
        .enumerate()
    {
        frame.data[index] =
            payload::json_byte(&value, field).ok_or(DecodeError::InvalidPayload)?;
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hapcan::frame_type;
    use serde_json::Value;

    #[test]
    fn test_round_trip() {
        let frame = Frame {
            frametype: frame_type::RELAY,
            flags: 1,
            module: 0x10,
            group: 0x20,
            data: [0, 0, 3, 0xFF, 0, 0, 0, 0],
        };
        let back = command_frame(state_payload(&frame).as_bytes()).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_state_payload_fields() {
        let frame = Frame::new(0x301, 4, 1, [9, 8, 7, 6, 5, 4, 3, 2]);
        let value: Value = serde_json::from_str(&state_payload(&frame)).unwrap();
        assert_eq!(value["Frame"], 0x301);
        assert_eq!(value["Module"], 4);
        assert_eq!(value["D0"], 9);
        assert_eq!(value["D7"], 2);
    }

    #[test]
    fn test_command_frame_missing_field() {
        assert!(command_frame(br#"{"Frame": 769}"#).is_err());
    }

    #[test]
    fn test_command_frame_range_checks() {
        let mut frame = Frame::new(0x301, 1, 1, [0; 8]);
        frame.flags = 0;
        let mut value: Value = serde_json::from_str(&state_payload(&frame)).unwrap();
        value["Frame"] = Value::from(0x1000);
        assert!(command_frame(value.to_string().as_bytes()).is_err());
        value["Frame"] = Value::from(0xFFF);
        value["Flags"] = Value::from(2);
        assert!(command_frame(value.to_string().as_bytes()).is_err());
    }
}
