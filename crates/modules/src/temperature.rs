//! Single-sensor temperature modules (frametype 0x304).
//!
//! The sensor shares its physical module with a button board, so its
//! configuration lives inside the button module entry. Four sub-messages
//! are selected by data[2]: 0x11 current temperature, 0x12 thermostat,
//! 0x13 temperature controller, 0xF0 sensor error.

use crate::{payload, DecodeError};
use config::ButtonModule;
use hapcan::{frame_type, Frame};
use routing::{CanRule, MqttRule, RoutingTable};
use serde_json::{json, Map, Value};

/// Temperature readings are 1/16 °C steps in a signed 16-bit pair.
pub const DEGREE_STEP: f64 = 0.0625;

fn state_rule(node: u8, group: u8, selector: u8, topic: &str) -> CanRule {
    let mut mask = Frame::default();
    mask.frametype = 0xFFF;
    mask.module = 0xFF;
    mask.group = 0xFF;
    mask.data[2] = 0xFF;
    let mut check = Frame::default();
    check.frametype = frame_type::TEMPERATURE;
    check.module = node;
    check.group = group;
    check.data[2] = selector;
    CanRule {
        mask,
        check,
        state_topic: Some(topic.to_string()),
    }
}

fn command_rule(
    node: u8,
    group: u8,
    selector: u8,
    computer_id: (u8, u8),
    topic: &str,
) -> MqttRule {
    let mut template = Frame::default();
    template.frametype = frame_type::TEMPERATURE;
    template.module = computer_id.0;
    template.group = computer_id.1;
    // The selector rides in data[1] until the decoder replaces it with the
    // direct-control instruction bytes.
    template.data[1] = selector;
    template.data[2] = node;
    template.data[3] = group;
    MqttRule {
        command_topic: topic.to_string(),
        template,
    }
}

/// Add the temperature subsystem of one module to the routing table.
pub fn register(module: &ButtonModule, computer_id: (u8, u8), routing: &RoutingTable) {
    let (node, group) = (module.node, module.group);
    if let Some(temperature) = &module.temperature {
        if let Some(state) = &temperature.state {
            routing.add_can_to_mqtt(state_rule(node, group, 0x11, state));
        }
    }
    if let Some(thermostat) = &module.thermostat {
        if let Some(state) = &thermostat.state {
            routing.add_can_to_mqtt(state_rule(node, group, 0x12, state));
        }
        if let Some(command) = &thermostat.command {
            routing.add_mqtt_to_can(command_rule(node, group, 0x12, computer_id, command));
        }
    }
    if let Some(controller) = &module.temperature_controller {
        if let Some(state) = &controller.state {
            routing.add_can_to_mqtt(state_rule(node, group, 0x13, state));
        }
        if let Some(command) = &controller.command {
            routing.add_mqtt_to_can(command_rule(node, group, 0x13, computer_id, command));
        }
    }
    if let Some(error) = &module.temperature_error {
        if let Some(state) = &error.state {
            routing.add_can_to_mqtt(state_rule(node, group, 0xF0, state));
        }
    }
}

fn sixteenths(hi: u8, lo: u8) -> f64 {
    f64::from(i16::from_be_bytes([hi, lo])) * DEGREE_STEP
}

fn on_off(byte: u8) -> Option<&'static str> {
    match byte {
        0x00 => Some("OFF"),
        0xFF => Some("ON"),
        _ => None,
    }
}

/// Build the current-temperature JSON payload.
pub(crate) fn current_payload(frame: &Frame) -> String {
    json!({
        "Temperature": sixteenths(frame.data[3], frame.data[4]),
        "Thermostat": sixteenths(frame.data[5], frame.data[6]),
        "Hysteresis": f64::from(u16::from(frame.data[7]) + 1) * DEGREE_STEP,
    })
    .to_string()
}

/// Build the thermostat JSON payload. The state field is omitted for
/// unexpected state bytes.
pub(crate) fn thermostat_payload(frame: &Frame) -> String {
    let mut object = Map::new();
    object.insert("Position".into(), Value::from(frame.data[3]));
    if let Some(state) = on_off(frame.data[7]) {
        object.insert("State".into(), Value::from(state));
    }
    Value::Object(object).to_string()
}

fn controller_payload(frame: &Frame) -> String {
    let mut object = Map::new();
    if let Some(state) = on_off(frame.data[3]) {
        object.insert("HeatState".into(), Value::from(state));
    }
    object.insert("HeatValue".into(), Value::from(frame.data[4]));
    if let Some(state) = on_off(frame.data[5]) {
        object.insert("CoolState".into(), Value::from(state));
    }
    object.insert("CoolValue".into(), Value::from(frame.data[6]));
    if let Some(state) = on_off(frame.data[7]) {
        object.insert("ControlState".into(), Value::from(state));
    }
    Value::Object(object).to_string()
}

/// Build the state payload for a temperature frame, selected by data[2].
pub fn state_payload(frame: &Frame) -> Result<String, DecodeError> {
    match frame.data[2] {
        0x11 => Ok(current_payload(frame)),
        0x12 => Ok(thermostat_payload(frame)),
        0x13 => Ok(controller_payload(frame)),
        0xF0 => Ok(frame.data[3].to_string()),
        other => Err(DecodeError::UnknownSelector(other)),
    }
}

/// Encode a thermostat-subsystem command into the shared THMSB/THLSB slots.
///
/// `subsystem` is 0x01 for the thermostat, 0x02 for the controller.
/// `sensor_slot` keeps data[5] untouched for the multi-sensor family, where
/// it carries the sensor index preset at registration.
pub(crate) fn encode_thermostat_command(
    frame: &mut Frame,
    text: &str,
    payload_bytes: &[u8],
    subsystem: u8,
    allow_setpoint: bool,
    sensor_slot: bool,
) -> bool {
    match text {
        "ON" | "OFF" | "TOGGLE" => {
            frame.data[0] = match text {
                "ON" => 0x07,
                "OFF" => 0x06,
                _ => 0x08,
            };
            frame.data[1] = subsystem;
            frame.data[4] = 0xFF;
            if !sensor_slot {
                frame.data[5] = 0xFF;
            }
            frame.data[6] = 0xFF;
            frame.data[7] = 0xFF;
            true
        }
        _ if allow_setpoint => {
            if let Some(setpoint) = payload::parse_f64_in(text, -55.0, 125.0) {
                apply_setpoint(frame, setpoint, sensor_slot);
                return true;
            }
            let Some(value) = payload::json_object(payload_bytes) else {
                return false;
            };
            if let Some(setpoint) = value
                .get("Setpoint")
                .and_then(Value::as_f64)
                .filter(|v| (-55.0..=125.0).contains(v))
            {
                apply_setpoint(frame, setpoint, sensor_slot);
                true
            } else if let Some(step) = step_field(&value, "Increase") {
                apply_step(frame, 0x05, step, sensor_slot);
                true
            } else if let Some(step) = step_field(&value, "Decrease") {
                apply_step(frame, 0x04, step, sensor_slot);
                true
            } else {
                false
            }
        }
        _ => false,
    }
}

fn step_field(value: &Value, field: &str) -> Option<f64> {
    value
        .get(field)
        .and_then(Value::as_f64)
        .filter(|v| *v > 0.0 && *v <= 16.0)
}

fn apply_setpoint(frame: &mut Frame, setpoint: f64, sensor_slot: bool) {
    let raw = (setpoint / DEGREE_STEP) as i16;
    frame.data[0] = 0x03;
    frame.data[1] = (raw >> 8) as u8;
    frame.data[4] = (raw & 0xFF) as u8;
    if !sensor_slot {
        frame.data[5] = 0xFF;
    }
    frame.data[6] = 0xFF;
    frame.data[7] = 0xFF;
}

fn apply_step(frame: &mut Frame, instr1: u8, step: f64, sensor_slot: bool) {
    // A full 16-degree step wraps to the zero sentinel ("one unit").
    let step = if step > 15.95 { 0.0 } else { step };
    let raw = (step / DEGREE_STEP) as i16;
    frame.data[0] = instr1;
    frame.data[1] = (raw & 0xFF) as u8;
    frame.data[4] = 0xFF;
    if !sensor_slot {
        frame.data[5] = 0xFF;
    }
    frame.data[6] = 0xFF;
    frame.data[7] = 0xFF;
}

/// Build the direct-control frame(s) for a matched temperature command.
///
/// The template's data[1] selector picks the branch: 0x12 thermostat
/// (accepts ON/OFF/TOGGLE, a bare setpoint, or Setpoint/Increase/Decrease
/// JSON), 0x13 controller (ON/OFF/TOGGLE only).
pub fn command_frames(template: &Frame, payload_bytes: &[u8]) -> Result<Vec<Frame>, DecodeError> {
    let mut frame = *template;
    let text = payload::text(payload_bytes).ok_or(DecodeError::InvalidPayload)?;
    let ok = match template.data[1] {
        0x12 => encode_thermostat_command(&mut frame, text, payload_bytes, 0x01, true, false),
        0x13 => encode_thermostat_command(&mut frame, text, payload_bytes, 0x02, false, false),
        other => return Err(DecodeError::UnknownSelector(other)),
    };
    if !ok {
        return Err(DecodeError::InvalidPayload);
    }
    frame.frametype = frame_type::DIRECT_CONTROL;
    Ok(vec![frame])
}
