//! Multi-sensor temperature + infrared modules (frametype 0x307).
//!
//! Up to four temperature sensors per module; frames carry the sensor index
//! in data[1] and the selector in data[2]: 0x17 current temperature, 0x18
//! thermostat, 0xF6 sensor error. The module's IR transmitter is driven by
//! literal instruction payloads on its own command topic.

use crate::{payload, temperature, DecodeError};
use config::TimModule;
use hapcan::{frame_type, Frame};
use routing::{CanRule, MqttRule, RoutingTable};
use tracing::warn;

/// Template selector marking the IR transmitter command rule.
pub const IR_SELECTOR: u8 = 0xC0;

fn state_rule(node: u8, group: u8, sensor: u8, selector: u8, topic: &str) -> CanRule {
    let mut mask = Frame::default();
    mask.frametype = 0xFFF;
    mask.module = 0xFF;
    mask.group = 0xFF;
    mask.data[1] = 0xFF;
    mask.data[2] = 0xFF;
    let mut check = Frame::default();
    check.frametype = frame_type::MULTI_TEMPERATURE;
    check.module = node;
    check.group = group;
    check.data[1] = sensor - 1;
    check.data[2] = selector;
    CanRule {
        mask,
        check,
        state_topic: Some(topic.to_string()),
    }
}

/// Add the sensors and IR transmitter of one TIM module to the routing table.
pub fn register(module: &TimModule, computer_id: (u8, u8), routing: &RoutingTable) {
    for sensor in &module.temperature {
        if !(1..=4).contains(&sensor.channel) {
            warn!(
                node = module.node,
                group = module.group,
                channel = sensor.channel,
                "temperature sensor out of range, skipped"
            );
            continue;
        }
        if let Some(state) = &sensor.temperature_state {
            routing.add_can_to_mqtt(state_rule(
                module.node,
                module.group,
                sensor.channel,
                0x17,
                state,
            ));
        }
        if let Some(state) = &sensor.thermostat_state {
            routing.add_can_to_mqtt(state_rule(
                module.node,
                module.group,
                sensor.channel,
                0x18,
                state,
            ));
        }
        if let Some(command) = &sensor.thermostat_command {
            let mut template = Frame::default();
            template.frametype = frame_type::MULTI_TEMPERATURE;
            template.module = computer_id.0;
            template.group = computer_id.1;
            template.data[1] = 0x18;
            template.data[2] = module.node;
            template.data[3] = module.group;
            template.data[5] = sensor.channel - 1;
            routing.add_mqtt_to_can(MqttRule {
                command_topic: command.clone(),
                template,
            });
        }
        if let Some(state) = &sensor.error_state {
            routing.add_can_to_mqtt(state_rule(
                module.node,
                module.group,
                sensor.channel,
                0xF6,
                state,
            ));
        }
    }
    if let Some(command) = &module.ir_command {
        let mut template = Frame::default();
        template.frametype = frame_type::MULTI_TEMPERATURE;
        template.module = computer_id.0;
        template.group = computer_id.1;
        template.data[1] = IR_SELECTOR;
        template.data[2] = module.node;
        template.data[3] = module.group;
        routing.add_mqtt_to_can(MqttRule {
            command_topic: command.clone(),
            template,
        });
    }
}

/// Build the state payload for a TIM frame, selected by data[2].
pub fn state_payload(frame: &Frame) -> Result<String, DecodeError> {
    match frame.data[2] {
        0x17 => Ok(temperature::current_payload(frame)),
        0x18 => Ok(temperature::thermostat_payload(frame)),
        0xF6 => Ok(frame.data[3].to_string()),
        other => Err(DecodeError::UnknownSelector(other)),
    }
}

/// Build the direct-control frame(s) for a matched TIM command.
///
/// The template's data[1] selector picks the branch: 0x18 thermostat
/// (sensor index preset in data[5] at registration), 0xC0 IR transmitter
/// (literal INSTR1..6 JSON).
pub fn command_frames(template: &Frame, payload_bytes: &[u8]) -> Result<Vec<Frame>, DecodeError> {
    let mut frame = *template;
    let text = payload::text(payload_bytes).ok_or(DecodeError::InvalidPayload)?;
    let ok = match template.data[1] {
        0x18 => {
            // data[5] carries the sensor index preset at registration.
            temperature::encode_thermostat_command(&mut frame, text, payload_bytes, 0x01, true, true)
        }
        IR_SELECTOR => {
            let Some(value) = payload::json_object(payload_bytes) else {
                return Err(DecodeError::InvalidPayload);
            };
            payload::apply_instructions(
                &mut frame,
                &value,
                &[
                    ("INSTR1", 0),
                    ("INSTR2", 1),
                    ("INSTR3", 4),
                    ("INSTR4", 5),
                    ("INSTR5", 6),
                    ("INSTR6", 7),
                ],
            )
        }
        other => return Err(DecodeError::UnknownSelector(other)),
    };
    if !ok {
        return Err(DecodeError::InvalidPayload);
    }
    frame.frametype = frame_type::DIRECT_CONTROL;
    Ok(vec![frame])
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{TimModule, TimSensor};
    use serde_json::Value;

    fn module() -> TimModule {
        TimModule {
            node: 7,
            group: 2,
            temperature: vec![TimSensor {
                channel: 2,
                temperature_state: Some("tim/t2".into()),
                thermostat_state: Some("tim/th2".into()),
                thermostat_command: Some("tim/th2/set".into()),
                error_state: Some("tim/err2".into()),
            }],
            ir_command: Some("tim/ir".into()),
        }
    }

    #[test]
    fn test_register_counts() {
        let routing = RoutingTable::new();
        register(&module(), (0xFE, 0xFE), &routing);
        assert_eq!(routing.can_rule_count(), 3);
        assert_eq!(routing.mqtt_rule_count(), 2);
    }

    #[test]
    fn test_state_rule_keyed_on_sensor_index() {
        let routing = RoutingTable::new();
        register(&module(), (0xFE, 0xFE), &routing);

        let mut frame = Frame::new(frame_type::MULTI_TEMPERATURE, 7, 2, [0; 8]);
        frame.data[1] = 1; // sensor 2
        frame.data[2] = 0x17;
        assert!(routing.match_can_frame(&frame, 0).is_some());

        frame.data[1] = 0; // sensor 1, not configured
        assert!(routing.match_can_frame(&frame, 0).is_none());
    }

    #[test]
    fn test_current_temperature_selector() {
        let mut frame = Frame::default();
        frame.data = [0, 1, 0x17, 0x01, 0xC0, 0x01, 0x80, 0x0F];
        let value: Value = serde_json::from_str(&state_payload(&frame).unwrap()).unwrap();
        assert_eq!(value["Temperature"], 28.0);
    }

    #[test]
    fn test_error_selector() {
        let mut frame = Frame::default();
        frame.data[2] = 0xF6;
        frame.data[3] = 5;
        assert_eq!(state_payload(&frame).unwrap(), "5");
    }

    #[test]
    fn test_thermostat_command_keeps_sensor_byte() {
        let routing = RoutingTable::new();
        register(&module(), (0xFE, 0xFE), &routing);
        let (_, template) = routing.match_topic("tim/th2/set", 0).unwrap();
        assert_eq!(template.data[5], 1);

        let frames = command_frames(&template, b"ON").unwrap();
        assert_eq!(frames[0].data[0], 0x07);
        assert_eq!(frames[0].data[1], 0x01);
        assert_eq!(frames[0].data[5], 1);
    }

    #[test]
    fn test_ir_command_literal_instructions() {
        let routing = RoutingTable::new();
        register(&module(), (0xFE, 0xFE), &routing);
        let (_, template) = routing.match_topic("tim/ir", 0).unwrap();
        assert_eq!(template.data[1], IR_SELECTOR);

        let frames = command_frames(
            &template,
            br#"{"INSTR1": 224, "INSTR2": 1, "INSTR3": 2, "INSTR4": 3, "INSTR5": 4, "INSTR6": 5}"#,
        )
        .unwrap();
        let frame = frames[0];
        assert_eq!(frame.frametype, frame_type::DIRECT_CONTROL);
        assert_eq!(frame.data, [224, 1, 7, 2, 2, 3, 4, 5]);
    }

    #[test]
    fn test_ir_command_rejects_non_json() {
        let routing = RoutingTable::new();
        register(&module(), (0xFE, 0xFE), &routing);
        let (_, template) = routing.match_topic("tim/ir", 0).unwrap();
        assert!(command_frames(&template, b"ON").is_err());
    }
}
