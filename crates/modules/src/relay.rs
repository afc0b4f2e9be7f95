//! Relay modules (frametype 0x302).

use crate::{payload, DecodeError};
use config::RelayModule;
use hapcan::{frame_type, Frame};
use routing::{CanRule, MqttRule, RoutingTable};
use tracing::warn;

/// Add the configured channels of one relay module to the routing table.
pub fn register(module: &RelayModule, computer_id: (u8, u8), routing: &RoutingTable) {
    for channel in &module.relays {
        if !(1..=6).contains(&channel.channel) {
            warn!(
                node = module.node,
                group = module.group,
                channel = channel.channel,
                "relay channel out of range, skipped"
            );
            continue;
        }
        if let Some(state) = &channel.state {
            let mut mask = Frame::default();
            mask.frametype = 0xFFF;
            mask.module = 0xFF;
            mask.group = 0xFF;
            mask.data[2] = 0xFF;
            let mut check = Frame::default();
            check.frametype = frame_type::RELAY;
            check.module = module.node;
            check.group = module.group;
            check.data[2] = channel.channel;
            routing.add_can_to_mqtt(CanRule {
                mask,
                check,
                state_topic: Some(state.clone()),
            });
        }
        if let Some(command) = &channel.command {
            let mut template = Frame::default();
            template.frametype = frame_type::RELAY;
            template.module = computer_id.0;
            template.group = computer_id.1;
            template.data[1] = 1 << (channel.channel - 1);
            template.data[2] = module.node;
            template.data[3] = module.group;
            routing.add_mqtt_to_can(MqttRule {
                command_topic: command.clone(),
                template,
            });
        }
    }
}

/// Relay state from data[3]: 0x00 open, 0xFF closed.
pub fn state_payload(frame: &Frame) -> Result<&'static str, DecodeError> {
    match frame.data[3] {
        0x00 => Ok("OFF"),
        0xFF => Ok("ON"),
        other => Err(DecodeError::UnknownState(other)),
    }
}

/// Build the direct-control frame for a relay command payload.
///
/// Like buttons, plus the timer byte: data[4] = 0 switches immediately.
/// JSON form admits `INSTR1`, `INSTR3`, `INSTR4`, `INSTR5`, `INSTR6`.
pub fn command_frames(template: &Frame, payload: &[u8]) -> Result<Vec<Frame>, DecodeError> {
    let mut frame = *template;
    let text = payload::text(payload).ok_or(DecodeError::InvalidPayload)?;

    let instr1 = match text {
        "ON" => Some(0x01),
        "OFF" => Some(0x00),
        "TOGGLE" => Some(0x02),
        other => match payload::parse_int_in(other, 0, 255) {
            Some(0) => Some(0x00),
            Some(255) => Some(0x01),
            _ => None,
        },
    };

    if let Some(instr1) = instr1 {
        frame.data[0] = instr1;
        frame.data[4] = 0x00;
        frame.data[5] = 0xFF;
        frame.data[6] = 0xFF;
        frame.data[7] = 0xFF;
    } else {
        let value = payload::json_object(payload).ok_or(DecodeError::InvalidPayload)?;
        let applied = payload::apply_instructions(
            &mut frame,
            &value,
            &[
                ("INSTR1", 0),
                ("INSTR3", 4),
                ("INSTR4", 5),
                ("INSTR5", 6),
                ("INSTR6", 7),
            ],
        );
        if !applied {
            return Err(DecodeError::InvalidPayload);
        }
    }
    frame.frametype = frame_type::DIRECT_CONTROL;
    Ok(vec![frame])
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{ChannelTopics, RelayModule};
    use routing::RoutingTable;

    fn module() -> RelayModule {
        RelayModule {
            node: 0x10,
            group: 0x20,
            relays: vec![ChannelTopics {
                channel: 3,
                state: Some("home/relay3".into()),
                command: Some("home/relay3/set".into()),
            }],
        }
    }

    #[test]
    fn test_state_payload() {
        let mut frame = Frame::default();
        frame.data[3] = 0xFF;
        assert_eq!(state_payload(&frame).unwrap(), "ON");
        frame.data[3] = 0x00;
        assert_eq!(state_payload(&frame).unwrap(), "OFF");
        frame.data[3] = 0x80;
        assert!(state_payload(&frame).is_err());
    }

    #[test]
    fn test_relay_on_end_to_end_bytes() {
        // Relay at node 0x10 group 0x20 channel 3, default computer id.
        let routing = RoutingTable::new();
        register(&module(), (0xFE, 0xFE), &routing);

        let (_, template) = routing.match_topic("home/relay3/set", 0).unwrap();
        let frames = command_frames(&template, b"ON").unwrap();
        let frame = frames[0];
        assert_eq!(frame.frametype, 0x10A);
        assert_eq!(frame.flags, 0);
        assert_eq!(frame.module, 0xFE);
        assert_eq!(frame.group, 0xFE);
        assert_eq!(frame.data, [0x01, 0x04, 0x10, 0x20, 0x00, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_relay_state_rule_matches_channel() {
        let routing = RoutingTable::new();
        register(&module(), (0xFE, 0xFE), &routing);

        let mut frame = Frame::new(frame_type::RELAY, 0x10, 0x20, [0; 8]);
        frame.data[2] = 3;
        frame.data[3] = 0xFF;
        let (_, topic) = routing.match_can_frame(&frame, 0).unwrap();
        assert_eq!(topic.as_deref(), Some("home/relay3"));

        frame.data[2] = 2;
        assert!(routing.match_can_frame(&frame, 0).is_none());
    }

    #[test]
    fn test_command_json_with_timer() {
        let routing = RoutingTable::new();
        register(&module(), (0xFE, 0xFE), &routing);
        let (_, template) = routing.match_topic("home/relay3/set", 0).unwrap();
        let frames = command_frames(
            &template,
            br#"{"INSTR1": 1, "INSTR3": 10, "INSTR4": 0, "INSTR5": 0, "INSTR6": 0}"#,
        )
        .unwrap();
        assert_eq!(frames[0].data[0], 1);
        assert_eq!(frames[0].data[4], 10);
    }

    #[test]
    fn test_out_of_range_channel_skipped() {
        let routing = RoutingTable::new();
        let bad = RelayModule {
            node: 1,
            group: 1,
            relays: vec![ChannelTopics {
                channel: 7,
                state: Some("x".into()),
                command: None,
            }],
        };
        register(&bad, (0xFE, 0xFE), &routing);
        assert_eq!(routing.can_rule_count(), 0);
    }
}
