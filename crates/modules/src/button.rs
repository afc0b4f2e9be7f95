//! Button / LED modules (frametype 0x301).

use crate::{payload, DecodeError};
use config::ButtonModule;
use hapcan::{frame_type, Frame};
use routing::{CanRule, MqttRule, RoutingTable};
use tracing::warn;

/// Add the configured channels of one button module to the routing table.
///
/// State rules match on frame type, node, group and the channel in data[2].
/// Command rules pre-fill a template with the channel bitmask in data[1]
/// (low byte) and data[4] (high byte, channels 9..14) and the target
/// node/group in data[2]/data[3].
pub fn register(module: &ButtonModule, computer_id: (u8, u8), routing: &RoutingTable) {
    for channel in &module.buttons {
        if !(1..=14).contains(&channel.channel) {
            warn!(
                node = module.node,
                group = module.group,
                channel = channel.channel,
                "button channel out of range, skipped"
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
            check.frametype = frame_type::BUTTON;
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
            let channel_bits = 1u16 << (channel.channel - 1);
            let mut template = Frame::default();
            template.frametype = frame_type::BUTTON;
            template.module = computer_id.0;
            template.group = computer_id.1;
            template.data[1] = (channel_bits & 0xFF) as u8;
            template.data[4] = (channel_bits >> 8) as u8;
            template.data[2] = module.node;
            template.data[3] = module.group;
            routing.add_mqtt_to_can(MqttRule {
                command_topic: command.clone(),
                template,
            });
        }
    }
}

/// Payloads to publish for a button state frame.
///
/// data[3] is the button: 0x00 open, 0x01 disabled, 0xFF closed, 0xFE/0xFD
/// held, 0xFC/0xFB/0xFA closed-then-open. data[4] is the LED, consulted only
/// when the button input is disabled.
pub fn state_payloads(frame: &Frame) -> Result<Vec<&'static str>, DecodeError> {
    match frame.data[3] {
        0x01 => match frame.data[4] {
            0x01 => Ok(vec![]),
            0x00 => Ok(vec!["OFF"]),
            0xFF => Ok(vec!["ON"]),
            other => Err(DecodeError::UnknownState(other)),
        },
        0x00 => Ok(vec!["OFF"]),
        b if b >= 0xFD => Ok(vec!["ON"]),
        b if b >= 0xFA => Ok(vec!["ON", "OFF"]),
        other => Err(DecodeError::UnknownState(other)),
    }
}

/// Build the direct-control frame for a command payload.
///
/// Accepted payloads: `"ON"`/`"OFF"`/`"TOGGLE"`, the numeric strings 0/255
/// (decimal or hex), or a JSON object with all of `INSTR1`, `INSTR4`,
/// `INSTR5`, `INSTR6`.
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
        frame.data[5] = 0xFF;
        frame.data[6] = 0xFF;
        frame.data[7] = 0xFF;
    } else {
        let value = payload::json_object(payload).ok_or(DecodeError::InvalidPayload)?;
        let applied = payload::apply_instructions(
            &mut frame,
            &value,
            &[("INSTR1", 0), ("INSTR4", 5), ("INSTR5", 6), ("INSTR6", 7)],
        );
        if !applied {
            return Err(DecodeError::InvalidPayload);
        }
    }
    frame.frametype = frame_type::DIRECT_CONTROL;
    Ok(vec![frame])
}
