//! RGBW LED controllers: four colour channels plus a master channel on
//! channel 5.
//!
//! A module is configured as one RGBW entity, one RGB entity (with an
//! optional independent white channel), or four independent channels.

use crate::{payload, DecodeError};
use aggregator::{Aggregator, ChannelMode, Entry};
use config::RgbwModule;
use hapcan::{frame_type, Frame};
use routing::{CanRule, MqttRule, RoutingTable};
use tracing::warn;

/// Master channel number on the wire.
pub const MASTER_CHANNEL: u8 = 5;
/// Template sentinel selecting the combined-RGB command decoder.
pub const RGB_COMMAND: u8 = 6;
/// Template sentinel selecting the combined-RGBW command decoder.
pub const RGBW_COMMAND: u8 = 7;

fn state_rule(node: u8, group: u8, channel: u8, topic: Option<&str>) -> CanRule {
    let mut mask = Frame::default();
    mask.frametype = 0xFFF;
    mask.module = 0xFF;
    mask.group = 0xFF;
    mask.data[2] = 0xFF;
    let mut check = Frame::default();
    check.frametype = frame_type::RGBW;
    check.module = node;
    check.group = group;
    check.data[2] = channel;
    CanRule {
        mask,
        check,
        state_topic: topic.map(str::to_string),
    }
}

fn command_rule(node: u8, group: u8, sentinel: u8, computer_id: (u8, u8), topic: &str) -> MqttRule {
    let mut template = Frame::default();
    template.frametype = frame_type::RGBW;
    template.module = computer_id.0;
    template.group = computer_id.1;
    template.data[1] = sentinel;
    template.data[2] = node;
    template.data[3] = group;
    MqttRule {
        command_topic: topic.to_string(),
        template,
    }
}

/// Add one RGBW controller to the routing table and the aggregator.
pub fn register(
    module: &RgbwModule,
    computer_id: (u8, u8),
    routing: &RoutingTable,
    aggregator: &Aggregator,
) {
    let (node, group) = (module.node, module.group);
    let mut configured = [false; 5];

    if module.is_rgbw {
        if module.rgbw.len() != 1 || !module.rgb.is_empty() {
            warn!(node, group, "invalid combined RGBW configuration, skipped");
            return;
        }
        let entity = &module.rgbw[0];
        aggregator.add(Entry::new(
            node,
            group,
            frame_type::RGBW,
            ChannelMode::CombinedRgbw,
            entity.state.clone(),
            [None, None, None, None],
        ));
        for channel in 1..=MASTER_CHANNEL {
            routing.add_can_to_mqtt(state_rule(node, group, channel, entity.state.as_deref()));
            configured[(channel - 1) as usize] = true;
        }
        if let Some(command) = &entity.command {
            routing.add_mqtt_to_can(command_rule(node, group, RGBW_COMMAND, computer_id, command));
        }
    } else if module.is_rgb {
        if module.rgb.len() != 1 || module.rgbw.len() > 1 {
            warn!(node, group, "invalid combined RGB configuration, skipped");
            return;
        }
        let entity = &module.rgb[0];
        aggregator.add(Entry::new(
            node,
            group,
            frame_type::RGBW,
            ChannelMode::CombinedRgb,
            entity.state.clone(),
            [None, None, None, None],
        ));
        for channel in [1, 2, 3, MASTER_CHANNEL] {
            routing.add_can_to_mqtt(state_rule(node, group, channel, entity.state.as_deref()));
            configured[(channel - 1) as usize] = true;
        }
        if let Some(command) = &entity.command {
            routing.add_mqtt_to_can(command_rule(node, group, RGB_COMMAND, computer_id, command));
        }
        // Optional independent white channel alongside the RGB entity.
        if let Some(white) = module.rgbw.first() {
            if white.channel == 4 {
                routing.add_can_to_mqtt(state_rule(node, group, 4, white.state.as_deref()));
                routing.add_can_to_mqtt(state_rule(
                    node,
                    group,
                    MASTER_CHANNEL,
                    white.state.as_deref(),
                ));
                configured[3] = true;
                if let Some(command) = &white.command {
                    routing.add_mqtt_to_can(command_rule(node, group, 4, computer_id, command));
                }
            } else {
                warn!(node, group, channel = white.channel, "expected white channel 4");
            }
        }
    } else {
        if module.rgbw.is_empty() || module.rgbw.len() > 4 {
            warn!(node, group, "invalid RGBW channel configuration, skipped");
            return;
        }
        let mut channel_topics: [Option<String>; 4] = [None, None, None, None];
        for channel in &module.rgbw {
            if !(1..=4).contains(&channel.channel) {
                warn!(node, group, channel = channel.channel, "RGBW channel out of range");
                continue;
            }
            let index = (channel.channel - 1) as usize;
            if channel_topics[index].is_some() {
                warn!(node, group, channel = channel.channel, "duplicate RGBW channel");
                continue;
            }
            channel_topics[index] = channel.state.clone();
            routing.add_can_to_mqtt(state_rule(
                node,
                group,
                channel.channel,
                channel.state.as_deref(),
            ));
            routing.add_can_to_mqtt(state_rule(
                node,
                group,
                MASTER_CHANNEL,
                channel.state.as_deref(),
            ));
            configured[index] = true;
            configured[(MASTER_CHANNEL - 1) as usize] = true;
            if let Some(command) = &channel.command {
                routing.add_mqtt_to_can(command_rule(
                    node,
                    group,
                    channel.channel,
                    computer_id,
                    command,
                ));
            }
        }
        aggregator.add(Entry::new(
            node,
            group,
            frame_type::RGBW,
            ChannelMode::Independent,
            None,
            channel_topics,
        ));
    }

    for channel in 1..=MASTER_CHANNEL {
        if !configured[(channel - 1) as usize] {
            routing.add_can_to_mqtt(state_rule(node, group, channel, None));
        }
    }
}

fn master_follow_up(frame: &Frame) -> Frame {
    let mut master = *frame;
    master.data[0] = 0x04;
    master.data[1] = 0xFF;
    master.data[4] = 0x00;
    master.data[5] = 0xFF;
    master.data[6] = 0xFF;
    master.data[7] = 0xFF;
    master
}

fn single_channel_frames(template: &Frame, channel: u8, text: &str) -> Option<Vec<Frame>> {
    let mut frame = *template;
    frame.data[4] = 0x00;
    frame.data[5] = 0xFF;
    frame.data[6] = 0xFF;
    frame.data[7] = 0xFF;
    match text {
        "ON" => {
            frame.data[0] = 0x14 + channel - 1;
            frame.data[1] = 0xFF;
            Some(vec![frame, master_follow_up(&frame)])
        }
        "OFF" => {
            frame.data[0] = 0x14 + channel - 1;
            frame.data[1] = 0x00;
            Some(vec![frame])
        }
        "TOGGLE" => {
            frame.data[0] = 0x05 + channel - 1;
            frame.data[1] = 0xFF;
            Some(vec![frame, master_follow_up(&frame)])
        }
        other => {
            let level = payload::parse_int_in(other, 0, 255)?;
            frame.data[0] = 0x14 + channel - 1;
            frame.data[1] = level as u8;
            Some(vec![frame, master_follow_up(&frame)])
        }
    }
}

fn combined_frames(
    template: &Frame,
    rgbw: bool,
    text: &str,
    payload_bytes: &[u8],
) -> Option<Vec<Frame>> {
    let mut frame = *template;
    match text {
        "ON" => {
            if rgbw {
                frame.data[0] = 0x2E;
                frame.data[1] = 0x7F;
                frame.data[4] = 0x7F;
                frame.data[5] = 0x7F;
                frame.data[6] = 0x7F;
                frame.data[7] = 0x00;
            } else {
                frame.data[0] = 0x29;
                frame.data[1] = 0x7F;
                frame.data[4] = 0x7F;
                frame.data[5] = 0x7F;
                frame.data[6] = 0x00;
                frame.data[7] = 0xFF;
            }
            Some(vec![frame, master_follow_up(&frame)])
        }
        "OFF" => {
            if rgbw {
                frame.data[0] = 0x2E;
                frame.data[1] = 0x00;
                frame.data[4] = 0x00;
                frame.data[5] = 0x00;
                frame.data[6] = 0x00;
                frame.data[7] = 0x00;
            } else {
                frame.data[0] = 0x29;
                frame.data[1] = 0x00;
                frame.data[4] = 0x00;
                frame.data[5] = 0x00;
                frame.data[6] = 0x00;
                frame.data[7] = 0xFF;
            }
            Some(vec![frame])
        }
        "TOGGLE" => {
            frame.data[1] = 0xFF;
            frame.data[4] = 0x00;
            frame.data[5] = 0xFF;
            frame.data[6] = 0xFF;
            frame.data[7] = 0xFF;
            let channels = if rgbw { 4 } else { 3 };
            let mut frames = Vec::with_capacity(channels + 1);
            for channel in 0..channels as u8 {
                let mut toggle = frame;
                toggle.data[0] = 0x05 + channel;
                frames.push(toggle);
            }
            frames.push(master_follow_up(&frame));
            Some(frames)
        }
        other => {
            let count = if rgbw { 4 } else { 3 };
            if let Some(colours) = payload::parse_csv_in(other, count, 0, 255) {
                if rgbw {
                    frame.data[0] = 0x2E;
                    frame.data[1] = colours[0];
                    frame.data[4] = colours[1];
                    frame.data[5] = colours[2];
                    frame.data[6] = colours[3];
                    frame.data[7] = 0x00;
                } else {
                    frame.data[0] = 0x29;
                    frame.data[1] = colours[0];
                    frame.data[4] = colours[1];
                    frame.data[5] = colours[2];
                    frame.data[6] = 0x00;
                    frame.data[7] = 0xFF;
                }
                Some(vec![frame, master_follow_up(&frame)])
            } else {
                let value = payload::json_object(payload_bytes)?;
                let applied = payload::apply_instructions(
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
                );
                if applied {
                    Some(vec![frame])
                } else {
                    None
                }
            }
        }
    }
}

/// Build the direct-control frame sequence for an RGBW command payload.
///
/// The template sentinel in data[1] selects a single channel (1..=5), the
/// combined RGB entity (6) or the combined RGBW entity (7).
pub fn command_frames(template: &Frame, payload_bytes: &[u8]) -> Result<Vec<Frame>, DecodeError> {
    let text = payload::text(payload_bytes).ok_or(DecodeError::InvalidPayload)?;
    let sentinel = template.data[1];
    let frames = match sentinel {
        1..=MASTER_CHANNEL => single_channel_frames(template, sentinel, text),
        RGB_COMMAND => combined_frames(template, false, text, payload_bytes),
        RGBW_COMMAND => combined_frames(template, true, text, payload_bytes),
        other => return Err(DecodeError::UnknownSelector(other)),
    };
    let mut frames = frames.ok_or(DecodeError::InvalidPayload)?;
    for frame in &mut frames {
        frame.frametype = frame_type::DIRECT_CONTROL;
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{ChannelTopics, TopicPair};

    fn rgbw_module() -> RgbwModule {
        RgbwModule {
            node: 9,
            group: 2,
            is_rgbw: true,
            is_rgb: false,
            rgb: vec![],
            rgbw: vec![ChannelTopics {
                channel: 1,
                state: Some("rgbw/state".into()),
                command: Some("rgbw/set".into()),
            }],
        }
    }

    fn template(sentinel: u8) -> Frame {
        let mut template = Frame::default();
        template.frametype = frame_type::RGBW;
        template.module = 0xFE;
        template.group = 0xFE;
        template.data[1] = sentinel;
        template.data[2] = 9;
        template.data[3] = 2;
        template
    }

    #[test]
    fn test_register_combined_rgbw() {
        let routing = RoutingTable::new();
        let aggregator = Aggregator::new();
        register(&rgbw_module(), (0xFE, 0xFE), &routing, &aggregator);
        // Channels 1..5 each get a state rule
        assert_eq!(routing.can_rule_count(), 5);
        assert_eq!(routing.mqtt_rule_count(), 1);
        assert_eq!(aggregator.len(), 1);
    }

    #[test]
    fn test_register_rgb_with_white() {
        let module = RgbwModule {
            node: 1,
            group: 1,
            is_rgbw: false,
            is_rgb: true,
            rgb: vec![TopicPair {
                state: Some("rgb/state".into()),
                command: Some("rgb/set".into()),
            }],
            rgbw: vec![ChannelTopics {
                channel: 4,
                state: Some("white/state".into()),
                command: Some("white/set".into()),
            }],
        };
        let routing = RoutingTable::new();
        let aggregator = Aggregator::new();
        register(&module, (0xFE, 0xFE), &routing, &aggregator);
        assert_eq!(routing.mqtt_rule_count(), 2);
        let (_, white) = routing.match_topic("white/set", 0).unwrap();
        assert_eq!(white.data[1], 4);
    }

    #[test]
    fn test_rgbw_on_sequence() {
        let frames = command_frames(&template(RGBW_COMMAND), b"ON").unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, [0x2E, 0x7F, 9, 2, 0x7F, 0x7F, 0x7F, 0x00]);
        assert_eq!(frames[1].data, [0x04, 0xFF, 9, 2, 0x00, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_rgbw_csv_four_values() {
        let frames = command_frames(&template(RGBW_COMMAND), b"1,2,3,4").unwrap();
        assert_eq!(frames[0].data[0], 0x2E);
        assert_eq!(frames[0].data[1], 1);
        assert_eq!(frames[0].data[4], 2);
        assert_eq!(frames[0].data[5], 3);
        assert_eq!(frames[0].data[6], 4);
        assert!(command_frames(&template(RGBW_COMMAND), b"1,2,3").is_err());
    }

    #[test]
    fn test_rgb_entity_csv_three_values() {
        let frames = command_frames(&template(RGB_COMMAND), b"10,20,30").unwrap();
        assert_eq!(frames[0].data[0], 0x29);
        assert_eq!(frames[0].data[6], 0x00);
        assert!(command_frames(&template(RGB_COMMAND), b"1,2,3,4").is_err());
    }

    #[test]
    fn test_rgbw_toggle_four_channels_then_master() {
        let frames = command_frames(&template(RGBW_COMMAND), b"TOGGLE").unwrap();
        assert_eq!(frames.len(), 5);
        for (i, frame) in frames[..4].iter().enumerate() {
            assert_eq!(frame.data[0], 0x05 + i as u8);
        }
        assert_eq!(frames[4].data[0], 0x04);
    }

    #[test]
    fn test_single_channel_opcodes() {
        let frames = command_frames(&template(3), b"ON").unwrap();
        assert_eq!(frames[0].data[0], 0x16);
        assert_eq!(frames[1].data[0], 0x04);

        let frames = command_frames(&template(3), b"TOGGLE").unwrap();
        assert_eq!(frames[0].data[0], 0x07);

        let frames = command_frames(&template(3), b"OFF").unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_json_instructions_literal_frame() {
        let frames = command_frames(
            &template(RGBW_COMMAND),
            br#"{"INSTR1": 1, "INSTR2": 2, "INSTR3": 3, "INSTR4": 4, "INSTR5": 5, "INSTR6": 6}"#,
        )
        .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, [1, 2, 9, 2, 3, 4, 5, 6]);
    }
}
