//! RGB LED controllers (frametype 0x308): three colour channels plus a
//! master channel on channel 4.
//!
//! State traffic is stateful and goes through the aggregator; this module
//! registers the rules that feed it and decodes command payloads into
//! direct-control frame sequences.

use crate::{payload, DecodeError};
use aggregator::{Aggregator, ChannelMode, Entry};
use config::RgbModule;
use hapcan::{frame_type, Frame};
use routing::{CanRule, MqttRule, RoutingTable};
use tracing::warn;

/// Master channel number on the wire.
pub const MASTER_CHANNEL: u8 = 4;
/// Template sentinel selecting the combined-RGB command decoder.
pub const COMBINED_COMMAND: u8 = 5;

fn state_rule(node: u8, group: u8, channel: u8, topic: Option<&str>) -> CanRule {
    let mut mask = Frame::default();
    mask.frametype = 0xFFF;
    mask.module = 0xFF;
    mask.group = 0xFF;
    mask.data[2] = 0xFF;
    let mut check = Frame::default();
    check.frametype = frame_type::RGB;
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
    template.frametype = frame_type::RGB;
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

/// Add one RGB controller to the routing table and the aggregator.
///
/// Every channel (including the master and unconfigured ones) gets a state
/// rule so the aggregator observes all channel reports; rules for channels
/// without a topic publish nothing themselves.
pub fn register(
    module: &RgbModule,
    computer_id: (u8, u8),
    routing: &RoutingTable,
    aggregator: &Aggregator,
) {
    let (node, group) = (module.node, module.group);
    let mut configured = [false; 4];

    if module.is_rgb {
        if module.rgb.len() != 1 || !module.rgbw.is_empty() {
            warn!(node, group, "invalid combined RGB configuration, skipped");
            return;
        }
        let entity = &module.rgb[0];
        aggregator.add(Entry::new(
            node,
            group,
            frame_type::RGB,
            ChannelMode::CombinedRgb,
            entity.state.clone(),
            [None, None, None, None],
        ));
        for channel in 1..=MASTER_CHANNEL {
            routing.add_can_to_mqtt(state_rule(node, group, channel, entity.state.as_deref()));
            configured[(channel - 1) as usize] = true;
        }
        if let Some(command) = &entity.command {
            routing.add_mqtt_to_can(command_rule(
                node,
                group,
                COMBINED_COMMAND,
                computer_id,
                command,
            ));
        }
    } else {
        if module.rgbw.is_empty() || module.rgbw.len() > 3 {
            warn!(node, group, "invalid RGB channel configuration, skipped");
            return;
        }
        let mut channel_topics: [Option<String>; 4] = [None, None, None, None];
        for channel in &module.rgbw {
            if !(1..=3).contains(&channel.channel) {
                warn!(node, group, channel = channel.channel, "RGB channel out of range");
                continue;
            }
            let index = (channel.channel - 1) as usize;
            if channel_topics[index].is_some() {
                warn!(node, group, channel = channel.channel, "duplicate RGB channel");
                continue;
            }
            channel_topics[index] = channel.state.clone();
            routing.add_can_to_mqtt(state_rule(
                node,
                group,
                channel.channel,
                channel.state.as_deref(),
            ));
            // A master update re-emits this channel's scaled value.
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
            frame_type::RGB,
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
    master.data[0] = 0x03;
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
            frame.data[0] = 0x10 + channel - 1;
            frame.data[1] = 0xFF;
            Some(vec![frame, master_follow_up(&frame)])
        }
        "OFF" => {
            frame.data[0] = 0x10 + channel - 1;
            frame.data[1] = 0x00;
            Some(vec![frame])
        }
        "TOGGLE" => {
            frame.data[0] = 0x04 + channel - 1;
            frame.data[1] = 0xFF;
            Some(vec![frame, master_follow_up(&frame)])
        }
        other => {
            let level = payload::parse_int_in(other, 0, 255)?;
            frame.data[0] = 0x10 + channel - 1;
            frame.data[1] = level as u8;
            Some(vec![frame, master_follow_up(&frame)])
        }
    }
}

fn combined_frames(template: &Frame, text: &str, payload_bytes: &[u8]) -> Option<Vec<Frame>> {
    let mut frame = *template;
    match text {
        "ON" => {
            frame.data[0] = 0x21;
            frame.data[1] = 0x7F;
            frame.data[4] = 0x7F;
            frame.data[5] = 0x7F;
            frame.data[6] = 0x00;
            frame.data[7] = 0x00;
            Some(vec![frame, master_follow_up(&frame)])
        }
        "OFF" => {
            frame.data[0] = 0x21;
            frame.data[1] = 0x00;
            frame.data[4] = 0x00;
            frame.data[5] = 0x00;
            frame.data[6] = 0x00;
            frame.data[7] = 0xFF;
            Some(vec![frame])
        }
        "TOGGLE" => {
            frame.data[1] = 0xFF;
            frame.data[4] = 0x00;
            frame.data[5] = 0xFF;
            frame.data[6] = 0xFF;
            frame.data[7] = 0xFF;
            let mut frames = Vec::with_capacity(4);
            for channel in 0..3 {
                let mut toggle = frame;
                toggle.data[0] = 0x04 + channel;
                frames.push(toggle);
            }
            frames.push(master_follow_up(&frame));
            Some(frames)
        }
        other => {
            if let Some(colours) = payload::parse_csv_in(other, 3, 0, 255) {
                frame.data[0] = 0x21;
                frame.data[1] = colours[0];
                frame.data[4] = colours[1];
                frame.data[5] = colours[2];
                frame.data[6] = 0x00;
                frame.data[7] = 0xFF;
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

/// Build the direct-control frame sequence for an RGB command payload.
///
/// The template sentinel in data[1] selects a single channel (1..=4) or the
/// combined entity (5).
pub fn command_frames(template: &Frame, payload_bytes: &[u8]) -> Result<Vec<Frame>, DecodeError> {
    let text = payload::text(payload_bytes).ok_or(DecodeError::InvalidPayload)?;
    let sentinel = template.data[1];
    let frames = match sentinel {
        1..=MASTER_CHANNEL => single_channel_frames(template, sentinel, text),
        COMBINED_COMMAND => combined_frames(template, text, payload_bytes),
        other => return Err(DecodeError::UnknownSelector(other)),
    };
    let mut frames = frames.ok_or(DecodeError::InvalidPayload)?;
    for frame in &mut frames {
        frame.frametype = frame_type::DIRECT_CONTROL;
    }
    Ok(frames)
}
