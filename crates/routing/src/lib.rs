//! The two routing rule lists of the gateway.
//!
//! CAN->MQTT rules match a received HAPCAN frame against a mask/check pair
//! and yield a state topic; MQTT->CAN rules match a command topic by exact
//! string equality and yield a pre-filled HAPCAN frame template. Each list
//! has its own lock, and scans return an owned copy of the output so no lock
//! is held while the caller does work.
//!
//! Scans restart from an offset; dispatchers loop past each hit so every
//! applicable rule fires, letting one frame fan out to several topics and
//! one topic drive several frames.

use hapcan::Frame;
use std::sync::Mutex;

/// CAN->MQTT rule: mask/check over the received frame, state topic out.
#[derive(Debug, Clone)]
pub struct CanRule {
    pub mask: Frame,
    pub check: Frame,
    pub state_topic: Option<String>,
}

/// MQTT->CAN rule: command topic in, frame template out.
///
/// The template carries routing metadata in its data bytes (target node and
/// group, channel, and a selector byte the module decoders key on).
#[derive(Debug, Clone)]
pub struct MqttRule {
    pub command_topic: String,
    pub template: Frame,
}

/// Thread-safe rule table, rebuilt wholesale on configuration reload.
#[derive(Debug, Default)]
pub struct RoutingTable {
    can_to_mqtt: Mutex<Vec<CanRule>>,
    mqtt_to_can: Mutex<Vec<MqttRule>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every rule from both lists.
    pub fn clear(&self) {
        self.can_to_mqtt.lock().unwrap().clear();
        self.mqtt_to_can.lock().unwrap().clear();
    }

    pub fn add_can_to_mqtt(&self, rule: CanRule) {
        self.can_to_mqtt.lock().unwrap().push(rule);
    }

    pub fn add_mqtt_to_can(&self, rule: MqttRule) {
        self.mqtt_to_can.lock().unwrap().push(rule);
    }

    /// Find the next CAN->MQTT rule matching `frame`, starting at `offset`.
    ///
    /// Returns the matching index and a copy of its state topic. An offset
    /// at or past the end of the list is not an error; it simply finds
    /// nothing.
    pub fn match_can_frame(&self, frame: &Frame, offset: usize) -> Option<(usize, Option<String>)> {
        let rules = self.can_to_mqtt.lock().unwrap();
        for (index, rule) in rules.iter().enumerate().skip(offset) {
            if frame.matches(&rule.mask, &rule.check) {
                return Some((index, rule.state_topic.clone()));
            }
        }
        None
    }

    /// Find the next MQTT->CAN rule whose command topic equals `topic`,
    /// starting at `offset`. Returns the index and a copy of the template.
    pub fn match_topic(&self, topic: &str, offset: usize) -> Option<(usize, Frame)> {
        let rules = self.mqtt_to_can.lock().unwrap();
        for (index, rule) in rules.iter().enumerate().skip(offset) {
            if rule.command_topic == topic {
                return Some((index, rule.template));
            }
        }
        None
    }

    pub fn can_rule_count(&self) -> usize {
        self.can_to_mqtt.lock().unwrap().len()
    }

    pub fn mqtt_rule_count(&self) -> usize {
        self.mqtt_to_can.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hapcan::frame_type;

    fn button_rule(node: u8, group: u8, channel: u8, topic: &str) -> CanRule {
        let mut mask = Frame::default();
        mask.frametype = 0xFFF;
        mask.module = 0xFF;
        mask.group = 0xFF;
        mask.data[2] = 0xFF;
        let mut check = Frame::default();
        check.frametype = frame_type::BUTTON;
        check.module = node;
        check.group = group;
        check.data[2] = channel;
        CanRule {
            mask,
            check,
            state_topic: Some(topic.to_string()),
        }
    }

    #[test]
    fn test_match_can_frame_returns_all_matches_via_offset() {
        let table = RoutingTable::new();
        table.add_can_to_mqtt(button_rule(1, 1, 1, "a"));
        table.add_can_to_mqtt(button_rule(2, 2, 2, "b"));
        table.add_can_to_mqtt(button_rule(1, 1, 1, "c"));

        let mut frame = Frame::new(frame_type::BUTTON, 1, 1, [0; 8]);
        frame.data[2] = 1;

        let (idx, topic) = table.match_can_frame(&frame, 0).unwrap();
        assert_eq!((idx, topic.as_deref()), (0, Some("a")));
        let (idx, topic) = table.match_can_frame(&frame, idx + 1).unwrap();
        assert_eq!((idx, topic.as_deref()), (2, Some("c")));
        assert!(table.match_can_frame(&frame, idx + 1).is_none());
    }

    #[test]
    fn test_match_can_frame_offset_past_end() {
        let table = RoutingTable::new();
        table.add_can_to_mqtt(button_rule(1, 1, 1, "a"));
        let mut frame = Frame::new(frame_type::BUTTON, 1, 1, [0; 8]);
        frame.data[2] = 1;
        assert!(table.match_can_frame(&frame, 10).is_none());
    }

    #[test]
    fn test_match_topic_exact_equality() {
        let table = RoutingTable::new();
        let template = Frame::new(frame_type::RELAY, 0xFE, 0xFE, [0; 8]);
        table.add_mqtt_to_can(MqttRule {
            command_topic: "home/relay3/set".to_string(),
            template,
        });

        assert!(table.match_topic("home/relay3/set", 0).is_some());
        assert!(table.match_topic("home/relay3", 0).is_none());
        assert!(table.match_topic("home/relay3/set/x", 0).is_none());
    }

    #[test]
    fn test_clear_empties_both_lists() {
        let table = RoutingTable::new();
        table.add_can_to_mqtt(button_rule(1, 1, 1, "a"));
        table.add_mqtt_to_can(MqttRule {
            command_topic: "t".to_string(),
            template: Frame::default(),
        });
        table.clear();
        assert_eq!(table.can_rule_count(), 0);
        assert_eq!(table.mqtt_rule_count(), 0);
    }
}
