//! Live inventory of every configured module.
//!
//! Each module listed in the configuration gets an entry tracking its static
//! identity (hardware/firmware types, description, device id) and dynamic
//! health (supply voltages, uptime, CAN error counters). The periodic tick
//! walks the list and emits one CAN request per tick to fill the gaps; once
//! a module is fully collected its consolidated JSON status is published
//! exactly once per refresh. External refresh commands reopen a chosen
//! subset of the flags.

use config::GatewayConfig;
use hapcan::retry::Retry;
use hapcan::{frame_type, system_frame, Frame};
use serde_json::json;
use std::sync::Mutex;
use tracing::{debug, info};

/// Static request frame types, in collection order. The description takes
/// two response frames, so its request appears twice.
const STATIC_REQUESTS: [u16; 5] = [
    frame_type::HW_TYPE_REQUEST_NODE,
    frame_type::FW_TYPE_REQUEST_NODE,
    frame_type::DESCRIPTION_REQUEST_NODE,
    frame_type::DESCRIPTION_REQUEST_NODE,
    frame_type::DEV_ID_REQUEST_NODE,
];

/// Dynamic request frame types, in collection order. The health counters
/// take two response frames.
const DYNAMIC_REQUESTS: [u16; 4] = [
    frame_type::SUPPLY_REQUEST_NODE,
    frame_type::UPTIME_REQUEST_NODE,
    frame_type::HEALTH_REQUEST_NODE,
    frame_type::HEALTH_REQUEST_NODE,
];

const STATIC_HW: usize = 0;
const STATIC_FW: usize = 1;
const STATIC_DESCRIPTION_P1: usize = 2;
const STATIC_DESCRIPTION_P2: usize = 3;
const STATIC_DEV_ID: usize = 4;

const DYNAMIC_SUPPLY: usize = 0;
const DYNAMIC_UPTIME: usize = 1;
const DYNAMIC_HEALTH_P1: usize = 2;
const DYNAMIC_HEALTH_P2: usize = 3;

/// Which flag subset a refresh command reopens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Static,
    Dynamic,
    Status,
    All,
}

impl UpdateKind {
    fn parse(payload: &[u8]) -> Option<Self> {
        match std::str::from_utf8(payload).ok()?.trim() {
            "STATIC" => Some(Self::Static),
            "DYNAMIC" => Some(Self::Dynamic),
            "STATUS" => Some(Self::Status),
            "ALL" => Some(Self::All),
            _ => None,
        }
    }
}

/// One configured module.
#[derive(Debug, Clone)]
struct NodeEntry {
    node: u8,
    group: u8,
    // Static fields
    hard: u16,
    hver: u8,
    id: u32,
    atype: u8,
    avers: u8,
    fvers: u8,
    bver: u16,
    description: [u8; 16],
    dev_id: u16,
    // Dynamic fields
    volbus: f64,
    volcpu: f64,
    uptime: u32,
    rxcnt: u8,
    txcnt: u8,
    rxcntmx: u8,
    txcntmx: u8,
    canintcnt: u8,
    rxerrcnt: u8,
    txerrcnt: u8,
    rxcntmxe: u8,
    txcntmxe: u8,
    canintcnte: u8,
    rxerrcnte: u8,
    txerrcnte: u8,
    // Update control (CAN responses observed)
    static_updated: [bool; STATIC_REQUESTS.len()],
    dynamic_updated: [bool; DYNAMIC_REQUESTS.len()],
    request_handled: bool,
    // Emission control (MQTT sent)
    static_sent: bool,
    dynamic_sent: bool,
    status_sent: bool,
}

impl NodeEntry {
    fn new(node: u8, group: u8) -> Self {
        let mut entry = Self {
            node,
            group,
            hard: 0,
            hver: 0,
            id: 0,
            atype: 0,
            avers: 0,
            fvers: 0,
            bver: 0,
            description: [0; 16],
            dev_id: 0,
            volbus: 0.0,
            volcpu: 0.0,
            uptime: 0,
            rxcnt: 0,
            txcnt: 0,
            rxcntmx: 0,
            txcntmx: 0,
            canintcnt: 0,
            rxerrcnt: 0,
            txerrcnt: 0,
            rxcntmxe: 0,
            txcntmxe: 0,
            canintcnte: 0,
            rxerrcnte: 0,
            txerrcnte: 0,
            static_updated: [false; STATIC_REQUESTS.len()],
            dynamic_updated: [false; DYNAMIC_REQUESTS.len()],
            request_handled: false,
            static_sent: false,
            dynamic_sent: false,
            status_sent: false,
        };
        // Fresh entries start dirty: the engine collects every field after
        // startup and publishes the consolidated status once complete.
        entry.set_flags(UpdateKind::All, false);
        entry
    }

    /// Clear the observation flags of a category and latch the emission
    /// flags to `handled` (true = nothing pending, false = refresh wanted).
    fn set_flags(&mut self, kind: UpdateKind, handled: bool) {
        if matches!(kind, UpdateKind::All | UpdateKind::Static) {
            self.static_updated = [false; STATIC_REQUESTS.len()];
            self.static_sent = handled;
        }
        if matches!(kind, UpdateKind::All | UpdateKind::Dynamic) {
            self.dynamic_updated = [false; DYNAMIC_REQUESTS.len()];
            self.dynamic_sent = handled;
        }
        if matches!(kind, UpdateKind::All | UpdateKind::Static | UpdateKind::Dynamic) {
            self.request_handled = handled;
        }
        if matches!(kind, UpdateKind::All | UpdateKind::Status) {
            self.status_sent = handled;
        }
    }

    /// First request still missing a response, dynamic fields first.
    fn first_missing_request(&self) -> Option<u16> {
        for (index, updated) in self.dynamic_updated.iter().enumerate() {
            if !updated {
                return Some(DYNAMIC_REQUESTS[index]);
            }
        }
        for (index, updated) in self.static_updated.iter().enumerate() {
            if !updated {
                return Some(STATIC_REQUESTS[index]);
            }
        }
        None
    }

    fn fully_updated(&self) -> bool {
        self.static_updated.iter().all(|updated| *updated)
            && self.dynamic_updated.iter().all(|updated| *updated)
    }

    /// Absorb a system response frame. Returns true when a field changed.
    fn absorb(&mut self, frame: &Frame) -> bool {
        let d = &frame.data;
        match frame.frametype {
            frame_type::HEALTH_REQUEST_NODE | frame_type::HEALTH_REQUEST_GROUP => match d[0] {
                0x01 if !self.dynamic_updated[DYNAMIC_HEALTH_P1] => {
                    self.rxcnt = d[1];
                    self.txcnt = d[2];
                    self.rxcntmx = d[3];
                    self.txcntmx = d[4];
                    self.canintcnt = d[5];
                    self.rxerrcnt = d[6];
                    self.txerrcnt = d[7];
                    self.dynamic_updated[DYNAMIC_HEALTH_P1] = true;
                    true
                }
                0x02 if !self.dynamic_updated[DYNAMIC_HEALTH_P2] => {
                    self.rxcntmxe = d[3];
                    self.txcntmxe = d[4];
                    self.canintcnte = d[5];
                    self.rxerrcnte = d[6];
                    self.txerrcnte = d[7];
                    self.dynamic_updated[DYNAMIC_HEALTH_P2] = true;
                    true
                }
                _ => false,
            },
            frame_type::UPTIME_REQUEST_NODE | frame_type::UPTIME_REQUEST_GROUP => {
                if !self.dynamic_updated[DYNAMIC_UPTIME] {
                    self.uptime = u32::from_be_bytes([d[4], d[5], d[6], d[7]]);
                    self.dynamic_updated[DYNAMIC_UPTIME] = true;
                    true
                } else {
                    false
                }
            }
            frame_type::SUPPLY_REQUEST_NODE | frame_type::SUPPLY_REQUEST_GROUP => {
                if !self.dynamic_updated[DYNAMIC_SUPPLY] {
                    self.volbus = f64::from(u16::from_be_bytes([d[0], d[1]])) / 2084.0;
                    self.volcpu = f64::from(u16::from_be_bytes([d[2], d[3]])) / 13100.0;
                    self.dynamic_updated[DYNAMIC_SUPPLY] = true;
                    true
                } else {
                    false
                }
            }
            frame_type::DESCRIPTION_REQUEST_NODE | frame_type::DESCRIPTION_REQUEST_GROUP => {
                if !self.static_updated[STATIC_DESCRIPTION_P1] {
                    self.description[..8].copy_from_slice(d);
                    self.static_updated[STATIC_DESCRIPTION_P1] = true;
                    true
                } else if !self.static_updated[STATIC_DESCRIPTION_P2] {
                    self.description[8..].copy_from_slice(d);
                    self.static_updated[STATIC_DESCRIPTION_P2] = true;
                    true
                } else {
                    false
                }
            }
            frame_type::FW_TYPE_REQUEST_NODE | frame_type::FW_TYPE_REQUEST_GROUP => {
                if !self.static_updated[STATIC_FW] {
                    self.hard = u16::from_be_bytes([d[0], d[1]]);
                    self.hver = d[2];
                    self.atype = d[3];
                    self.avers = d[4];
                    self.fvers = d[5];
                    self.bver = u16::from_be_bytes([d[6], d[7]]);
                    self.static_updated[STATIC_FW] = true;
                    true
                } else {
                    false
                }
            }
            frame_type::HW_TYPE_REQUEST_NODE | frame_type::HW_TYPE_REQUEST_GROUP => {
                if !self.static_updated[STATIC_HW] {
                    self.hard = u16::from_be_bytes([d[0], d[1]]);
                    self.hver = d[2];
                    self.id = u32::from_be_bytes([d[4], d[5], d[6], d[7]]);
                    self.static_updated[STATIC_HW] = true;
                    true
                } else {
                    false
                }
            }
            frame_type::DEV_ID_REQUEST_NODE | frame_type::DEV_ID_REQUEST_GROUP => {
                if !self.static_updated[STATIC_DEV_ID] {
                    self.dev_id = u16::from_be_bytes([d[0], d[1]]);
                    self.static_updated[STATIC_DEV_ID] = true;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Consolidated status payload (26 fields).
    fn status_payload(&self) -> String {
        json!({
            "NODE": self.node,
            "GROUP": self.group,
            "HARD": self.hard,
            "HVER": self.hver,
            "ID": self.id,
            "ATYPE": self.atype,
            "AVERS": self.avers,
            "FVERS": self.fvers,
            "BVER": self.bver,
            "DESCRIPTION": String::from_utf8_lossy(&self.description),
            "DEVID": self.dev_id,
            "VOLBUS": self.volbus,
            "VOLCPU": self.volcpu,
            "UPTIME": self.uptime,
            "RXCNT": self.rxcnt,
            "TXCNT": self.txcnt,
            "RXCNTMX": self.rxcntmx,
            "TXCNTMX": self.txcntmx,
            "CANINTCNT": self.canintcnt,
            "RXERRCNT": self.rxerrcnt,
            "TXERRCNT": self.txerrcnt,
            "RXCNTMXE": self.rxcntmxe,
            "TXCNTMXE": self.txcntmxe,
            "CANINTCNTE": self.canintcnte,
            "RXERRCNTE": self.rxerrcnte,
            "TXERRCNTE": self.txerrcnte,
        })
        .to_string()
    }
}

/// Which node/group window the current status sweep covers.
#[derive(Debug, Clone, Copy)]
struct StatusControl {
    initial_node: u8,
    final_node: u8,
    initial_group: u8,
    final_group: u8,
    finished: bool,
}

impl StatusControl {
    fn contains(&self, node: u8, group: u8) -> bool {
        group >= self.initial_group
            && group <= self.final_group
            && node >= self.initial_node
            && node <= self.final_node
    }
}

/// A status payload ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub topic: String,
    pub payload: String,
}

/// The inventory engine.
#[derive(Debug)]
pub struct Inventory {
    entries: Mutex<Vec<NodeEntry>>,
    control: Mutex<StatusControl>,
    retry: Mutex<Retry<(u8, u8, u16)>>,
}

impl Inventory {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            control: Mutex::new(StatusControl {
                initial_node: 255,
                final_node: 255,
                initial_group: 255,
                final_group: 255,
                finished: true,
            }),
            retry: Mutex::new(Retry::default()),
        }
    }

    /// Rebuild the list from the configuration and start the initial status
    /// sweep over every configured module.
    pub fn rebuild(&self, config: &GatewayConfig) {
        let mut list = Vec::new();
        for module in &config.relays {
            list.push(NodeEntry::new(module.node, module.group));
        }
        for module in &config.buttons {
            list.push(NodeEntry::new(module.node, module.group));
        }
        for module in &config.rgbs {
            list.push(NodeEntry::new(module.node, module.group));
        }
        for module in &config.rgbws {
            list.push(NodeEntry::new(module.node, module.group));
        }
        for module in &config.tims {
            list.push(NodeEntry::new(module.node, module.group));
        }
        info!(modules = list.len(), "inventory rebuilt");
        *self.entries.lock().unwrap() = list;
        self.retry.lock().unwrap().clear();
        self.request_refresh(UpdateKind::Status, 0, 0);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Reopen the given flag subset on every module in the node/group
    /// window; node or group 0 is a wildcard.
    pub fn request_refresh(&self, kind: UpdateKind, node: u8, group: u8) {
        let (initial_group, final_group) = if group == 0 { (1, 255) } else { (group, group) };
        let (initial_node, final_node) = if node == 0 { (1, 255) } else { (node, node) };
        if matches!(kind, UpdateKind::All | UpdateKind::Status) {
            let mut control = self.control.lock().unwrap();
            control.initial_node = initial_node;
            control.final_node = final_node;
            control.initial_group = initial_group;
            control.final_group = final_group;
            control.finished = false;
        }
        let mut entries = self.entries.lock().unwrap();
        for entry in entries.iter_mut() {
            if entry.group >= initial_group
                && entry.group <= final_group
                && entry.node >= initial_node
                && entry.node <= final_node
            {
                entry.set_flags(kind, false);
            }
        }
    }

    /// Handle an MQTT refresh command.
    ///
    /// The topic is the configured status subscription topic with an
    /// optional `/group` or `/group/node` suffix, the payload one of
    /// `STATIC`, `DYNAMIC`, `STATUS`, `ALL`. Returns true when handled.
    pub fn handle_refresh(&self, topic: &str, payload: &[u8], configured_topic: &str) -> bool {
        let Some((group, node)) = parse_topic_suffix(topic, configured_topic) else {
            return false;
        };
        let Some(kind) = UpdateKind::parse(payload) else {
            debug!(topic, "unrecognized refresh payload");
            return false;
        };
        self.request_refresh(kind, node, group);
        true
    }

    /// Absorb a system response frame from any configured module.
    pub fn absorb(&self, frame: &Frame) -> bool {
        if !matches!(
            frame.frametype,
            frame_type::HEALTH_REQUEST_NODE
                | frame_type::HEALTH_REQUEST_GROUP
                | frame_type::UPTIME_REQUEST_NODE
                | frame_type::UPTIME_REQUEST_GROUP
                | frame_type::DESCRIPTION_REQUEST_NODE
                | frame_type::DESCRIPTION_REQUEST_GROUP
                | frame_type::SUPPLY_REQUEST_NODE
                | frame_type::SUPPLY_REQUEST_GROUP
                | frame_type::FW_TYPE_REQUEST_NODE
                | frame_type::FW_TYPE_REQUEST_GROUP
                | frame_type::HW_TYPE_REQUEST_NODE
                | frame_type::HW_TYPE_REQUEST_GROUP
                | frame_type::DEV_ID_REQUEST_NODE
                | frame_type::DEV_ID_REQUEST_GROUP
        ) {
            return false;
        }
        let mut entries = self.entries.lock().unwrap();
        let mut updated = false;
        for entry in entries.iter_mut() {
            if entry.node == frame.module && entry.group == frame.group {
                updated |= entry.absorb(frame);
            }
        }
        updated
    }

    /// Periodic tick, CAN side: pick at most one request to send.
    ///
    /// Status requests go out first, one module per tick, until the sweep
    /// window is exhausted. After that the first module with missing fields
    /// gets a field request, dynamic before static, limited by the retry
    /// ceiling; a module that never answers is retired until the next
    /// refresh command.
    pub fn tick_can(&self, computer_id: (u8, u8)) -> Option<Frame> {
        let control = *self.control.lock().unwrap();
        if !control.finished {
            let mut entries = self.entries.lock().unwrap();
            if let Some(entry) = entries
                .iter_mut()
                .find(|entry| !entry.status_sent && control.contains(entry.node, entry.group))
            {
                entry.status_sent = true;
                return Some(system_frame(
                    frame_type::STATUS_REQUEST_NODE,
                    entry.node,
                    entry.group,
                    computer_id,
                ));
            }
            drop(entries);
            self.control.lock().unwrap().finished = true;
        }

        let mut entries = self.entries.lock().unwrap();
        let mut retry = self.retry.lock().unwrap();
        for entry in entries.iter_mut() {
            if entry.request_handled {
                continue;
            }
            let Some(frametype) = entry.first_missing_request() else {
                entry.request_handled = true;
                continue;
            };
            if retry.check((entry.node, entry.group, frametype)) {
                debug!(
                    node = entry.node,
                    group = entry.group,
                    "module not responding, retiring from rotation"
                );
                entry.set_flags(UpdateKind::All, true);
                return None;
            }
            return Some(system_frame(frametype, entry.node, entry.group, computer_id));
        }
        retry.clear();
        None
    }

    /// Periodic tick, MQTT side: publish the consolidated status of the
    /// first fully collected module that has not emitted yet.
    pub fn tick_mqtt(&self, status_pub_topic: &str) -> Option<StatusMessage> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.iter_mut().find(|entry| {
            entry.fully_updated()
                && (!entry.static_sent || !entry.dynamic_sent)
                && entry.node >= 1
                && entry.group >= 1
        })?;
        entry.static_sent = true;
        entry.dynamic_sent = true;
        Some(StatusMessage {
            topic: format!("{}/{}/{}/", status_pub_topic, entry.group, entry.node),
            payload: entry.status_payload(),
        })
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the (group, node) pair from a refresh topic.
///
/// `configured/12/34` -> (12, 34), `configured/12` -> (12, 0), a bare
/// `configured` -> (0, 0). Zero acts as a wildcard downstream.
fn parse_topic_suffix(topic: &str, configured: &str) -> Option<(u8, u8)> {
    if topic == configured {
        return Some((0, 0));
    }
    let suffix = topic.strip_prefix(configured)?.strip_prefix('/')?;
    let mut parts = suffix.splitn(2, '/');
    let group: u8 = parts.next()?.parse().ok()?;
    match parts.next() {
        None => Some((group, 0)),
        Some(node) => {
            let node: u8 = node.parse().ok()?;
            Some((group, node))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn config_with_one_module() -> GatewayConfig {
        serde_json::from_str(
            r#"{"HAPCANRelays": [{"node": 16, "group": 32, "relays": []}]}"#,
        )
        .unwrap()
    }

    fn response(frametype: u16, node: u8, group: u8, data: [u8; 8]) -> Frame {
        let mut frame = Frame::new(frametype, node, group, data);
        frame.flags = 1;
        frame
    }

    fn answer_everything(inventory: &Inventory, node: u8, group: u8) {
        inventory.absorb(&response(0x10C, node, group, [0x20, 0x84, 0x33, 0x2C, 0, 0, 0, 0]));
        inventory.absorb(&response(0x113, node, group, [0, 0, 0, 0, 0, 0, 1, 0]));
        inventory.absorb(&response(0x115, node, group, [1, 1, 2, 3, 4, 5, 6, 7]));
        inventory.absorb(&response(0x115, node, group, [2, 0, 0, 8, 9, 10, 11, 12]));
        inventory.absorb(&response(0x104, node, group, [0x30, 0x00, 3, 0, 1, 2, 3, 4]));
        inventory.absorb(&response(0x106, node, group, [0x30, 0x00, 3, 102, 0, 1, 3, 4]));
        inventory.absorb(&response(0x10E, node, group, *b"RELAY mo"));
        inventory.absorb(&response(0x10E, node, group, *b"dule 6ch"));
        inventory.absorb(&response(0x111, node, group, [0xAB, 0xCD, 0, 0, 0, 0, 0, 0]));
    }

    #[test]
    fn test_initial_sweep_sends_one_status_request() {
        let inventory = Inventory::new();
        inventory.rebuild(&config_with_one_module());
        let frame = inventory.tick_can((0xFE, 0xFE)).unwrap();
        assert_eq!(frame.frametype, 0x109);
        assert_eq!(frame.data[2], 16);
        assert_eq!(frame.data[3], 32);
    }

    #[test]
    fn test_non_responsive_module_request_ceiling() {
        let inventory = Inventory::new();
        inventory.rebuild(&config_with_one_module());

        // One status request, then exactly three identical field requests,
        // then silence until the next refresh command.
        let frame = inventory.tick_can((0xFE, 0xFE)).unwrap();
        assert_eq!(frame.frametype, 0x109);
        for _ in 0..3 {
            let frame = inventory.tick_can((0xFE, 0xFE)).unwrap();
            assert_eq!(frame.frametype, 0x10C);
        }
        assert!(inventory.tick_can((0xFE, 0xFE)).is_none());
        assert!(inventory.tick_can((0xFE, 0xFE)).is_none());

        inventory.request_refresh(UpdateKind::Dynamic, 16, 32);
        assert_eq!(inventory.tick_can((0xFE, 0xFE)).unwrap().frametype, 0x10C);
    }

    #[test]
    fn test_request_order_walks_missing_fields() {
        let inventory = Inventory::new();
        inventory.rebuild(&config_with_one_module());
        inventory.tick_can((0xFE, 0xFE)); // status request

        // Supply answered: the next request moves on to the uptime.
        inventory.absorb(&response(0x10C, 16, 32, [0x20, 0x84, 0x33, 0x2C, 0, 0, 0, 0]));
        let frame = inventory.tick_can((0xFE, 0xFE)).unwrap();
        assert_eq!(frame.frametype, 0x113);
    }

    #[test]
    fn test_status_published_once_when_complete() {
        let inventory = Inventory::new();
        inventory.rebuild(&config_with_one_module());
        inventory.tick_can((0xFE, 0xFE));
        answer_everything(&inventory, 16, 32);

        let message = inventory.tick_mqtt("hapcan/status").unwrap();
        assert_eq!(message.topic, "hapcan/status/32/16/");
        let value: Value = serde_json::from_str(&message.payload).unwrap();
        assert_eq!(value["NODE"], 16);
        assert_eq!(value["GROUP"], 32);
        assert_eq!(value["HARD"], 0x3000);
        assert_eq!(value["DEVID"], 0xABCD);
        assert_eq!(value["UPTIME"], 256);
        assert_eq!(value["DESCRIPTION"], "RELAY module 6ch");
        // 0x2084 / 2084 and 0x332C / 13100
        assert!((value["VOLBUS"].as_f64().unwrap() - 4.0).abs() < 0.01);
        assert!((value["VOLCPU"].as_f64().unwrap() - 1.0).abs() < 0.01);

        // Emission fires once per refresh
        assert!(inventory.tick_mqtt("hapcan/status").is_none());
    }

    #[test]
    fn test_refresh_topic_parsing() {
        assert_eq!(parse_topic_suffix("a/b", "a/b"), Some((0, 0)));
        assert_eq!(parse_topic_suffix("a/b/12", "a/b"), Some((12, 0)));
        assert_eq!(parse_topic_suffix("a/b/12/34", "a/b"), Some((12, 34)));
        assert_eq!(parse_topic_suffix("a/bc", "a/b"), None);
        assert_eq!(parse_topic_suffix("a/b/x", "a/b"), None);
        assert_eq!(parse_topic_suffix("a/b/300", "a/b"), None);
    }

    #[test]
    fn test_handle_refresh_reopens_status_window() {
        let inventory = Inventory::new();
        inventory.rebuild(&config_with_one_module());
        inventory.tick_can((0xFE, 0xFE)); // consume the initial status request
        answer_everything(&inventory, 16, 32);
        while inventory.tick_can((0xFE, 0xFE)).is_some() {}

        assert!(inventory.handle_refresh("hapcan/refresh/32/16", b"STATUS", "hapcan/refresh"));
        let frame = inventory.tick_can((0xFE, 0xFE)).unwrap();
        assert_eq!(frame.frametype, 0x109);
    }

    #[test]
    fn test_refresh_wrong_prefix_not_handled() {
        let inventory = Inventory::new();
        inventory.rebuild(&config_with_one_module());
        assert!(!inventory.handle_refresh("other/topic", b"ALL", "hapcan/refresh"));
        assert!(!inventory.handle_refresh("hapcan/refresh", b"NOPE", "hapcan/refresh"));
    }

    #[test]
    fn test_absorb_ignores_unknown_module() {
        let inventory = Inventory::new();
        inventory.rebuild(&config_with_one_module());
        assert!(!inventory.absorb(&response(0x10C, 99, 99, [0; 8])));
    }

    #[test]
    fn test_health_parts_keyed_on_selector() {
        let inventory = Inventory::new();
        inventory.rebuild(&config_with_one_module());
        assert!(inventory.absorb(&response(0x115, 16, 32, [1, 1, 2, 3, 4, 5, 6, 7])));
        // Part 1 again: already latched
        assert!(!inventory.absorb(&response(0x115, 16, 32, [1, 9, 9, 9, 9, 9, 9, 9])));
        assert!(inventory.absorb(&response(0x115, 16, 32, [2, 0, 0, 8, 9, 10, 11, 12])));
    }
}
