//! Per-module-type translation between HAPCAN frames and MQTT payloads.
//!
//! Each module type contributes two things: a registration routine that adds
//! its mask/match and command-topic rules to the routing table when the
//! configuration is (re)built, and pure encode/decode routines the
//! dispatcher calls on matched traffic. Decoders receive the rule's frame
//! template whose metadata bytes (target node/group, channel, selector)
//! were filled in at registration time.

pub mod button;
pub mod payload;
pub mod raw;
pub mod relay;
pub mod rgb;
pub mod rgbw;
pub mod temperature;
pub mod tim;

use aggregator::Aggregator;
use config::GatewayConfig;
use routing::RoutingTable;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unrecognized payload")]
    InvalidPayload,
    #[error("unknown selector {0:#04x}")]
    UnknownSelector(u8),
    #[error("unexpected state byte {0:#04x}")]
    UnknownState(u8),
}

/// Register every configured module in the routing table and the RGB/RGBW
/// aggregator. Called once at startup and again on every configuration
/// reload, after both targets were cleared.
pub fn register_all(config: &GatewayConfig, routing: &RoutingTable, aggregator: &Aggregator) {
    let computer_id = config.computer_id();
    for module in &config.relays {
        relay::register(module, computer_id, routing);
    }
    for module in &config.buttons {
        button::register(module, computer_id, routing);
        temperature::register(module, computer_id, routing);
    }
    for module in &config.rgbs {
        rgb::register(module, computer_id, routing, aggregator);
    }
    for module in &config.rgbws {
        rgbw::register(module, computer_id, routing, aggregator);
    }
    for module in &config.tims {
        tim::register(module, computer_id, routing);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all_populates_routing() {
        let config: GatewayConfig = serde_json::from_str(
            r#"{
                "computerID1": 1, "computerID2": 2,
                "HAPCANRelays": [{"node": 16, "group": 32, "relays": [
                    {"channel": 3, "state": "r/state", "command": "r/set"}
                ]}],
                "HAPCANButtons": [{"node": 4, "group": 1, "buttons": [
                    {"channel": 1, "state": "b/state"}
                ]}]
            }"#,
        )
        .unwrap();
        let routing = RoutingTable::new();
        let aggregator = Aggregator::new();
        register_all(&config, &routing, &aggregator);
        // relay state + button state
        assert_eq!(routing.can_rule_count(), 2);
        // relay command only
        assert_eq!(routing.mqtt_rule_count(), 1);
    }
}
