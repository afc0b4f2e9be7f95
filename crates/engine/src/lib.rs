//! The gateway dispatcher.
//!
//! Ties the routing table, the module encoders/decoders, the aggregator and
//! the inventory together over the shared queues. Endpoint workers feed the
//! read queues and drain the write queues; everything in between goes
//! through [`Engine::handle_can_frame`] and [`Engine::handle_mqtt_message`].
//!
//! Routing scans loop past each hit so every applicable rule fires; decode
//! failures are logged at debug level and dropped, they are never endpoint
//! errors.

use aggregator::Aggregator;
use buffers::{GatewayQueues, MqttMessage};
use chrono::{DateTime, Local};
use config::{ConfigHandle, GatewayConfig};
use hapcan::{frame_type, socket, system_frame, time, Frame};
use inventory::Inventory;
use modules::{button, raw, relay, rgb, rgbw, temperature, tim};
use routing::RoutingTable;
use std::sync::Arc;
use tracing::{debug, info};

pub struct Engine {
    pub queues: GatewayQueues,
    pub routing: RoutingTable,
    pub aggregator: Aggregator,
    pub inventory: Inventory,
    pub config: ConfigHandle,
}

impl Engine {
    /// Build the engine and populate routing, aggregator and inventory from
    /// the configuration.
    pub fn new(config: GatewayConfig) -> Arc<Self> {
        let engine = Arc::new(Self {
            queues: GatewayQueues::new(),
            routing: RoutingTable::new(),
            aggregator: Aggregator::new(),
            inventory: Inventory::new(),
            config: ConfigHandle::new(config),
        });
        engine.rebuild();
        engine
    }

    /// Atomically rebuild the routing table, the aggregator and the
    /// inventory from the current configuration snapshot. Traffic arriving
    /// during the rebuild sees either the old or the new rule set, never a
    /// partial mix of matched rule and stale output.
    pub fn rebuild(&self) {
        let config = self.config.snapshot();
        self.routing.clear();
        self.aggregator.clear();
        modules::register_all(&config, &self.routing, &self.aggregator);
        self.inventory.rebuild(&config);
        info!(
            can_rules = self.routing.can_rule_count(),
            mqtt_rules = self.routing.mqtt_rule_count(),
            "gateway rules rebuilt"
        );
    }

    /// Queue a frame for the CAN bus, optionally mirroring it to the
    /// programmer socket so a connected PC tool observes the traffic.
    pub fn queue_can_frame(&self, frame: &Frame, timestamp_ms: u64, mirror_to_socket: bool) {
        self.queues.can_write.push(*frame, timestamp_ms);
        if mirror_to_socket {
            self.queues
                .tcp_write
                .push(socket::encode(frame).to_vec(), timestamp_ms);
        }
    }

    fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>, timestamp_ms: u64) {
        self.queues
            .mqtt_pub
            .push(MqttMessage::new(topic, payload), timestamp_ms);
    }

    /// Process one frame read from the CAN bus.
    pub fn handle_can_frame(&self, frame: &Frame, timestamp_ms: u64) {
        let config = self.config.snapshot();

        // Mirror all bus traffic to the programmer socket.
        self.queues
            .tcp_write
            .push(socket::encode(frame).to_vec(), timestamp_ms);

        let mut responded = false;

        if config.enable_raw_hapcan && frame.is_application() {
            if let Some(topic) = &config.raw_hapcan_pub_topic {
                self.publish(topic, raw::state_payload(frame), timestamp_ms);
                responded = true;
            }
        }

        if config.enable_gateway {
            responded |= self.route_can_frame(frame, timestamp_ms);
        }

        if config.enable_hapcan_status && !responded {
            self.inventory.absorb(frame);
        }
    }

    /// Scan the CAN->MQTT rules and emit every matching publication.
    /// Returns true when at least one payload was published.
    fn route_can_frame(&self, frame: &Frame, timestamp_ms: u64) -> bool {
        let mut responded = false;
        let mut offset = 0;
        while let Some((index, state_topic)) = self.routing.match_can_frame(frame, offset) {
            offset = index + 1;
            match frame.frametype {
                frame_type::BUTTON => match button::state_payloads(frame) {
                    Ok(payloads) => {
                        if let Some(topic) = &state_topic {
                            for payload in payloads {
                                self.publish(topic, payload, timestamp_ms);
                                responded = true;
                            }
                        }
                    }
                    Err(error) => debug!(%error, "button frame dropped"),
                },
                frame_type::RELAY => match relay::state_payload(frame) {
                    Ok(payload) => {
                        if let Some(topic) = &state_topic {
                            self.publish(topic, payload, timestamp_ms);
                            responded = true;
                        }
                    }
                    Err(error) => debug!(%error, "relay frame dropped"),
                },
                frame_type::TEMPERATURE => match temperature::state_payload(frame) {
                    Ok(payload) => {
                        if let Some(topic) = &state_topic {
                            self.publish(topic, payload, timestamp_ms);
                            responded = true;
                        }
                    }
                    Err(error) => debug!(%error, "temperature frame dropped"),
                },
                frame_type::MULTI_TEMPERATURE => match tim::state_payload(frame) {
                    Ok(payload) => {
                        if let Some(topic) = &state_topic {
                            self.publish(topic, payload, timestamp_ms);
                            responded = true;
                        }
                    }
                    Err(error) => debug!(%error, "multi-temperature frame dropped"),
                },
                frame_type::RGB | frame_type::RGBW => {
                    let payload = self.aggregator.absorb(frame, state_topic.as_deref());
                    if let (Some(topic), Some(payload)) = (&state_topic, payload) {
                        self.publish(topic, payload, timestamp_ms);
                        responded = true;
                    }
                }
                other => debug!(frametype = other, "no encoder for matched frame"),
            }
        }
        responded
    }

    /// Process one message received from the broker.
    pub fn handle_mqtt_message(&self, message: &MqttMessage, timestamp_ms: u64) {
        let config = self.config.snapshot();
        let mut responded = false;

        if config.enable_raw_hapcan
            && config.raw_hapcan_sub_topic.as_deref() == Some(message.topic.as_str())
        {
            match raw::command_frame(&message.payload) {
                Ok(frame) => {
                    self.queue_can_frame(&frame, timestamp_ms, true);
                    responded = true;
                }
                Err(error) => debug!(%error, topic = %message.topic, "raw payload dropped"),
            }
        }

        if config.enable_gateway {
            responded |= self.route_mqtt_message(message, timestamp_ms);
        }

        if config.enable_hapcan_status && !responded {
            if let Some(status_sub) = &config.status_sub_topic {
                self.inventory
                    .handle_refresh(&message.topic, &message.payload, status_sub);
            }
        }
    }

    /// Scan the MQTT->CAN rules and queue every decoded frame sequence.
    /// Returns true when at least one frame was queued.
    fn route_mqtt_message(&self, message: &MqttMessage, timestamp_ms: u64) -> bool {
        let mut responded = false;
        let mut offset = 0;
        while let Some((index, template)) = self.routing.match_topic(&message.topic, offset) {
            offset = index + 1;
            let frames = match template.frametype {
                frame_type::BUTTON => button::command_frames(&template, &message.payload),
                frame_type::RELAY => relay::command_frames(&template, &message.payload),
                frame_type::TEMPERATURE => temperature::command_frames(&template, &message.payload),
                frame_type::MULTI_TEMPERATURE => tim::command_frames(&template, &message.payload),
                frame_type::RGB => rgb::command_frames(&template, &message.payload),
                frame_type::RGBW => rgbw::command_frames(&template, &message.payload),
                other => {
                    debug!(frametype = other, "no decoder for matched topic");
                    continue;
                }
            };
            match frames {
                Ok(frames) => {
                    for frame in frames {
                        self.queue_can_frame(&frame, timestamp_ms, true);
                        responded = true;
                    }
                }
                Err(error) => debug!(%error, topic = %message.topic, "command payload dropped"),
            }
        }
        responded
    }

    /// 50 ms maintenance tick: inventory collection and aggregator
    /// status-request traffic.
    pub fn periodic_tick(&self, timestamp_ms: u64) {
        let config = self.config.snapshot();
        if !config.enable_hapcan_status {
            return;
        }
        let computer_id = config.computer_id();
        if let Some(frame) = self.inventory.tick_can(computer_id) {
            self.queue_can_frame(&frame, timestamp_ms, true);
        }
        if let Some(status_pub) = &config.status_pub_topic {
            if let Some(message) = self.inventory.tick_mqtt(status_pub) {
                self.publish(&message.topic, message.payload, timestamp_ms);
            }
        }
        if let Some((node, group)) = self.aggregator.pending_request() {
            let frame = system_frame(frame_type::STATUS_REQUEST_NODE, node, group, computer_id);
            self.queue_can_frame(&frame, timestamp_ms, true);
        }
    }

    /// Broadcast the RTC frame; called at second 0 of every minute.
    pub fn rtc_tick(&self, now: &DateTime<Local>, timestamp_ms: u64) {
        let config = self.config.snapshot();
        if !config.enable_rtc_frame || !time::clock_is_valid(now) {
            return;
        }
        let frame = time::rtc_frame(config.computer_id(), now);
        self.queue_can_frame(&frame, timestamp_ms, true);
    }
}
