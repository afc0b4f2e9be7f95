//! Gateway configuration: JSON file model, loader, change detection and the
//! shared snapshot handle.
//!
//! The file is a single JSON object. Unknown keys are ignored; missing keys
//! fall back to defaults so a partial file still yields a runnable (if
//! mostly disabled) gateway.

use serde::Deserialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Default programmer socket port (the HAPCAN Ethernet interface default).
pub const DEFAULT_SOCKET_PORT: u16 = 33556;

/// Topic pair of a single controllable entity.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct TopicPair {
    pub state: Option<String>,
    pub command: Option<String>,
}

/// Topic pair bound to a numbered channel.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ChannelTopics {
    pub channel: u8,
    pub state: Option<String>,
    pub command: Option<String>,
}

/// One relay module: up to six relays.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RelayModule {
    pub node: u8,
    pub group: u8,
    #[serde(default)]
    pub relays: Vec<ChannelTopics>,
}

/// One button/LED module, optionally carrying the single-sensor temperature
/// subsystem of the same physical device.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ButtonModule {
    pub node: u8,
    pub group: u8,
    #[serde(default)]
    pub buttons: Vec<ChannelTopics>,
    #[serde(default)]
    pub temperature: Option<TopicPair>,
    #[serde(default)]
    pub thermostat: Option<TopicPair>,
    #[serde(default, rename = "temperatureController")]
    pub temperature_controller: Option<TopicPair>,
    #[serde(default, rename = "temperatureError")]
    pub temperature_error: Option<TopicPair>,
}

/// One RGB controller (frametype 0x308): three colour channels plus master.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RgbModule {
    pub node: u8,
    pub group: u8,
    #[serde(rename = "isRGB", default)]
    pub is_rgb: bool,
    /// Combined RGB entity (at most one).
    #[serde(default)]
    pub rgb: Vec<TopicPair>,
    /// Independently driven channels when `isRGB` is false.
    #[serde(default)]
    pub rgbw: Vec<ChannelTopics>,
}

/// One RGBW controller: four colour channels plus master.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RgbwModule {
    pub node: u8,
    pub group: u8,
    #[serde(rename = "isRGBW", default)]
    pub is_rgbw: bool,
    #[serde(rename = "isRGB", default)]
    pub is_rgb: bool,
    #[serde(default)]
    pub rgb: Vec<TopicPair>,
    #[serde(default)]
    pub rgbw: Vec<ChannelTopics>,
}

/// One temperature sensor of a TIM module.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TimSensor {
    pub channel: u8,
    #[serde(rename = "temperatureState")]
    pub temperature_state: Option<String>,
    #[serde(rename = "thermostatState")]
    pub thermostat_state: Option<String>,
    #[serde(rename = "thermostatCommand")]
    pub thermostat_command: Option<String>,
    #[serde(rename = "errorState")]
    pub error_state: Option<String>,
}

/// One multi-sensor temperature + infrared module.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TimModule {
    pub node: u8,
    pub group: u8,
    #[serde(default)]
    pub temperature: Vec<TimSensor>,
    #[serde(rename = "irCommand", default)]
    pub ir_command: Option<String>,
}

/// The whole configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    #[serde(rename = "mqttBroker")]
    pub mqtt_broker: String,
    #[serde(rename = "mqttClientID")]
    pub mqtt_client_id: String,
    #[serde(rename = "subscribeTopics")]
    pub subscribe_topics: Vec<String>,

    #[serde(rename = "enableMQTT")]
    pub enable_mqtt: bool,
    #[serde(rename = "enableSocketServer")]
    pub enable_socket_server: bool,
    #[serde(rename = "enableRTCFrame")]
    pub enable_rtc_frame: bool,

    #[serde(rename = "enableRawHapcan")]
    pub enable_raw_hapcan: bool,
    #[serde(rename = "rawHapcanPubTopic")]
    pub raw_hapcan_pub_topic: Option<String>,
    #[serde(rename = "rawHapcanSubTopic")]
    pub raw_hapcan_sub_topic: Option<String>,

    #[serde(rename = "enableHapcanStatus")]
    pub enable_hapcan_status: bool,
    #[serde(rename = "statusPubTopic")]
    pub status_pub_topic: Option<String>,
    #[serde(rename = "statusSubTopic")]
    pub status_sub_topic: Option<String>,

    #[serde(rename = "enableGateway")]
    pub enable_gateway: bool,

    #[serde(rename = "computerID1")]
    pub computer_id1: Option<i64>,
    #[serde(rename = "computerID2")]
    pub computer_id2: Option<i64>,

    #[serde(rename = "canInterface")]
    pub can_interface: String,
    #[serde(rename = "socketServerBind")]
    pub socket_server_bind: String,
    #[serde(rename = "socketServerPort")]
    pub socket_server_port: u16,

    #[serde(rename = "HAPCANRelays")]
    pub relays: Vec<RelayModule>,
    #[serde(rename = "HAPCANButtons")]
    pub buttons: Vec<ButtonModule>,
    #[serde(rename = "HAPCANRGBs")]
    pub rgbs: Vec<RgbModule>,
    #[serde(rename = "RGBWs")]
    pub rgbws: Vec<RgbwModule>,
    #[serde(rename = "TIMs")]
    pub tims: Vec<TimModule>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mqtt_broker: String::new(),
            mqtt_client_id: String::new(),
            subscribe_topics: Vec::new(),
            enable_mqtt: false,
            enable_socket_server: false,
            enable_rtc_frame: false,
            enable_raw_hapcan: false,
            raw_hapcan_pub_topic: None,
            raw_hapcan_sub_topic: None,
            enable_hapcan_status: false,
            status_pub_topic: None,
            status_sub_topic: None,
            enable_gateway: false,
            computer_id1: None,
            computer_id2: None,
            can_interface: "can0".to_string(),
            socket_server_bind: "0.0.0.0".to_string(),
            socket_server_port: DEFAULT_SOCKET_PORT,
            relays: Vec::new(),
            buttons: Vec::new(),
            rgbs: Vec::new(),
            rgbws: Vec::new(),
            tims: Vec::new(),
        }
    }
}

impl GatewayConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The gateway's own node/group pair. Out-of-range or missing values
    /// fall back to 254 for both.
    pub fn computer_id(&self) -> (u8, u8) {
        let id1 = self.computer_id1.filter(|v| (0..=255).contains(v));
        let id2 = self.computer_id2.filter(|v| (0..=255).contains(v));
        match (id1, id2) {
            (Some(a), Some(b)) => (a as u8, b as u8),
            _ => (254, 254),
        }
    }

    /// Broker host and port parsed from the `mqttBroker` URL.
    pub fn mqtt_host_port(&self) -> (String, u16) {
        let trimmed = self
            .mqtt_broker
            .trim_start_matches("tcp://")
            .trim_start_matches("mqtt://");
        match trimmed.rsplit_once(':') {
            Some((host, port)) => (
                host.to_string(),
                port.parse().unwrap_or(1883),
            ),
            None => (trimmed.to_string(), 1883),
        }
    }

    /// True when the MQTT connection parameters differ from `other`, i.e.
    /// a reload must close and reopen the broker connection.
    pub fn mqtt_params_changed(&self, other: &GatewayConfig) -> bool {
        self.mqtt_broker != other.mqtt_broker
            || self.mqtt_client_id != other.mqtt_client_id
            || self.subscribe_topics != other.subscribe_topics
    }

    /// True when the socket server parameters differ from `other`.
    pub fn socket_params_changed(&self, other: &GatewayConfig) -> bool {
        self.socket_server_bind != other.socket_server_bind
            || self.socket_server_port != other.socket_server_port
    }
}

/// Shared configuration snapshot.
///
/// Readers take a cheap `Arc` clone and never hold the lock across work; a
/// reload publishes a whole new snapshot atomically.
#[derive(Debug)]
pub struct ConfigHandle {
    inner: RwLock<Arc<GatewayConfig>>,
}

impl ConfigHandle {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            inner: RwLock::new(Arc::new(config)),
        }
    }

    pub fn snapshot(&self) -> Arc<GatewayConfig> {
        self.inner.read().unwrap().clone()
    }

    pub fn replace(&self, config: GatewayConfig) {
        *self.inner.write().unwrap() = Arc::new(config);
    }
}

/// Polls the configuration file for content changes.
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    last_hash: Option<u64>,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_hash: None,
        }
    }

    /// Returns `true` when the file content changed since the last call.
    /// The first call records the baseline and reports no change.
    pub fn changed(&mut self) -> bool {
        let Ok(content) = std::fs::read(&self.path) else {
            return false;
        };
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        let hash = hasher.finish();
        match self.last_hash {
            None => {
                self.last_hash = Some(hash);
                false
            }
            Some(previous) if previous == hash => false,
            Some(_) => {
                self.last_hash = Some(hash);
                true
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "mqttBroker": "tcp://broker.local:1883",
        "mqttClientID": "hapcan-gw",
        "subscribeTopics": ["home/#"],
        "enableMQTT": true,
        "enableSocketServer": true,
        "enableRTCFrame": true,
        "enableRawHapcan": false,
        "enableHapcanStatus": true,
        "statusPubTopic": "hapcan/status",
        "statusSubTopic": "hapcan/refresh",
        "enableGateway": true,
        "computerID1": 32,
        "computerID2": 16,
        "HAPCANRelays": [
            {"node": 16, "group": 32, "relays": [
                {"channel": 3, "state": "home/relay3", "command": "home/relay3/set"}
            ]}
        ],
        "HAPCANButtons": [
            {"node": 4, "group": 1,
             "buttons": [{"channel": 1, "state": "home/btn1"}],
             "temperature": {"state": "home/temp"},
             "thermostat": {"state": "home/th", "command": "home/th/set"}}
        ],
        "RGBWs": [
            {"node": 5, "group": 1, "isRGBW": true, "isRGB": false,
             "rgbw": [{"channel": 1, "state": "rgbw/state", "command": "rgbw/set"}]}
        ]
    }"#;

    #[test]
    fn test_parse_sample() {
        let config: GatewayConfig = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(config.computer_id(), (32, 16));
        assert_eq!(config.mqtt_host_port(), ("broker.local".to_string(), 1883));
        assert_eq!(config.relays.len(), 1);
        assert_eq!(config.relays[0].relays[0].channel, 3);
        assert_eq!(
            config.buttons[0].temperature.as_ref().unwrap().state.as_deref(),
            Some("home/temp")
        );
        assert!(config.rgbws[0].is_rgbw);
        // Defaults for keys not present in the file
        assert_eq!(config.can_interface, "can0");
        assert_eq!(config.socket_server_port, DEFAULT_SOCKET_PORT);
    }

    #[test]
    fn test_computer_id_defaults_on_error() {
        let config: GatewayConfig = serde_json::from_str(r#"{"computerID1": 300}"#).unwrap();
        assert_eq!(config.computer_id(), (254, 254));
        let config: GatewayConfig = serde_json::from_str(r#"{"computerID1": 10}"#).unwrap();
        // Missing ID2 invalidates both
        assert_eq!(config.computer_id(), (254, 254));
    }

    #[test]
    fn test_empty_object_is_valid() {
        let config: GatewayConfig = serde_json::from_str("{}").unwrap();
        assert!(!config.enable_mqtt);
        assert!(config.relays.is_empty());
    }

    #[test]
    fn test_mqtt_params_changed() {
        let a: GatewayConfig = serde_json::from_str(SAMPLE).unwrap();
        let mut b: GatewayConfig = serde_json::from_str(SAMPLE).unwrap();
        assert!(!a.mqtt_params_changed(&b));
        b.mqtt_client_id = "other".into();
        assert!(a.mqtt_params_changed(&b));
    }

    #[test]
    fn test_watcher_detects_content_change() {
        let dir = std::env::temp_dir().join("hapcan-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("cfg-{}.json", std::process::id()));
        std::fs::write(&path, b"{}").unwrap();

        let mut watcher = ConfigWatcher::new(&path);
        assert!(!watcher.changed()); // baseline
        assert!(!watcher.changed()); // unchanged
        std::fs::write(&path, br#"{"enableMQTT": true}"#).unwrap();
        assert!(watcher.changed());
        assert!(!watcher.changed());

        std::fs::remove_file(&path).ok();
    }
}
