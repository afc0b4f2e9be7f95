//! Configuration reload supervision.
//!
//! Polls the configuration file every 10 seconds. On a content change the
//! new snapshot is published, routing/aggregator/inventory are rebuilt
//! atomically (which also re-runs the initial status sweep), and endpoints
//! whose connection parameters changed are flagged for a restart.

use config::{ConfigWatcher, GatewayConfig};
use engine::Engine;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Endpoint restart requests set by the supervisor, consumed by the
/// endpoint tasks.
#[derive(Debug, Default)]
pub struct Restart {
    pub mqtt: AtomicBool,
    pub tcp: AtomicBool,
}

pub async fn run_config_watcher(engine: Arc<Engine>, path: PathBuf, restart: Arc<Restart>) {
    let mut watcher = ConfigWatcher::new(path);
    // First call records the baseline of the file loaded at startup.
    watcher.changed();
    loop {
        tokio::time::sleep(Duration::from_secs(10)).await;
        if !watcher.changed() {
            continue;
        }
        match GatewayConfig::load(watcher.path()) {
            Ok(new_config) => {
                let old_config = engine.config.snapshot();
                let mqtt_changed = old_config.mqtt_params_changed(&new_config);
                let tcp_changed = old_config.socket_params_changed(&new_config);
                engine.config.replace(new_config);
                engine.rebuild();
                if mqtt_changed {
                    restart.mqtt.store(true, Ordering::Relaxed);
                }
                if tcp_changed {
                    restart.tcp.store(true, Ordering::Relaxed);
                }
                info!(mqtt_changed, tcp_changed, "configuration reloaded");
            }
            Err(error) => warn!(%error, "new configuration rejected, keeping current"),
        }
    }
}
