//! Periodic drivers: the RTC broadcast and the 50 ms maintenance tick.

use crate::can_io::CanEndpoint;
use buffers::now_ms;
use engine::Engine;
use hapcan::time;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Broadcast the RTC frame at second 0 of every wall-clock minute.
pub async fn run_rtc(engine: Arc<Engine>, can: Arc<CanEndpoint>) {
    loop {
        let now = chrono::Local::now();
        sleep(Duration::from_secs(time::seconds_until_minute(&now))).await;
        if can.link.is_connected() {
            engine.rtc_tick(&chrono::Local::now(), now_ms());
        }
    }
}

/// Inventory and aggregator maintenance every 50 ms.
///
/// The cadence leaves modules time to answer and keeps the request traffic
/// from loading the bus (a full status answer can be over a dozen frames).
pub async fn run_maintenance(engine: Arc<Engine>, can: Arc<CanEndpoint>) {
    let mut interval = tokio::time::interval(Duration::from_millis(50));
    loop {
        interval.tick().await;
        if can.link.is_connected() {
            engine.periodic_tick(now_ms());
        }
    }
}
