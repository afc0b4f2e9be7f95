//! Dispatcher tasks draining the endpoint read queues.

use engine::Engine;
use hapcan::time;
use programmer::Reply;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Pacing after a batch of work / while idle.
const BUSY_PAUSE: Duration = Duration::from_millis(2);
const IDLE_PAUSE: Duration = Duration::from_millis(5);

/// CAN read queue -> routing/raw/inventory pipelines.
pub async fn run_can_dispatcher(engine: Arc<Engine>) {
    loop {
        let mut worked = false;
        while let Some(stamped) = engine.queues.can_read.pop() {
            engine.handle_can_frame(&stamped.msg, stamped.timestamp_ms);
            worked = true;
        }
        sleep(if worked { BUSY_PAUSE } else { IDLE_PAUSE }).await;
    }
}

/// MQTT subscribe queue -> routing/raw/refresh pipelines.
pub async fn run_mqtt_dispatcher(engine: Arc<Engine>) {
    loop {
        let mut worked = false;
        while let Some(stamped) = engine.queues.mqtt_sub.pop() {
            engine.handle_mqtt_message(&stamped.msg, stamped.timestamp_ms);
            worked = true;
        }
        sleep(if worked { BUSY_PAUSE } else { IDLE_PAUSE }).await;
    }
}

/// Programmer read queue -> state machine -> socket or CAN write queues.
pub async fn run_socket_dispatcher(engine: Arc<Engine>) {
    loop {
        let mut worked = false;
        while let Some(stamped) = engine.queues.tcp_read.pop() {
            worked = true;
            let computer_id = engine.config.snapshot().computer_id();
            let now = chrono::Local::now();
            let reply = programmer::handle_frame(
                &stamped.msg,
                computer_id,
                &now,
                time::system_uptime_secs(),
            );
            match reply {
                Reply::None => {}
                Reply::Socket(frames) => {
                    for frame in frames {
                        engine.queues.tcp_write.push(frame, stamped.timestamp_ms);
                    }
                }
                // Frames injected from the PC tool are not mirrored back.
                Reply::Can(frame) => engine.queue_can_frame(&frame, stamped.timestamp_ms, false),
            }
        }
        sleep(if worked { BUSY_PAUSE } else { IDLE_PAUSE }).await;
    }
}
