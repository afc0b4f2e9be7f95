//! MQTT endpoint: rumqttc client, event loop and publish worker.
//!
//! The event loop feeds incoming publishes into the subscribe queue and
//! tracks QoS 1 delivery acks; the publish worker drains the publish queue.
//! Publishes whose ack does not arrive within the ceiling are logged and
//! forgotten: the broker may still deliver them, at-most-once is accepted.

use buffers::{now_ms, Link, LinkState, MqttMessage};
use engine::Engine;
use rumqttc::{AsyncClient, Event, MqttOptions, NetworkOptions, Outgoing, Packet, QoS};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::supervisor::Restart;

/// How long a QoS 1 publish may wait for its broker ack.
const ACK_CEILING: Duration = Duration::from_millis(200);

/// Outstanding QoS 1 publishes, keyed by packet id.
#[derive(Debug, Default)]
struct AckTracker {
    pending: Mutex<HashMap<u16, Instant>>,
}

impl AckTracker {
    fn sent(&self, pkid: u16) {
        if pkid != 0 {
            self.pending.lock().unwrap().insert(pkid, Instant::now());
        }
    }

    fn ack(&self, pkid: u16) {
        self.pending.lock().unwrap().remove(&pkid);
    }

    /// Drop and report publishes whose ack is overdue.
    fn sweep(&self) -> Vec<u16> {
        let mut pending = self.pending.lock().unwrap();
        let overdue: Vec<u16> = pending
            .iter()
            .filter(|(_, sent)| sent.elapsed() > ACK_CEILING)
            .map(|(pkid, _)| *pkid)
            .collect();
        for pkid in &overdue {
            pending.remove(pkid);
        }
        overdue
    }
}

/// Run the MQTT endpoint. Reconnects while enabled, tears the session down
/// and rebuilds it when the supervisor flags a parameter change.
pub async fn run(engine: Arc<Engine>, link: Arc<Link>, restart: Arc<Restart>) {
    loop {
        let config = engine.config.snapshot();
        if !config.enable_mqtt {
            tokio::time::sleep(Duration::from_secs(1)).await;
            continue;
        }

        let (host, port) = config.mqtt_host_port();
        let mut options = MqttOptions::new(config.mqtt_client_id.clone(), host.clone(), port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);
        let (client, mut event_loop) = AsyncClient::new(options, 64);
        let mut network_options = NetworkOptions::new();
        network_options.set_connection_timeout(10);
        event_loop.set_network_options(network_options);
        let tracker = Arc::new(AckTracker::default());

        let publisher = tokio::spawn(publish_worker(
            engine.clone(),
            link.clone(),
            client.clone(),
            tracker.clone(),
        ));

        info!(host, port, "MQTT session starting");
        loop {
            if restart.mqtt.swap(false, Ordering::Relaxed) {
                info!("MQTT parameters changed, closing session");
                let _ = client.disconnect().await;
                break;
            }
            // Bounded poll so the restart flag is observed while idle.
            match tokio::time::timeout(Duration::from_millis(100), event_loop.poll()).await {
                Err(_) => continue,
                Ok(Ok(event)) => {
                    handle_event(&engine, &link, &client, &tracker, event).await;
                }
                Ok(Err(error)) => {
                    error!(%error, "MQTT connection lost");
                    link.set(LinkState::Disconnected);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    break;
                }
            }
        }
        publisher.abort();
        link.set(LinkState::Disconnected);
    }
}

async fn handle_event(
    engine: &Engine,
    link: &Link,
    client: &AsyncClient,
    tracker: &AckTracker,
    event: Event,
) {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => {
            info!("MQTT connected");
            link.set(LinkState::Connected);
            let config = engine.config.snapshot();
            for topic in &config.subscribe_topics {
                if let Err(error) = client.subscribe(topic.clone(), QoS::AtMostOnce).await {
                    warn!(%error, topic, "subscribe failed");
                }
            }
        }
        Event::Incoming(Packet::Publish(publish)) => {
            engine.queues.mqtt_sub.push(
                MqttMessage::new(publish.topic.clone(), publish.payload.to_vec()),
                now_ms(),
            );
        }
        Event::Incoming(Packet::PubAck(ack)) => {
            tracker.ack(ack.pkid);
        }
        Event::Outgoing(Outgoing::Publish(pkid)) => {
            tracker.sent(pkid);
        }
        other => debug!(?other, "MQTT event"),
    }
}

/// Drain the publish queue towards the broker while connected.
async fn publish_worker(
    engine: Arc<Engine>,
    link: Arc<Link>,
    client: AsyncClient,
    tracker: Arc<AckTracker>,
) {
    loop {
        if link.is_connected() {
            while let Some(stamped) = engine.queues.mqtt_pub.pop() {
                let message = stamped.msg;
                if let Err(error) = client
                    .publish(message.topic, QoS::AtLeastOnce, false, message.payload)
                    .await
                {
                    warn!(%error, "publish enqueue failed");
                    break;
                }
            }
            for pkid in tracker.sweep() {
                // Non-fatal: the broker may still deliver the message.
                warn!(pkid, "publish ack overdue");
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        } else {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
