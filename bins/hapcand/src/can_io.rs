//! CAN endpoint workers: connect, read and write over SocketCAN.
//!
//! The raw socket is synchronous, so the three workers run on plain threads
//! and talk to the rest of the daemon through the shared queues. The connect
//! worker retries at 1 Hz while disconnected; read and write workers are
//! gated by the shared link state and report failures by closing the
//! endpoint with the recovery action the error classifies to.

use buffers::{now_ms, EndpointError, Link, LinkState, Recovery};
use engine::Engine;
use hapcan::Frame;
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame as SocketcanFrame, Socket};
use std::io::ErrorKind;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Read timeout keeping the worker responsive to shutdown and reconnects.
const READ_TIMEOUT: Duration = Duration::from_millis(5);

pub struct CanEndpoint {
    socket: RwLock<Option<Arc<CanSocket>>>,
    pub link: Link,
}

impl CanEndpoint {
    pub fn new() -> Self {
        Self {
            socket: RwLock::new(None),
            link: Link::new(),
        }
    }

    fn connect(&self, interface: &str) -> Result<(), EndpointError> {
        let socket = CanSocket::open(interface)
            .map_err(|error| EndpointError::Socket(error.to_string()))?;
        socket
            .set_read_timeout(READ_TIMEOUT)
            .map_err(|error| EndpointError::Socket(error.to_string()))?;
        socket
            .set_write_timeout(Duration::from_millis(10))
            .map_err(|error| EndpointError::Socket(error.to_string()))?;
        *self.socket.write().unwrap() = Some(Arc::new(socket));
        self.link.set(LinkState::Connected);
        Ok(())
    }

    fn socket(&self) -> Option<Arc<CanSocket>> {
        self.socket.read().unwrap().clone()
    }

    /// Close the endpoint. A hard close additionally drops queued frames.
    pub fn close(&self, engine: &Engine, recovery: Recovery) {
        self.link.set(LinkState::Disconnected);
        *self.socket.write().unwrap() = None;
        if recovery == Recovery::HardClose {
            engine.queues.can_read.clear();
            engine.queues.can_write.clear();
        }
    }
}

impl Default for CanEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the three CAN workers.
pub fn spawn_workers(engine: Arc<Engine>, endpoint: Arc<CanEndpoint>) {
    {
        let engine = engine.clone();
        let endpoint = endpoint.clone();
        std::thread::Builder::new()
            .name("can-connect".into())
            .spawn(move || connect_worker(&engine, &endpoint))
            .expect("spawn can-connect");
    }
    {
        let engine = engine.clone();
        let endpoint = endpoint.clone();
        std::thread::Builder::new()
            .name("can-read".into())
            .spawn(move || read_worker(&engine, &endpoint))
            .expect("spawn can-read");
    }
    std::thread::Builder::new()
        .name("can-write".into())
        .spawn(move || write_worker(&engine, &endpoint))
        .expect("spawn can-write");
}

fn connect_worker(engine: &Engine, endpoint: &CanEndpoint) {
    loop {
        if !endpoint.link.is_connected() {
            let interface = engine.config.snapshot().can_interface.clone();
            match endpoint.connect(&interface) {
                Ok(()) => info!(interface, "CAN socket opened"),
                Err(error) => debug!(interface, %error, "CAN connect failed"),
            }
        }
        std::thread::sleep(Duration::from_secs(1));
    }
}

fn read_worker(engine: &Engine, endpoint: &CanEndpoint) {
    loop {
        let Some(socket) = endpoint.socket() else {
            std::thread::sleep(Duration::from_millis(5));
            continue;
        };
        match socket.read_frame() {
            Ok(can_frame) => {
                if !can_frame.is_extended() {
                    continue;
                }
                match Frame::from_can(can_frame.raw_id(), can_frame.data()) {
                    Ok(frame) => engine.queues.can_read.push(frame, now_ms()),
                    Err(error) => debug!(%error, "short CAN frame ignored"),
                }
            }
            Err(error)
                if error.kind() == ErrorKind::WouldBlock
                    || error.kind() == ErrorKind::TimedOut => {}
            Err(error) => {
                let endpoint_error = EndpointError::Socket(error.to_string());
                error!(%endpoint_error, "CAN read failed");
                endpoint.close(engine, endpoint_error.recovery());
            }
        }
    }
}

fn write_worker(engine: &Engine, endpoint: &CanEndpoint) {
    loop {
        if let Some(socket) = endpoint.socket() {
            while let Some(stamped) = engine.queues.can_write.pop() {
                let frame = stamped.msg;
                let Some(id) = ExtendedId::new(frame.can_id()) else {
                    warn!(id = frame.can_id(), "frame id exceeds 29 bits, dropped");
                    continue;
                };
                let Some(can_frame) = CanFrame::new(id, &frame.data) else {
                    warn!("CAN frame construction failed, dropped");
                    continue;
                };
                if let Err(error) = socket.write_frame(&can_frame) {
                    let endpoint_error = EndpointError::Socket(error.to_string());
                    error!(%endpoint_error, "CAN write failed");
                    endpoint.close(engine, endpoint_error.recovery());
                    break;
                }
            }
            std::thread::sleep(Duration::from_millis(2));
        } else {
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}
