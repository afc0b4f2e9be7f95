//! Per-endpoint message queues and the endpoint error taxonomy.
//!
//! Every endpoint direction has a fixed-capacity FIFO of messages, each
//! stamped with its enqueue time. Pushes never block and never fail: when a
//! queue is full the oldest entry is discarded. Pops are non-blocking. No
//! lock is held across I/O.

use hapcan::Frame;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// CAN read/write queue capacity.
pub const CAN_QUEUE_CAPACITY: usize = 60;
/// MQTT publish/subscribe queue capacity.
pub const MQTT_QUEUE_CAPACITY: usize = 600;
/// Programmer socket read/write queue capacity.
pub const SOCKET_QUEUE_CAPACITY: usize = 60;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A queued message with its enqueue timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamped<T> {
    pub msg: T,
    pub timestamp_ms: u64,
}

/// Fixed-capacity lossy FIFO.
#[derive(Debug)]
pub struct MsgQueue<T> {
    inner: Mutex<VecDeque<Stamped<T>>>,
    capacity: usize,
}

impl<T> MsgQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Enqueue a message, dropping the oldest entry when full.
    pub fn push(&self, msg: T, timestamp_ms: u64) {
        let mut queue = self.inner.lock().unwrap();
        if queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(Stamped { msg, timestamp_ms });
    }

    /// Dequeue the oldest message, `None` when empty.
    pub fn pop(&self) -> Option<Stamped<T>> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Discard all queued messages (clean endpoint reinit).
    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

/// An MQTT message in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl MqttMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// The six queues of the gateway: one per direction per endpoint.
#[derive(Debug)]
pub struct GatewayQueues {
    pub can_read: MsgQueue<Frame>,
    pub can_write: MsgQueue<Frame>,
    pub mqtt_sub: MsgQueue<MqttMessage>,
    pub mqtt_pub: MsgQueue<MqttMessage>,
    pub tcp_read: MsgQueue<Vec<u8>>,
    pub tcp_write: MsgQueue<Vec<u8>>,
}

impl GatewayQueues {
    pub fn new() -> Self {
        Self {
            can_read: MsgQueue::new(CAN_QUEUE_CAPACITY),
            can_write: MsgQueue::new(CAN_QUEUE_CAPACITY),
            mqtt_sub: MsgQueue::new(MQTT_QUEUE_CAPACITY),
            mqtt_pub: MsgQueue::new(MQTT_QUEUE_CAPACITY),
            tcp_read: MsgQueue::new(SOCKET_QUEUE_CAPACITY),
            tcp_write: MsgQueue::new(SOCKET_QUEUE_CAPACITY),
        }
    }
}

impl Default for GatewayQueues {
    fn default() -> Self {
        Self::new()
    }
}

/// Endpoint error taxonomy.
#[derive(Error, Debug)]
pub enum EndpointError {
    /// Structural queue corruption. The endpoint is closed and its queues
    /// are dropped.
    #[error("buffer corrupted")]
    Buffer,
    /// Transient network-layer failure. The endpoint is closed and reopened
    /// with its queues preserved.
    #[error("socket error: {0}")]
    Socket(String),
    /// Publish ack did not arrive in time. The broker may still deliver the
    /// message; at-most-once semantics are accepted here.
    #[error("ack timeout")]
    Timeout,
    /// Caller bug; not recoverable by a reinit.
    #[error("parameter error: {0}")]
    Parameter(&'static str),
    #[error("{0}")]
    Other(String),
}

/// What the supervisor does with a failed endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Close the endpoint and drop its queued data.
    HardClose,
    /// Close the endpoint, keep queued data, reopen.
    SoftClose,
    /// Log and carry on.
    LogOnly,
}

impl EndpointError {
    /// Classify the error into the supervisor's recovery action.
    pub fn recovery(&self) -> Recovery {
        match self {
            EndpointError::Buffer => Recovery::HardClose,
            EndpointError::Socket(_) | EndpointError::Other(_) => Recovery::SoftClose,
            EndpointError::Timeout | EndpointError::Parameter(_) => Recovery::LogOnly,
        }
    }
}

/// Connection state shared between an endpoint's workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
}

/// Mutex-guarded link state gating the read/write workers.
#[derive(Debug)]
pub struct Link {
    state: Mutex<LinkState>,
}

impl Link {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LinkState::Disconnected),
        }
    }

    pub fn set(&self, state: LinkState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn get(&self) -> LinkState {
        *self.state.lock().unwrap()
    }

    pub fn is_connected(&self) -> bool {
        self.get() == LinkState::Connected
    }
}

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_fifo_order() {
        let queue = MsgQueue::new(4);
        queue.push(1u8, 10);
        queue.push(2, 11);
        queue.push(3, 12);
        assert_eq!(queue.pop().unwrap().msg, 1);
        assert_eq!(queue.pop().unwrap().msg, 2);
        assert_eq!(queue.pop().unwrap().msg, 3);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let queue = MsgQueue::new(3);
        for i in 0u8..8 {
            queue.push(i, u64::from(i));
        }
        // capacity + k pushes leave exactly capacity entries, the newest ones
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().unwrap().msg, 5);
        assert_eq!(queue.pop().unwrap().msg, 6);
        assert_eq!(queue.pop().unwrap().msg, 7);
    }

    #[test]
    fn test_timestamps_travel_with_messages() {
        let queue = MsgQueue::new(2);
        queue.push("a", 100);
        queue.push("b", 200);
        let first = queue.pop().unwrap();
        assert_eq!((first.msg, first.timestamp_ms), ("a", 100));
    }

    #[test]
    fn test_clear_empties_queue() {
        let queue = MsgQueue::new(2);
        queue.push(1u8, 0);
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_error_recovery_classification() {
        assert_eq!(EndpointError::Buffer.recovery(), Recovery::HardClose);
        assert_eq!(
            EndpointError::Socket("reset".into()).recovery(),
            Recovery::SoftClose
        );
        assert_eq!(EndpointError::Timeout.recovery(), Recovery::LogOnly);
        assert_eq!(
            EndpointError::Parameter("channel").recovery(),
            Recovery::LogOnly
        );
    }

    #[test]
    fn test_link_state_gate() {
        let link = Link::new();
        assert!(!link.is_connected());
        link.set(LinkState::Connected);
        assert!(link.is_connected());
    }
}
