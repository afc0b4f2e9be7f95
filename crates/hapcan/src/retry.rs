//! Give-up counter for requests to modules that stop answering.
//!
//! Both the inventory engine and the RGB/RGBW aggregator stop re-sending a
//! request after it has been selected for the same target on consecutive
//! ticks. The counter tracks the last key and reports when the ceiling is
//! reached.

/// Maximum identical requests before a module is considered unresponsive.
pub const SEND_RETRIES: u32 = 3;

#[derive(Debug)]
pub struct Retry<K> {
    last: Option<K>,
    count: u32,
    limit: u32,
}

impl<K: PartialEq> Retry<K> {
    pub fn new(limit: u32) -> Self {
        Self {
            last: None,
            count: 0,
            limit,
        }
    }

    /// Record that `key` was selected again.
    ///
    /// Returns `true` when the key has now been selected `limit` times in a
    /// row and the caller should give up on it. The counter resets on a
    /// different key and after a give-up.
    pub fn check(&mut self, key: K) -> bool {
        if self.last.as_ref() == Some(&key) {
            self.count += 1;
        } else {
            self.last = Some(key);
            self.count = 0;
        }
        if self.count >= self.limit {
            self.clear();
            return true;
        }
        false
    }

    /// Forget the tracked key, e.g. when nothing needed sending this tick.
    pub fn clear(&mut self) {
        self.last = None;
        self.count = 0;
    }
}

impl<K: PartialEq> Default for Retry<K> {
    fn default() -> Self {
        Self::new(SEND_RETRIES)
    }
}
