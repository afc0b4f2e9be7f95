//! RGB/RGBW channel-state aggregation.
//!
//! RGB and RGBW controllers report one channel per CAN frame, but the MQTT
//! side wants one tuple. Each configured module keeps a per-channel value
//! and update flag; nothing is published until the master channel has been
//! observed, and a combined payload additionally waits for every component
//! channel. The master scales the components: `out = value * (master + 1)
//! / 256`, so master 255 passes values through and master 0 blanks them.
//!
//! Modules that stop answering status requests are retired after the shared
//! retry ceiling and revived by the next frame they emit.

use hapcan::retry::Retry;
use hapcan::{frame_type, Frame};
use std::sync::Mutex;
use tracing::debug;

/// Colour slots. The white slot is unused on RGB-family modules.
pub const CH_RED: usize = 0;
pub const CH_GREEN: usize = 1;
pub const CH_BLUE: usize = 2;
pub const CH_WHITE: usize = 3;

/// How a module's outputs are linked together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// Every channel is driven and reported independently.
    Independent,
    /// Three channels form one RGB entity.
    CombinedRgb,
    /// Four channels form one RGBW entity.
    CombinedRgbw,
}

/// Aggregation state of one configured module.
#[derive(Debug, Clone)]
pub struct Entry {
    pub node: u8,
    pub group: u8,
    /// `frame_type::RGB` or `frame_type::RGBW`; decides the master channel.
    pub frametype: u16,
    pub mode: ChannelMode,
    /// Combined-entity state topic.
    pub rgb_state_topic: Option<String>,
    /// Per-channel state topics for independent channels.
    pub channel_state_topics: [Option<String>; 4],
    colour: [u8; 5],
    updated: [bool; 5],
    ignore: bool,
}

impl Entry {
    pub fn new(
        node: u8,
        group: u8,
        frametype: u16,
        mode: ChannelMode,
        rgb_state_topic: Option<String>,
        channel_state_topics: [Option<String>; 4],
    ) -> Self {
        Self {
            node,
            group,
            frametype,
            mode,
            rgb_state_topic,
            channel_state_topics,
            colour: [0; 5],
            updated: [false; 5],
            ignore: false,
        }
    }

    /// Zero-based index of the master channel: 3 on RGB-family modules,
    /// 4 on RGBW-family modules.
    fn master(&self) -> usize {
        if self.frametype == frame_type::RGBW {
            4
        } else {
            3
        }
    }

    /// Component channels of the combined entity.
    fn component_count(&self) -> usize {
        match self.mode {
            ChannelMode::CombinedRgbw => 4,
            ChannelMode::CombinedRgb => 3,
            ChannelMode::Independent => 0,
        }
    }

    /// Scale a component value by the master channel.
    fn scaled(&self, index: usize) -> u8 {
        let master = self.colour[self.master()];
        match master {
            0 => 0,
            255 => self.colour[index],
            m => ((u16::from(self.colour[index]) * (u16::from(m) + 1)) >> 8) as u8,
        }
    }

    fn missing_channel(&self) -> bool {
        self.updated[..=self.master()].iter().any(|updated| !updated)
    }
}

/// The aggregator list, rebuilt on configuration reload.
#[derive(Debug, Default)]
pub struct Aggregator {
    entries: Mutex<Vec<Entry>>,
    retry: Mutex<Retry<(u8, u8)>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
        self.retry.lock().unwrap().clear();
    }

    pub fn add(&self, entry: Entry) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Absorb one channel report and decide what to publish on the matched
    /// state topic.
    ///
    /// The channel value is recorded even when nothing can be emitted yet;
    /// the entry's ignore latch is lifted by any received frame. Returns the
    /// payload for `state_topic`, or `None` while the master or a required
    /// component channel is still unobserved (or the rule carries no topic).
    pub fn absorb(&self, frame: &Frame, state_topic: Option<&str>) -> Option<String> {
        let channel = frame.data[2] as usize;
        let value = frame.data[3];
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.iter_mut().find(|entry| {
            entry.node == frame.module
                && entry.group == frame.group
                && entry.frametype == frame.frametype
        })?;
        if channel < 1 || channel > entry.master() + 1 {
            debug!(channel, "colour channel out of range");
            return None;
        }
        entry.updated[channel - 1] = true;
        entry.colour[channel - 1] = value;
        entry.ignore = false;

        let entry = entry.clone();
        drop(entries);

        if !entry.updated[entry.master()] {
            return None;
        }
        let state_topic = state_topic?;

        let combined = entry.mode != ChannelMode::Independent
            && entry.rgb_state_topic.as_deref() == Some(state_topic);
        if combined {
            let count = entry.component_count();
            if entry.updated[..count].iter().any(|updated| !updated) {
                return None;
            }
            let values: Vec<String> = (0..count)
                .map(|i| entry.scaled(i).to_string())
                .collect();
            return Some(values.join(","));
        }

        // Independent channel (or the extra white channel of a combined-RGB
        // module). A master update maps back to the channel whose state
        // topic was matched.
        let emit_channel = if entry.mode == ChannelMode::CombinedRgb {
            CH_WHITE
        } else if channel == entry.master() + 1 {
            entry
                .channel_state_topics
                .iter()
                .position(|topic| topic.as_deref() == Some(state_topic))?
        } else {
            channel - 1
        };
        if entry.updated[emit_channel] {
            Some(entry.scaled(emit_channel).to_string())
        } else {
            None
        }
    }

    /// Pick the next module whose channels still lack observations.
    ///
    /// Returns the (node, group) to address with a status request, applying
    /// the shared retry ceiling: a module selected too many times in a row
    /// is retired via its ignore latch.
    pub fn pending_request(&self) -> Option<(u8, u8)> {
        let mut entries = self.entries.lock().unwrap();
        let mut retry = self.retry.lock().unwrap();
        for entry in entries.iter_mut() {
            if entry.ignore || !entry.missing_channel() {
                continue;
            }
            let key = (entry.node, entry.group);
            if retry.check(key) {
                debug!(
                    node = entry.node,
                    group = entry.group,
                    "module not answering status requests, retiring"
                );
                entry.ignore = true;
                continue;
            }
            return Some(key);
        }
        retry.clear();
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_entry() -> Entry {
        Entry::new(
            5,
            1,
            frame_type::RGB,
            ChannelMode::CombinedRgb,
            Some("rgb/state".into()),
            [None, None, None, None],
        )
    }

    fn channel_frame(node: u8, group: u8, frametype: u16, channel: u8, value: u8) -> Frame {
        let mut frame = Frame::new(frametype, node, group, [0; 8]);
        frame.data[2] = channel;
        frame.data[3] = value;
        frame
    }

    #[test]
    fn test_no_emission_before_master() {
        let agg = Aggregator::new();
        agg.add(rgb_entry());
        for (ch, value) in [(1, 0x80), (2, 0x40), (3, 0x20)] {
            let frame = channel_frame(5, 1, frame_type::RGB, ch, value);
            assert_eq!(agg.absorb(&frame, Some("rgb/state")), None);
        }
    }

    #[test]
    fn test_combined_emission_after_master() {
        let agg = Aggregator::new();
        agg.add(rgb_entry());
        for (ch, value) in [(1, 0x80), (2, 0x40), (3, 0x20)] {
            let frame = channel_frame(5, 1, frame_type::RGB, ch, value);
            assert_eq!(agg.absorb(&frame, Some("rgb/state")), None);
        }
        let master = channel_frame(5, 1, frame_type::RGB, 4, 0xFF);
        assert_eq!(
            agg.absorb(&master, Some("rgb/state")).as_deref(),
            Some("128,64,32")
        );
    }

    #[test]
    fn test_master_scaling() {
        let agg = Aggregator::new();
        agg.add(rgb_entry());
        for (ch, value) in [(1, 200), (2, 100), (3, 0)] {
            agg.absorb(&channel_frame(5, 1, frame_type::RGB, ch, value), None);
        }
        // Master at 127: out = v * 128 / 256 = v / 2
        let master = channel_frame(5, 1, frame_type::RGB, 4, 127);
        assert_eq!(
            agg.absorb(&master, Some("rgb/state")).as_deref(),
            Some("100,50,0")
        );
        // Master at 0 blanks everything
        let master = channel_frame(5, 1, frame_type::RGB, 4, 0);
        assert_eq!(
            agg.absorb(&master, Some("rgb/state")).as_deref(),
            Some("0,0,0")
        );
    }

    #[test]
    fn test_rgbw_combined_four_values() {
        let agg = Aggregator::new();
        agg.add(Entry::new(
            9,
            2,
            frame_type::RGBW,
            ChannelMode::CombinedRgbw,
            Some("rgbw/state".into()),
            [None, None, None, None],
        ));
        for (ch, value) in [(1, 10), (2, 20), (3, 30), (4, 40)] {
            agg.absorb(&channel_frame(9, 2, frame_type::RGBW, ch, value), None);
        }
        let master = channel_frame(9, 2, frame_type::RGBW, 5, 255);
        assert_eq!(
            agg.absorb(&master, Some("rgbw/state")).as_deref(),
            Some("10,20,30,40")
        );
    }

    #[test]
    fn test_independent_channel_single_value() {
        let agg = Aggregator::new();
        agg.add(Entry::new(
            3,
            1,
            frame_type::RGBW,
            ChannelMode::Independent,
            None,
            [Some("ch1".into()), None, None, None],
        ));
        let frame = channel_frame(3, 1, frame_type::RGBW, 1, 80);
        assert_eq!(agg.absorb(&frame, Some("ch1")), None);
        let master = channel_frame(3, 1, frame_type::RGBW, 5, 255);
        assert_eq!(agg.absorb(&master, Some("ch1")).as_deref(), Some("80"));
    }

    #[test]
    fn test_unknown_module_ignored() {
        let agg = Aggregator::new();
        agg.add(rgb_entry());
        let frame = channel_frame(99, 1, frame_type::RGB, 1, 10);
        assert_eq!(agg.absorb(&frame, Some("rgb/state")), None);
    }

    #[test]
    fn test_pending_request_retry_ceiling() {
        let agg = Aggregator::new();
        agg.add(rgb_entry());
        // Three status requests for the silent module, then retirement.
        assert_eq!(agg.pending_request(), Some((5, 1)));
        assert_eq!(agg.pending_request(), Some((5, 1)));
        assert_eq!(agg.pending_request(), Some((5, 1)));
        assert_eq!(agg.pending_request(), None);
        assert_eq!(agg.pending_request(), None);
    }

    #[test]
    fn test_received_frame_lifts_ignore_latch() {
        let agg = Aggregator::new();
        agg.add(rgb_entry());
        for _ in 0..4 {
            agg.pending_request();
        }
        assert_eq!(agg.pending_request(), None);
        // A frame from the module revives it
        agg.absorb(&channel_frame(5, 1, frame_type::RGB, 1, 1), None);
        assert_eq!(agg.pending_request(), Some((5, 1)));
    }
}
