//! HAPCAN frame model and codec.
//!
//! HAPCAN application and system messages travel as extended-id CAN frames.
//! The 29-bit identifier packs the frame type, a request/response flag and
//! the source (or destination) node/group pair; the 8 data bytes carry the
//! per-frame-type payload.

pub mod retry;
pub mod socket;
pub mod time;

use thiserror::Error;

/// Number of payload bytes in every HAPCAN frame.
pub const DATA_LEN: usize = 8;

/// Default source node/group used when the configured computer id is invalid.
pub const DEFAULT_COMPUTER_ID: u8 = 254;

/// HAPCAN frame types.
pub mod frame_type {
    /// RTC broadcast (gateway -> bus, once per minute).
    pub const RTC: u16 = 0x300;
    /// Button / LED module state.
    pub const BUTTON: u16 = 0x301;
    /// Relay module state.
    pub const RELAY: u16 = 0x302;
    /// Infrared receiver.
    pub const INFRARED_RX: u16 = 0x303;
    /// Single-sensor temperature module.
    pub const TEMPERATURE: u16 = 0x304;
    /// Dimmer module.
    pub const DIMMER: u16 = 0x306;
    /// Multi-sensor temperature + infrared module.
    pub const MULTI_TEMPERATURE: u16 = 0x307;
    /// RGB LED controller (3 colour channels + master).
    pub const RGB: u16 = 0x308;
    /// Open collector module.
    pub const OPEN_COLLECTOR: u16 = 0x309;
    /// RGBW LED controller (4 colour channels + master).
    pub const RGBW: u16 = 0x30A;

    /// Frame types above this value are application messages.
    pub const APPLICATION_START: u16 = 0x200;

    // System messages handled by the functional firmware.
    pub const HEALTH_REQUEST_NODE: u16 = 0x115;
    pub const HEALTH_REQUEST_GROUP: u16 = 0x114;
    pub const UPTIME_REQUEST_NODE: u16 = 0x113;
    pub const UPTIME_REQUEST_GROUP: u16 = 0x112;
    pub const DIRECT_CONTROL: u16 = 0x10A;
    pub const STATUS_REQUEST_NODE: u16 = 0x109;
    pub const STATUS_REQUEST_GROUP: u16 = 0x108;

    // System messages handled by the bootloader in normal mode.
    pub const DEV_ID_REQUEST_NODE: u16 = 0x111;
    pub const DEV_ID_REQUEST_GROUP: u16 = 0x10F;
    pub const DESCRIPTION_REQUEST_NODE: u16 = 0x10E;
    pub const DESCRIPTION_REQUEST_GROUP: u16 = 0x10D;
    pub const SUPPLY_REQUEST_NODE: u16 = 0x10C;
    pub const SUPPLY_REQUEST_GROUP: u16 = 0x10B;
    pub const FW_TYPE_REQUEST_NODE: u16 = 0x106;
    pub const FW_TYPE_REQUEST_GROUP: u16 = 0x105;
    pub const HW_TYPE_REQUEST_NODE: u16 = 0x104;
    pub const HW_TYPE_REQUEST_GROUP: u16 = 0x103;
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame type {0:#x} exceeds 12 bits")]
    FrameTypeRange(u16),
    #[error("short data: {0} bytes")]
    ShortData(usize),
}

/// A logical HAPCAN frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Frame {
    /// 12-bit frame type.
    pub frametype: u16,
    /// Request (0) / response (1) flag. One bit on the wire.
    pub flags: u8,
    /// Source or destination node number.
    pub module: u8,
    /// Source or destination group number.
    pub group: u8,
    /// Payload bytes.
    pub data: [u8; DATA_LEN],
}

impl Frame {
    pub fn new(frametype: u16, module: u8, group: u8, data: [u8; DATA_LEN]) -> Self {
        Self {
            frametype,
            flags: 0,
            module,
            group,
            data,
        }
    }

    /// Unpack the 29-bit extended CAN identifier and payload.
    ///
    /// Identifier layout: bits [28:17] frame type, bit [16] flags,
    /// bits [15:8] module, bits [7:0] group.
    pub fn from_can(id: u32, data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < DATA_LEN {
            return Err(FrameError::ShortData(data.len()));
        }
        let mut payload = [0u8; DATA_LEN];
        payload.copy_from_slice(&data[..DATA_LEN]);
        Ok(Self {
            frametype: ((id >> 17) & 0xFFF) as u16,
            flags: ((id >> 16) & 0x01) as u8,
            module: (id >> 8) as u8,
            group: id as u8,
            data: payload,
        })
    }

    /// Pack into the 29-bit extended CAN identifier.
    pub fn can_id(&self) -> u32 {
        (u32::from(self.frametype & 0xFFF) << 17)
            | (u32::from(self.flags & 0x01) << 16)
            | (u32::from(self.module) << 8)
            | u32::from(self.group)
    }

    /// 8-bit additive checksum over frame type, flags, address and payload.
    ///
    /// The sum runs over the bytes exactly as they appear in the 15-byte
    /// socket framing (positions 1 through 12).
    pub fn checksum(&self) -> u8 {
        let mut sum = u16::from((self.frametype >> 4) as u8);
        sum += u16::from(((self.frametype << 4) & 0xF0) as u8);
        sum += u16::from(self.flags);
        sum += u16::from(self.module);
        sum += u16::from(self.group);
        for b in self.data {
            sum += u16::from(b);
        }
        (sum & 0xFF) as u8
    }

    /// True for application frames (frame type above 0x200).
    pub fn is_application(&self) -> bool {
        self.frametype > frame_type::APPLICATION_START
    }

    /// Bitwise mask/match predicate used by the CAN->MQTT routing scan.
    ///
    /// A frame matches when `(received ^ check) & mask == 0` on the frame
    /// type, module, group and every data byte. The flags bit takes no part
    /// in matching. Short-circuits on the first mismatched field.
    pub fn matches(&self, mask: &Frame, check: &Frame) -> bool {
        if (self.frametype ^ check.frametype) & mask.frametype != 0 {
            return false;
        }
        if (self.module ^ check.module) & mask.module != 0 {
            return false;
        }
        if (self.group ^ check.group) & mask.group != 0 {
            return false;
        }
        for i in 0..DATA_LEN {
            if (self.data[i] ^ check.data[i]) & mask.data[i] != 0 {
                return false;
            }
        }
        true
    }
}

/// Build a system request frame addressed to `node`/`group`.
///
/// The gateway's computer id is the source address, every data byte is 0xFF
/// except the destination pair in data[2]/data[3]. The health-check request
/// additionally selects counter part 1 via data[0].
pub fn system_frame(frametype: u16, node: u8, group: u8, computer_id: (u8, u8)) -> Frame {
    let mut frame = Frame {
        frametype,
        flags: 0,
        module: computer_id.0,
        group: computer_id.1,
        data: [0xFF; DATA_LEN],
    };
    frame.data[2] = node;
    frame.data[3] = group;
    if frametype == frame_type::HEALTH_REQUEST_NODE {
        frame.data[0] = 0x01;
    }
    frame
}
