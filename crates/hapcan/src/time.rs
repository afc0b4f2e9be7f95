//! Wall-clock and uptime encodings used by the RTC frame and the programmer
//! protocol.

use crate::{frame_type, Frame, DATA_LEN};
use chrono::{DateTime, Datelike, Local, Timelike};

/// Binary-coded decimal: 45 -> 0x45.
pub fn bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// The 7-byte HAPCAN wall-clock encoding.
///
/// YY (years since 2000), MM, DD, weekday (1 = Monday .. 7 = Sunday),
/// HH, MM, SS, all BCD.
pub fn clock_bytes(now: &DateTime<Local>) -> [u8; 7] {
    let weekday = now.weekday().number_from_monday() as u8;
    [
        bcd((now.year() % 100) as u8),
        bcd(now.month() as u8),
        bcd(now.day() as u8),
        bcd(weekday),
        bcd(now.hour() as u8),
        bcd(now.minute() as u8),
        bcd(now.second() as u8),
    ]
}

/// Big-endian 32-bit uptime seconds.
pub fn uptime_bytes(seconds: u32) -> [u8; 4] {
    seconds.to_be_bytes()
}

/// System uptime in seconds, 0 when unavailable.
pub fn system_uptime_secs() -> u32 {
    std::fs::read_to_string("/proc/uptime")
        .ok()
        .and_then(|s| {
            s.split_whitespace()
                .next()
                .and_then(|v| v.parse::<f64>().ok())
        })
        .map(|secs| secs as u32)
        .unwrap_or(0)
}

/// Seconds to sleep so the next wake-up lands on second 0 of a minute.
pub fn seconds_until_minute(now: &DateTime<Local>) -> u64 {
    let sec = now.second() as u64;
    if sec >= 60 {
        1
    } else {
        60 - sec
    }
}

/// True once the local clock has a plausible date (after year 2000).
pub fn clock_is_valid(now: &DateTime<Local>) -> bool {
    now.year() > 2000
}

/// Build the RTC broadcast frame for the given instant.
pub fn rtc_frame(computer_id: (u8, u8), now: &DateTime<Local>) -> Frame {
    let mut frame = Frame {
        frametype: frame_type::RTC,
        flags: 0,
        module: computer_id.0,
        group: computer_id.1,
        data: [0; DATA_LEN],
    };
    frame.data[0] = 0xFF;
    frame.data[1..8].copy_from_slice(&clock_bytes(now));
    frame.data[7] = 0x00;
    frame
}
