//! The programmer protocol spoken on the TCP socket.
//!
//! The vendor's PC configuration tool talks to the gateway as if it were a
//! HAPCAN Ethernet interface. Three frame lengths arrive on the wire, all
//! delimited by 0xAA/0xA5 with the additive checksum before the stop byte:
//!
//! - 5 bytes: bootloader/system query; answered with canned identity frames.
//! - 13 bytes: query addressed to the Ethernet port itself (status, uptime).
//! - 15 bytes: a full HAPCAN frame to inject into the CAN bus.
//!
//! Anything failing framing or checksum validation is dropped.

use chrono::{DateTime, Local};
use hapcan::{socket, time, Frame};
use tracing::debug;

/// Identity the gateway reports to the PC tool.
pub mod identity {
    /// Hardware type (two bytes on the wire).
    pub const HW_TYPE: u16 = 0x3000;
    /// Hardware version.
    pub const HW_VERSION: u8 = 3;
    /// Processor id bytes.
    pub const CHIP_ID: [u8; 4] = [0x00, 0x11, 0x22, 0x33];
    /// Application type.
    pub const APP_TYPE: u8 = 102;
    /// Application version.
    pub const APP_VERSION: u8 = 0;
    /// Firmware version.
    pub const FW_VERSION: u8 = 1;
    /// Bootloader version, major/minor.
    pub const BOOTLOADER_VERSION: (u8, u8) = (3, 4);
    /// Fixed supply-voltage response bytes (bus, cpu).
    pub const SUPPLY: [u8; 4] = [0x27, 0x58, 0x27, 0x58];
    /// Device id bytes.
    pub const DEVICE_ID: [u8; 2] = [0xFF, 0xFF];
    /// Module description, eight characters per response frame.
    pub const DESCRIPTION: &[u8; 8] = b"HMSG-rPi";
}

/// What to do with a received socket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Nothing to send (reboot request, or invalid frame).
    None,
    /// Frames to write back to the connected client.
    Socket(Vec<Vec<u8>>),
    /// A HAPCAN frame to inject into the CAN write queue.
    Can(Frame),
}

/// Build a 13-byte response: opcode pair, eight body bytes, checksum.
fn response13(op: [u8; 2], body: [u8; 8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(13);
    out.push(socket::START);
    out.extend_from_slice(&op);
    out.extend_from_slice(&body);
    out.push(0);
    out.push(socket::STOP);
    let len = out.len();
    out[len - 2] = socket::checksum(&out);
    out
}

/// Build a 15-byte response: opcode pair, ten body bytes, checksum.
fn response15(op: [u8; 2], body: [u8; 10]) -> Vec<u8> {
    let mut out = Vec::with_capacity(15);
    out.push(socket::START);
    out.extend_from_slice(&op);
    out.extend_from_slice(&body);
    out.push(0);
    out.push(socket::STOP);
    let len = out.len();
    out[len - 2] = socket::checksum(&out);
    out
}

fn system_query(opcode: u16) -> Reply {
    match opcode {
        // Enter programming mode: confirm with the bootloader version.
        0x1000 => Reply::Socket(vec![response13(
            [0x10, 0x41],
            [
                0xFF,
                0xFF,
                identity::BOOTLOADER_VERSION.0,
                identity::BOOTLOADER_VERSION.1,
                0xFF,
                0xFF,
                0xFF,
                0xFF,
            ],
        )]),
        // Reboot request: acknowledged silently.
        0x1020 => Reply::None,
        // Hardware type.
        0x1040 => Reply::Socket(vec![response13(
            [0x10, 0x41],
            [
                (identity::HW_TYPE >> 8) as u8,
                (identity::HW_TYPE & 0xFF) as u8,
                identity::HW_VERSION,
                0xFF,
                identity::CHIP_ID[0],
                identity::CHIP_ID[1],
                identity::CHIP_ID[2],
                identity::CHIP_ID[3],
            ],
        )]),
        // Firmware type.
        0x1060 => Reply::Socket(vec![response13(
            [0x10, 0x61],
            [
                (identity::HW_TYPE >> 8) as u8,
                (identity::HW_TYPE & 0xFF) as u8,
                identity::HW_VERSION,
                identity::APP_TYPE,
                identity::APP_VERSION,
                identity::FW_VERSION,
                identity::BOOTLOADER_VERSION.0,
                identity::BOOTLOADER_VERSION.1,
            ],
        )]),
        // Supply voltage.
        0x10C0 => Reply::Socket(vec![response13(
            [0x10, 0xC1],
            [
                identity::SUPPLY[0],
                identity::SUPPLY[1],
                identity::SUPPLY[2],
                identity::SUPPLY[3],
                0xFF,
                0xFF,
                0xFF,
                0xFF,
            ],
        )]),
        // Description, two frames back to back.
        0x10E0 => Reply::Socket(vec![
            response13([0x10, 0xE1], *identity::DESCRIPTION),
            response13([0x10, 0xE1], *identity::DESCRIPTION),
        ]),
        // Device id.
        0x1110 => Reply::Socket(vec![response13(
            [0x11, 0x11],
            [
                identity::DEVICE_ID[0],
                identity::DEVICE_ID[1],
                0xFF,
                0xFF,
                0xFF,
                0xFF,
                0xFF,
                0xFF,
            ],
        )]),
        other => {
            debug!(opcode = other, "unknown system query");
            Reply::None
        }
    }
}

fn ethernet_query(
    opcode: u16,
    computer_id: (u8, u8),
    now: &DateTime<Local>,
    uptime_secs: u32,
) -> Reply {
    match opcode {
        // Status request addressed to the Ethernet port: answer with the
        // computer id and the current wall clock.
        0x1090 => {
            let clock = time::clock_bytes(now);
            let mut body = [0u8; 10];
            body[0] = computer_id.0;
            body[1] = computer_id.1;
            body[2] = 0xFF;
            body[3..10].copy_from_slice(&clock);
            Reply::Socket(vec![response15([0x30, 0x01], body)])
        }
        // Uptime request addressed to the Ethernet port.
        0x1130 => {
            let uptime = time::uptime_bytes(uptime_secs);
            let mut body = [0xFFu8; 10];
            body[0] = computer_id.0;
            body[1] = computer_id.1;
            body[6..10].copy_from_slice(&uptime);
            Reply::Socket(vec![response15([0x11, 0x31], body)])
        }
        other => {
            debug!(opcode = other, "unknown ethernet query");
            Reply::None
        }
    }
}

/// Process one frame received on the programmer socket.
pub fn handle_frame(
    data: &[u8],
    computer_id: (u8, u8),
    now: &DateTime<Local>,
    uptime_secs: u32,
) -> Reply {
    if let Err(error) = socket::validate(data) {
        debug!(%error, len = data.len(), "programmer frame dropped");
        return Reply::None;
    }
    let opcode = (u16::from(data[1]) << 8) | u16::from(data[2]);
    match data.len() {
        // System queries arrive bare or padded with two zero bytes,
        // depending on the tool version.
        5 | 7 => system_query(opcode),
        13 => ethernet_query(opcode, computer_id, now, uptime_secs),
        socket::FRAME_LEN => Reply::Can(socket::decode_unchecked(data)),
        other => {
            debug!(len = other, "programmer frame with unsupported length");
            Reply::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hapcan::frame_type;

    const CID: (u8, u8) = (0xFE, 0xFE);

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2023, 8, 15, 13, 45, 7).unwrap()
    }

    fn query5(b1: u8, b2: u8) -> Vec<u8> {
        let mut frame = vec![socket::START, b1, b2, 0, socket::STOP];
        frame[3] = socket::checksum(&frame);
        frame
    }

    fn query13(b1: u8, b2: u8) -> Vec<u8> {
        let mut frame = vec![socket::START, b1, b2];
        frame.extend_from_slice(&[0xFF; 8]);
        frame.push(0);
        frame.push(socket::STOP);
        let len = frame.len();
        frame[len - 2] = socket::checksum(&frame);
        frame
    }

    #[test]
    fn test_hardware_type_query_bytes() {
        let reply = handle_frame(
            &[0xAA, 0x10, 0x40, 0x00, 0x00, 0x50, 0xA5],
            CID,
            &now(),
            0,
        );
        let Reply::Socket(frames) = reply else {
            panic!("expected socket reply");
        };
        assert_eq!(frames.len(), 1);
        assert_eq!(
            &frames[0][..11],
            &[0xAA, 0x10, 0x41, 0x30, 0x00, 0x03, 0xFF, 0x00, 0x11, 0x22, 0x33]
        );
        assert_eq!(frames[0][12], 0xA5);
        assert_eq!(frames[0][11], socket::checksum(&frames[0]));
    }

    #[test]
    fn test_bare_five_byte_query_accepted() {
        let reply = handle_frame(&query5(0x10, 0x40), CID, &now(), 0);
        assert!(matches!(reply, Reply::Socket(_)));
    }

    #[test]
    fn test_enter_programming_reports_bootloader_version() {
        let reply = handle_frame(&query5(0x10, 0x00), CID, &now(), 0);
        let Reply::Socket(frames) = reply else {
            panic!("expected socket reply");
        };
        assert_eq!(frames[0][5], 3);
        assert_eq!(frames[0][6], 4);
    }

    #[test]
    fn test_reboot_is_silent() {
        assert_eq!(handle_frame(&query5(0x10, 0x20), CID, &now(), 0), Reply::None);
    }

    #[test]
    fn test_firmware_type_query() {
        let reply = handle_frame(&query5(0x10, 0x60), CID, &now(), 0);
        let Reply::Socket(frames) = reply else {
            panic!("expected socket reply");
        };
        assert_eq!(
            &frames[0][..11],
            &[0xAA, 0x10, 0x61, 0x30, 0x00, 0x03, 102, 0, 1, 3, 4]
        );
    }

    #[test]
    fn test_description_query_two_frames() {
        let reply = handle_frame(&query5(0x10, 0xE0), CID, &now(), 0);
        let Reply::Socket(frames) = reply else {
            panic!("expected socket reply");
        };
        assert_eq!(frames.len(), 2);
        for frame in &frames {
            assert_eq!(&frame[3..11], b"HMSG-rPi");
            assert_eq!(frame[11], socket::checksum(frame));
        }
    }

    #[test]
    fn test_device_id_query() {
        let reply = handle_frame(&query5(0x11, 0x10), CID, &now(), 0);
        let Reply::Socket(frames) = reply else {
            panic!("expected socket reply");
        };
        assert_eq!(frames[0][3], 0xFF);
        assert_eq!(frames[0][4], 0xFF);
    }

    #[test]
    fn test_status_query_returns_clock() {
        let reply = handle_frame(&query13(0x10, 0x90), CID, &now(), 0);
        let Reply::Socket(frames) = reply else {
            panic!("expected socket reply");
        };
        let frame = &frames[0];
        assert_eq!(frame.len(), 15);
        assert_eq!(&frame[..6], &[0xAA, 0x30, 0x01, 0xFE, 0xFE, 0xFF]);
        // BCD wall clock for 2023-08-15 13:45:07 (a Tuesday)
        assert_eq!(&frame[6..13], &[0x23, 0x08, 0x15, 0x02, 0x13, 0x45, 0x07]);
    }

    #[test]
    fn test_uptime_query_big_endian_seconds() {
        let reply = handle_frame(&query13(0x11, 0x30), CID, &now(), 0x0102_0304);
        let Reply::Socket(frames) = reply else {
            panic!("expected socket reply");
        };
        let frame = &frames[0];
        assert_eq!(frame.len(), 15);
        assert_eq!(&frame[1..3], &[0x11, 0x31]);
        assert_eq!(&frame[9..13], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_can_bound_frame_forwarded() {
        let frame = Frame {
            frametype: frame_type::DIRECT_CONTROL,
            flags: 0,
            module: 0xFE,
            group: 0xFE,
            data: [1, 4, 0x10, 0x20, 0, 0xFF, 0xFF, 0xFF],
        };
        let bytes = socket::encode(&frame);
        assert_eq!(handle_frame(&bytes, CID, &now(), 0), Reply::Can(frame));
    }

    #[test]
    fn test_bad_checksum_dropped() {
        let mut bytes = query5(0x10, 0x40);
        bytes[3] = bytes[3].wrapping_add(1);
        assert_eq!(handle_frame(&bytes, CID, &now(), 0), Reply::None);
    }

    #[test]
    fn test_bad_framing_dropped() {
        let frame = socket::encode(&Frame::default());
        let mut bytes = frame.to_vec();
        bytes[14] = 0x00;
        assert_eq!(handle_frame(&bytes, CID, &now(), 0), Reply::None);
    }

    #[test]
    fn test_unsupported_length_dropped() {
        let mut bytes = vec![socket::START, 1, 2, 3, 4, 5, 0, socket::STOP];
        let len = bytes.len();
        bytes[len - 2] = socket::checksum(&bytes);
        assert_eq!(handle_frame(&bytes, CID, &now(), 0), Reply::None);
    }
}
