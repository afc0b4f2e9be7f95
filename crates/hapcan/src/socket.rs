//! 15-byte framing used on the programmer TCP socket.
//!
//! `AA | ft_hi | (ft_lo << 4) | flags | module | group | d0..d7 | checksum | A5`

use crate::{Frame, DATA_LEN};
use thiserror::Error;

/// Length of a CAN-bound socket frame.
pub const FRAME_LEN: usize = 15;
/// Start-of-frame marker.
pub const START: u8 = 0xAA;
/// End-of-frame marker.
pub const STOP: u8 = 0xA5;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SocketFrameError {
    #[error("invalid length {0}")]
    Length(usize),
    #[error("bad framing bytes")]
    Framing,
    #[error("checksum mismatch: got {got:#04x}, expected {expected:#04x}")]
    Checksum { got: u8, expected: u8 },
}

/// 8-bit additive checksum over the interior bytes of a socket frame.
///
/// The framing bytes and the checksum byte itself are excluded: the sum runs
/// over positions 1 through `len - 3`.
pub fn checksum(data: &[u8]) -> u8 {
    let mut sum = 0u16;
    for b in &data[1..data.len() - 2] {
        sum += u16::from(*b);
    }
    (sum & 0xFF) as u8
}

/// Validate the framing bytes and checksum of a socket frame of any length.
pub fn validate(data: &[u8]) -> Result<(), SocketFrameError> {
    if data.len() < 5 {
        return Err(SocketFrameError::Length(data.len()));
    }
    if data[0] != START || data[data.len() - 1] != STOP {
        return Err(SocketFrameError::Framing);
    }
    let expected = checksum(data);
    let got = data[data.len() - 2];
    if got != expected {
        return Err(SocketFrameError::Checksum { got, expected });
    }
    Ok(())
}

/// Encode a HAPCAN frame into the 15-byte socket representation.
pub fn encode(frame: &Frame) -> [u8; FRAME_LEN] {
    let mut out = [0u8; FRAME_LEN];
    out[0] = START;
    out[1] = (frame.frametype >> 4) as u8;
    out[2] = (((frame.frametype << 4) & 0xF0) as u8) | (frame.flags & 0x0F);
    out[3] = frame.module;
    out[4] = frame.group;
    out[5..5 + DATA_LEN].copy_from_slice(&frame.data);
    out[13] = frame.checksum();
    out[14] = STOP;
    out
}

/// Decode a validated 15-byte socket frame into a HAPCAN frame.
pub fn decode(data: &[u8]) -> Result<Frame, SocketFrameError> {
    if data.len() != FRAME_LEN {
        return Err(SocketFrameError::Length(data.len()));
    }
    validate(data)?;
    Ok(decode_unchecked(data))
}

/// Decode the frame fields without framing or checksum validation.
pub fn decode_unchecked(data: &[u8]) -> Frame {
    let mut frame = Frame {
        frametype: (u16::from(data[1]) << 4) | u16::from(data[2] >> 4),
        flags: data[2] & 0x0F,
        module: data[3],
        group: data[4],
        data: [0; DATA_LEN],
    };
    frame.data.copy_from_slice(&data[5..5 + DATA_LEN]);
    frame
}
