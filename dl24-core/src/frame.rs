//! Broadcast protocol frame codec
//!
//! The DL24P pushes one status frame per second over serial/Bluetooth links,
//! unsolicited. Commands travel the other way in the same framing.
//!
//! # Frame structure
//!
//! ```text
//! ┌────────┬──────┬────────┬─────────┬─────────────┬──────────┐
//! │ Magic  │ Type │ Device │ Command │   Payload   │ Checksum │
//! │ FF 55  │ 1 B  │  1 B   │   1 B   │  type-dep.  │   1 B    │
//! └────────┴──────┴────────┴─────────┴─────────────┴──────────┘
//! ```
//!
//! Command frames carry a 4-byte big-endian value and are 10 bytes total;
//! status frames are 36 bytes. The checksum covers type through payload.

use bytes::{Buf, Bytes, BytesMut};
use byteorder::{BigEndian, ByteOrder};
use tracing::trace;

use crate::{
    checksum,
    command::Command,
    error::{Error, Result},
    status::{DeviceStatus, FaultFlags},
};

/// Frame magic header
pub const HEADER: [u8; 2] = [0xFF, 0x55];

/// Message types
pub const MSG_STATUS: u8 = 0x01;
pub const MSG_REPLY: u8 = 0x02;
pub const MSG_COMMAND: u8 = 0x11;

/// Device type byte for the DC load family
pub const DEVICE_DC_LOAD: u8 = 0x02;

/// Status frame length in bytes
pub const STATUS_LEN: usize = 36;
/// Command frame length in bytes
pub const COMMAND_LEN: usize = 10;
/// Reply frame length in bytes
pub const REPLY_LEN: usize = 10;

// Wire command codes
const CMD_TURN_ON: u8 = 0x01;
const CMD_TURN_OFF: u8 = 0x02;
const CMD_SET_CURRENT: u8 = 0x03;
const CMD_SET_CUTOFF: u8 = 0x04;
const CMD_SET_TIMER: u8 = 0x05;
const CMD_RESET_COUNTERS: u8 = 0x06;
// Defined on the wire; the capability is exposed through the polling
// transport only.
#[allow(dead_code)]
const CMD_SET_BACKLIGHT: u8 = 0x07;

/// Acknowledgement frame sent by the device after a command
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Reply {
    pub device: u8,
    pub status: u8,
}

/// Encode a command frame
///
/// Values are scaled to the wire units: current in mA (clamped to
/// 0..=24000), cutoff voltage in centivolts (clamped to 0..=20000), timer
/// in seconds. `SetDischargeTime` encodes as a timer of the equivalent
/// seconds.
///
/// # Errors
///
/// Returns [`Error::Unsupported`] for commands the broadcast protocol
/// cannot express (mode/power/resistance/voltage setters and the
/// polling-only extras).
pub fn encode_command(cmd: &Command) -> Result<Bytes> {
    let (code, value) = match *cmd {
        Command::TurnOn => (CMD_TURN_ON, 0),
        Command::TurnOff => (CMD_TURN_OFF, 0),
        Command::SetCurrent(amps) => {
            (CMD_SET_CURRENT, ((amps * 1000.0) as i64).clamp(0, 24_000) as u32)
        }
        Command::SetVoltageCutoff(volts) => {
            (CMD_SET_CUTOFF, ((volts * 100.0) as i64).clamp(0, 20_000) as u32)
        }
        Command::SetTimer(seconds) => (CMD_SET_TIMER, seconds),
        Command::SetDischargeTime { hours, minutes } => (
            CMD_SET_TIMER,
            u32::from(hours) * 3600 + u32::from(minutes) * 60,
        ),
        Command::ResetCounters => (CMD_RESET_COUNTERS, 0),
        ref other => return Err(Error::Unsupported(other.name())),
    };

    let mut frame = [0u8; COMMAND_LEN];
    frame[..2].copy_from_slice(&HEADER);
    frame[2] = MSG_COMMAND;
    frame[3] = DEVICE_DC_LOAD;
    frame[4] = code;
    BigEndian::write_u32(&mut frame[5..9], value);
    frame[9] = checksum::calculate(&frame[2..9]);

    trace!(command = %cmd, frame = %hex::encode(frame), "Encoded command frame");

    Ok(Bytes::copy_from_slice(&frame))
}

/// Decode a 36-byte status frame
///
/// # Errors
///
/// Returns an error if the frame is short, the header/type/device bytes do
/// not match, or the checksum fails. All of these are recoverable: the
/// frame is discarded and the reader resynchronizes.
pub fn decode_status(data: &[u8]) -> Result<DeviceStatus> {
    if data.len() < STATUS_LEN {
        return Err(Error::TooShort {
            expected: STATUS_LEN,
            actual: data.len(),
        });
    }
    if data[..2] != HEADER {
        return Err(Error::BadDelimiter);
    }
    if data[2] != MSG_STATUS {
        return Err(Error::UnexpectedType(data[2]));
    }
    if data[3] != DEVICE_DC_LOAD {
        return Err(Error::UnexpectedDevice(data[3]));
    }

    let expected = checksum::calculate(&data[2..STATUS_LEN - 1]);
    let received = data[STATUS_LEN - 1];
    if received != expected {
        return Err(Error::ChecksumMismatch { expected, received });
    }

    let u24 = |offset: usize| {
        (u32::from(data[offset]) << 16)
            | (u32::from(data[offset + 1]) << 8)
            | u32::from(data[offset + 2])
    };

    let flags = data[28];

    Ok(DeviceStatus {
        voltage: f64::from(u24(4)) / 10.0,
        current: f64::from(u24(7)) / 1000.0,
        power: f64::from(u24(10)) / 10.0,
        energy_wh: f64::from(BigEndian::read_u32(&data[13..17])) / 100.0,
        capacity_mah: f64::from(BigEndian::read_u32(&data[17..21])),
        temperature_c: f64::from(data[21]),
        temperature_f: f64::from(data[22]),
        ext_temperature_c: f64::from(data[23]),
        ext_temperature_f: f64::from(data[24]),
        hours: data[25],
        minutes: data[26],
        seconds: data[27],
        load_on: flags & 0x01 != 0,
        faults: FaultFlags::from_bits_truncate(flags),
        fan_rpm: BigEndian::read_u16(&data[29..31]),
        ..Default::default()
    })
}

/// Decode an acknowledgement frame
pub fn decode_reply(data: &[u8]) -> Result<Reply> {
    if data.len() < 6 {
        return Err(Error::TooShort {
            expected: 6,
            actual: data.len(),
        });
    }
    if data[..2] != HEADER {
        return Err(Error::BadDelimiter);
    }
    if data[2] != MSG_REPLY {
        return Err(Error::UnexpectedType(data[2]));
    }

    Ok(Reply {
        device: data[3],
        status: data[4],
    })
}

/// Frame length for a message type byte, if the type is known
fn frame_len(msg_type: u8) -> Option<usize> {
    match msg_type {
        MSG_STATUS => Some(STATUS_LEN),
        MSG_REPLY => Some(REPLY_LEN),
        MSG_COMMAND => Some(COMMAND_LEN),
        _ => None,
    }
}

/// Find and extract one complete frame from an accumulation buffer
///
/// Leading garbage before the magic header is discarded. When no header is
/// present the buffer is trimmed to at most its last byte so a header split
/// across reads can resynchronize. Returns `None` until a full frame for
/// the indicated message type is buffered.
pub fn find_frame(buf: &mut BytesMut) -> Option<Bytes> {
    loop {
        let Some(idx) = buf.windows(2).position(|w| w == HEADER) else {
            if buf.len() > 1 {
                buf.advance(buf.len() - 1);
            }
            return None;
        };

        if idx > 0 {
            buf.advance(idx);
        }

        // Need the type byte to know the frame length
        if buf.len() < 3 {
            return None;
        }

        let Some(len) = frame_len(buf[2]) else {
            // Stray header bytes inside payload data; skip and rescan
            buf.advance(2);
            continue;
        };

        if buf.len() < len {
            return None;
        }

        return Some(buf.split_to(len).freeze());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Build a valid 36-byte status frame with known field values
    fn sample_status_frame() -> [u8; STATUS_LEN] {
        let mut data = [0u8; STATUS_LEN];
        data[..2].copy_from_slice(&HEADER);
        data[2] = MSG_STATUS;
        data[3] = DEVICE_DC_LOAD;

        // 12.5 V
        data[4..7].copy_from_slice(&[0x00, 0x00, 0x7D]);
        // 0.5 A
        data[7..10].copy_from_slice(&[0x00, 0x01, 0xF4]);
        // 6.2 W
        data[10..13].copy_from_slice(&[0x00, 0x00, 0x3E]);
        // 1.25 Wh
        data[13..17].copy_from_slice(&[0x00, 0x00, 0x00, 0x7D]);
        // 100 mAh
        data[17..21].copy_from_slice(&[0x00, 0x00, 0x00, 0x64]);
        // Temperatures
        data[21] = 35;
        data[22] = 95;
        data[23] = 25;
        data[24] = 77;
        // 1h 23m 45s
        data[25] = 1;
        data[26] = 23;
        data[27] = 45;
        // Load on
        data[28] = 0x01;
        // 3000 RPM
        data[29..31].copy_from_slice(&[0x0B, 0xB8]);

        data[STATUS_LEN - 1] = checksum::calculate(&data[2..STATUS_LEN - 1]);
        data
    }

    #[test]
    fn test_encode_turn_on() {
        let frame = encode_command(&Command::TurnOn).unwrap();

        assert_eq!(frame.len(), COMMAND_LEN);
        assert_eq!(&frame[..2], &HEADER);
        assert_eq!(frame[2], MSG_COMMAND);
        assert_eq!(frame[3], DEVICE_DC_LOAD);
        assert_eq!(frame[4], 0x01);
        assert_eq!(frame[9], checksum::calculate(&frame[2..9]));
    }

    #[test]
    fn test_encode_set_current_value() {
        // 0.5 A travels as 500 mA, big-endian
        let frame = encode_command(&Command::SetCurrent(0.5)).unwrap();

        assert_eq!(frame[4], 0x03);
        assert_eq!(BigEndian::read_u32(&frame[5..9]), 500);
    }

    #[test]
    fn test_encode_set_current_clamps() {
        let frame = encode_command(&Command::SetCurrent(-1.0)).unwrap();
        assert_eq!(BigEndian::read_u32(&frame[5..9]), 0);

        let frame = encode_command(&Command::SetCurrent(30.0)).unwrap();
        assert_eq!(BigEndian::read_u32(&frame[5..9]), 24_000);
    }

    #[test]
    fn test_encode_set_cutoff_centivolts() {
        let frame = encode_command(&Command::SetVoltageCutoff(3.0)).unwrap();

        assert_eq!(frame[4], 0x04);
        assert_eq!(BigEndian::read_u32(&frame[5..9]), 300);
    }

    #[test]
    fn test_encode_discharge_time_as_timer() {
        let frame = encode_command(&Command::SetDischargeTime { hours: 1, minutes: 30 }).unwrap();

        assert_eq!(frame[4], 0x05);
        assert_eq!(BigEndian::read_u32(&frame[5..9]), 5400);
    }

    #[test]
    fn test_encode_unsupported() {
        let result = encode_command(&Command::SetBrightness(5));
        assert!(matches!(result, Err(Error::Unsupported(_))));

        let result = encode_command(&Command::SetPower(10.0));
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_decode_status_fields() {
        let status = decode_status(&sample_status_frame()).unwrap();

        assert!((status.voltage - 12.5).abs() < 1e-9);
        assert!((status.current - 0.5).abs() < 1e-9);
        assert!((status.energy_wh - 1.25).abs() < 1e-9);
        assert!((status.capacity_mah - 100.0).abs() < 1e-9);
        assert_eq!(status.temperature_c, 35.0);
        assert_eq!(status.ext_temperature_c, 25.0);
        assert_eq!(status.hours, 1);
        assert_eq!(status.minutes, 23);
        assert_eq!(status.seconds, 45);
        assert!(status.load_on);
        assert!(status.faults.is_empty());
        assert_eq!(status.fan_rpm, 3000);
        assert_eq!(status.mode, None);
    }

    #[test]
    fn test_decode_status_fault_bits() {
        let mut data = sample_status_frame();
        data[28] = 0x0D; // load on + overvoltage + overtemperature
        data[STATUS_LEN - 1] = checksum::calculate(&data[2..STATUS_LEN - 1]);

        let status = decode_status(&data).unwrap();
        assert!(status.load_on);
        assert!(status.faults.contains(FaultFlags::OVERVOLTAGE));
        assert!(status.faults.contains(FaultFlags::OVERTEMPERATURE));
        assert!(!status.faults.contains(FaultFlags::OVERCURRENT));
    }

    #[test]
    fn test_decode_status_bad_checksum() {
        let mut data = sample_status_frame();
        data[STATUS_LEN - 1] ^= 0xFF;

        let result = decode_status(&data);
        assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_decode_status_too_short() {
        let data = [0xFF, 0x55, 0x01, 0x02];
        assert!(matches!(
            decode_status(&data),
            Err(Error::TooShort { expected: STATUS_LEN, .. })
        ));
    }

    #[test]
    fn test_decode_status_wrong_header() {
        let mut data = sample_status_frame();
        data[0] = 0x00;
        assert!(matches!(decode_status(&data), Err(Error::BadDelimiter)));
    }

    #[test]
    fn test_decode_reply() {
        let data = [0xFF, 0x55, 0x02, 0x02, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
        let reply = decode_reply(&data).unwrap();

        assert_eq!(reply.device, 0x02);
        assert_eq!(reply.status, 0x01);
    }

    #[test]
    fn test_find_frame_headerless_garbage() {
        let mut buf = BytesMut::from(&[0x00, 0x01, 0x02, 0x03][..]);
        let frame = find_frame(&mut buf);

        assert_eq!(frame, None);
        assert_eq!(&buf[..], &[0x03]);
    }

    #[test]
    fn test_find_frame_incomplete() {
        let mut buf = BytesMut::from(&[0xFF, 0x55, 0x01, 0x02][..]);
        let frame = find_frame(&mut buf);

        assert_eq!(frame, None);
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_find_frame_with_trailing_bytes() {
        let status = sample_status_frame();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&status);
        buf.extend_from_slice(&[0xAA, 0xBB]);

        let frame = find_frame(&mut buf).unwrap();

        assert_eq!(&frame[..], &status[..]);
        assert_eq!(&buf[..], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_find_frame_skips_leading_garbage() {
        let status = sample_status_frame();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x13, 0x37]);
        buf.extend_from_slice(&status);

        let frame = find_frame(&mut buf).unwrap();
        assert_eq!(&frame[..], &status[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_find_frame_split_header_retained() {
        let mut buf = BytesMut::from(&[0x00, 0x00, 0xFF][..]);
        let frame = find_frame(&mut buf);

        assert_eq!(frame, None);
        assert_eq!(&buf[..], &[0xFF]);
    }

    #[test]
    fn test_find_frame_unknown_type_resyncs() {
        let status = sample_status_frame();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0xFF, 0x55, 0x7F]); // header with bogus type
        buf.extend_from_slice(&status);

        let frame = find_frame(&mut buf).unwrap();
        assert_eq!(&frame[..], &status[..]);
    }

    #[test]
    fn test_encode_decode_reply_roundtrip_status() {
        // A command frame found in the stream decodes as neither status nor
        // reply and gets discarded by callers
        let frame = encode_command(&Command::TurnOff).unwrap();
        assert!(decode_status(&frame).is_err());
        assert!(decode_reply(&frame).is_err());
    }
}
