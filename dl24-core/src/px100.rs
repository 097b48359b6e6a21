//! PX100 micro-protocol codec
//!
//! Minimal legacy query/command protocol the DL24P answers on some links.
//! Commands are 6 bytes (`B1 B2 cmd d1 d2 B6`), responses a fixed 8 bytes
//! (`CA CB cmd d1 d2 d3 CE CF`) carrying one 24-bit big-endian value. Used
//! only as a fallback query mechanism where the broadcast stream is
//! incomplete.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Command packet delimiters
pub const CMD_HEADER: [u8; 2] = [0xB1, 0xB2];
pub const CMD_TRAILER: u8 = 0xB6;

/// Response packet delimiters
pub const RSP_HEADER: [u8; 2] = [0xCA, 0xCB];
pub const RSP_TRAILER: [u8; 2] = [0xCE, 0xCF];

/// Command packet length in bytes
pub const COMMAND_LEN: usize = 6;
/// Response packet length in bytes
pub const RESPONSE_LEN: usize = 8;

// Set commands
const CMD_ON_OFF: u8 = 0x01;
const CMD_SET_CURRENT: u8 = 0x02;
const CMD_SET_CUTOFF: u8 = 0x03;
const CMD_RESET: u8 = 0x05;

/// Value queries answered in the `CA CB` response format
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Query {
    /// Load on/off state (1/0)
    OnOff = 0x10,
    /// Voltage in mV
    Voltage = 0x11,
    /// Current in mA
    Current = 0x12,
    /// Accumulated amp-hours
    AmpHours = 0x14,
    /// Accumulated watt-hours
    WattHours = 0x15,
    /// Temperature
    Temperature = 0x16,
    /// Configured current setpoint
    SetCurrent = 0x17,
    /// Configured voltage cutoff
    Cutoff = 0x18,
}

/// Parsed response packet
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PxResponse {
    /// Echoed command byte
    pub command: u8,
    /// 24-bit big-endian value
    pub value: u32,
}

/// Build a raw command packet
pub fn encode(cmd: u8, d1: u8, d2: u8) -> [u8; COMMAND_LEN] {
    [CMD_HEADER[0], CMD_HEADER[1], cmd, d1, d2, CMD_TRAILER]
}

/// Build a value query packet
pub fn encode_query(query: Query) -> [u8; COMMAND_LEN] {
    encode(query as u8, 0, 0)
}

/// Turn the load on
pub fn cmd_turn_on() -> [u8; COMMAND_LEN] {
    encode(CMD_ON_OFF, 0x01, 0x00)
}

/// Turn the load off
pub fn cmd_turn_off() -> [u8; COMMAND_LEN] {
    encode(CMD_ON_OFF, 0x00, 0x00)
}

/// Set the load current; d1 carries whole amps, d2 hundredths
pub fn cmd_set_current(amps: f64) -> [u8; COMMAND_LEN] {
    let amps = amps.clamp(0.0, 99.99);
    let int_part = amps as u8;
    let dec_part = ((amps - f64::from(int_part)) * 100.0).round() as u8;
    encode(CMD_SET_CURRENT, int_part, dec_part)
}

/// Set the voltage cutoff; same integer/hundredths split
pub fn cmd_set_cutoff(volts: f64) -> [u8; COMMAND_LEN] {
    let volts = volts.clamp(0.0, 99.99);
    let int_part = volts as u8;
    let dec_part = ((volts - f64::from(int_part)) * 100.0).round() as u8;
    encode(CMD_SET_CUTOFF, int_part, dec_part)
}

/// Reset the accumulation counters
pub fn cmd_reset() -> [u8; COMMAND_LEN] {
    encode(CMD_RESET, 0x00, 0x00)
}

/// Decode a fixed 8-byte response packet
pub fn decode_response(data: &[u8]) -> Result<PxResponse> {
    if data.len() < RESPONSE_LEN {
        return Err(Error::TooShort {
            expected: RESPONSE_LEN,
            actual: data.len(),
        });
    }
    if data[..2] != RSP_HEADER || data[RESPONSE_LEN - 2..RESPONSE_LEN] != RSP_TRAILER {
        return Err(Error::BadDelimiter);
    }

    let value =
        (u32::from(data[3]) << 16) | (u32::from(data[4]) << 8) | u32::from(data[5]);

    Ok(PxResponse {
        command: data[2],
        value,
    })
}

/// Find and extract one response packet from an accumulation buffer
///
/// Same trimming discipline as the broadcast scanner: garbage before the
/// response header is dropped, and without a header at most the last byte
/// is retained for resynchronization.
pub fn find_response(buf: &mut BytesMut) -> Option<Bytes> {
    let Some(idx) = buf.windows(2).position(|w| w == RSP_HEADER) else {
        if buf.len() > 1 {
            buf.advance(buf.len() - 1);
        }
        return None;
    };

    if idx > 0 {
        buf.advance(idx);
    }

    if buf.len() < RESPONSE_LEN {
        return None;
    }

    Some(buf.split_to(RESPONSE_LEN).freeze())
}
