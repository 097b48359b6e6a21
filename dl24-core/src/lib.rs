//! # dl24-core
//!
//! Wire-protocol primitives for the Atorch DL24P electronic load.
//!
//! This crate provides the low-level protocol implementations:
//! - Checksum calculation shared by both framed protocols
//! - Broadcast frame codec (the unsolicited ~1 Hz status stream)
//! - Polling report codec (the 64-byte query/response protocol)
//! - PX100 micro-protocol (legacy fallback queries)
//! - Command and status definitions

pub mod checksum;
pub mod command;
pub mod error;
pub mod frame;
pub mod hid;
pub mod px100;
pub mod status;

pub use command::{Command, Mode};
pub use error::{Error, Result};
pub use status::{DeviceStatus, FaultFlags};

/// Broadcast status frame length in bytes
pub const STATUS_FRAME_LEN: usize = frame::STATUS_LEN;

/// Polling protocol report size in bytes
pub const REPORT_SIZE: usize = hid::REPORT_SIZE;
