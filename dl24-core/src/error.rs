//! Error types for dl24-core

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Codec errors
///
/// Frame errors are local: a failed decode discards the frame and the
/// reader resynchronizes on the next header.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Frame is too short to be valid
    #[error("Frame too short: expected at least {expected} bytes, got {actual} bytes")]
    TooShort { expected: usize, actual: usize },

    /// Magic header or trailer mismatch
    #[error("Frame delimiter mismatch")]
    BadDelimiter,

    /// Message type byte is not the expected one
    #[error("Unexpected message type: 0x{0:02X}")]
    UnexpectedType(u8),

    /// Device type byte is not a DC load
    #[error("Unexpected device type: 0x{0:02X}")]
    UnexpectedDevice(u8),

    /// Checksum verification failed
    #[error("Checksum mismatch: expected 0x{expected:02X}, received 0x{received:02X}")]
    ChecksumMismatch { expected: u8, received: u8 },

    /// Unknown operating mode code
    #[error("Unknown mode code: {0}")]
    UnknownMode(u8),

    /// The command cannot be expressed on this protocol
    #[error("Command {0} not supported by this protocol")]
    Unsupported(&'static str),
}

impl Error {
    /// Check if the reader can recover by resynchronizing on later bytes
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Unsupported(_))
    }
}
