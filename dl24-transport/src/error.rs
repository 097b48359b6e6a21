//! Transport errors

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Timed out waiting for a response")]
    ReadTimeout,

    #[error("Connection closed by remote")]
    ConnectionClosed,

    #[error("Another query is already in flight")]
    QueryInFlight,

    #[error("Operation {0} not supported by this transport")]
    Unsupported(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] dl24_core::Error),
}

impl Error {
    /// Map a codec failure from a command encode, keeping the capability
    /// signal distinct from malformed-frame errors
    pub(crate) fn from_encode(err: dl24_core::Error) -> Self {
        match err {
            dl24_core::Error::Unsupported(name) => Self::Unsupported(name),
            other => Self::Codec(other),
        }
    }
}
