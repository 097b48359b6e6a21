//! High-level error types

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Core protocol error: {0}")]
    Core(#[from] dl24_core::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] dl24_transport::Error),

    #[error("Type error: {0}")]
    Types(#[from] dl24_types::Error),

    #[error("Recorder error: {0}")]
    Recorder(#[from] crate::recorder::RecorderError),
}
