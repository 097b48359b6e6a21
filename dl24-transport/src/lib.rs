//! Transport layer for the DL24P
//!
//! Two incompatible wire disciplines behind one capability trait:
//! [`BroadcastTransport`] listens to the unsolicited ~1 Hz status stream,
//! [`PollingTransport`] drives the query/response report protocol. The
//! façade above them special-cases only capability availability, never
//! protocol detail.

pub mod broadcast;
pub mod error;
pub mod polling;

pub use broadcast::BroadcastTransport;
pub use error::{Error, Result};
pub use polling::PollingTransport;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use dl24_core::{Command, DeviceStatus};

/// A duplex byte link to the device
///
/// Serial ports, HID pipes, TCP bridges and in-memory duplexes all
/// qualify; the host opens the link and hands it over.
pub trait Link: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + ?Sized> Link for T {}

/// Boxed link passed to [`Transport::connect`]
pub type BoxedLink = Box<dyn Link>;

/// Status update callback, invoked from the transport's own task
pub type StatusCallback = Arc<dyn Fn(&DeviceStatus) + Send + Sync>;

/// Error callback, invoked at most once per connection when the link dies
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Capability surface shared by both transports
///
/// Implementations use interior mutability throughout so one instance can
/// be shared behind an `Arc` by the façade and the test runner.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Take ownership of an open link and start the background loop
    async fn connect(&self, link: BoxedLink) -> Result<()>;

    /// Stop the background loop and close the link
    async fn disconnect(&self);

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Encode and send a command
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] when the active protocol cannot express the
    /// command; I/O errors when the link write fails.
    async fn send(&self, command: &Command) -> Result<()>;

    /// Latest status snapshot, safe for concurrent reads
    fn last_status(&self) -> Option<Arc<DeviceStatus>>;

    /// Register the status callback (replaces any previous one)
    fn set_status_callback(&self, callback: StatusCallback);

    /// Register the error callback (replaces any previous one)
    fn set_error_callback(&self, callback: ErrorCallback);
}
