//! # dl24
//!
//! Device communication and test automation for Atorch DL24P electronic
//! loads.
//!
//! ## Features
//!
//! - Both DL24P wire protocols (broadcast stream and polling reports)
//!   behind one [`Device`] capability surface
//! - PX100 fallback queries on links with an incomplete broadcast stream
//! - A pausable, cancellable [`TestRunner`] for discharge, cycle, timed
//!   and stepped load programs with safety cutoffs
//! - Persistence through an injected [`Recorder`]; the core performs no
//!   file or database I/O of its own
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use dl24::{Device, MemoryRecorder, ProfileKind, TestProfile, TestRunner};
//! use tokio::net::TcpStream;
//!
//! #[tokio::main]
//! async fn main() -> dl24::Result<()> {
//!     // A DL24P behind a serial-TCP bridge
//!     let device = Device::broadcast();
//!     let stream = TcpStream::connect("192.168.1.50:8880").await.unwrap();
//!     device.connect(Box::new(stream)).await?;
//!
//!     let runner = TestRunner::new(device.clone(), Arc::new(MemoryRecorder::new()));
//!     let profile = TestProfile {
//!         name: "capacity".into(),
//!         description: String::new(),
//!         kind: ProfileKind::Discharge {
//!             current_a: 0.5,
//!             voltage_cutoff: 3.0,
//!             max_duration_s: None,
//!         },
//!     };
//!
//!     runner.start(profile, "cell-001", "");
//!     Ok(())
//! }
//! ```

pub mod device;
pub mod error;
pub mod recorder;
pub mod runner;

// Re-exports
pub use device::Device;
pub use error::{Error, Result};
pub use recorder::{MemoryRecorder, RecordedSession, Recorder, RecorderError, SessionId};
pub use runner::{TestProgress, TestRunner, TestState};

// Re-export the layers below
pub use dl24_core::{Command, DeviceStatus, FaultFlags, Mode};
pub use dl24_transport::{BoxedLink, BroadcastTransport, PollingTransport, Transport};
pub use dl24_types::{ProfileKind, Reading, SessionMeta, Step, TestProfile};
