//! Type definitions for dl24
//!
//! Pure data: test profiles, measurement readings, and session metadata.
//! No runtime behavior lives here.

pub mod error;
pub mod profile;
pub mod reading;

pub use error::{Error, Result};
pub use profile::{ProfileKind, Step, TestProfile};
pub use reading::{Reading, SessionMeta};
