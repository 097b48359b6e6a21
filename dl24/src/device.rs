//! High-level device interface
//!
//! [`Device`] unifies whichever transport is active behind one capability
//! surface. Setters are fire-and-forget: the return value says whether the
//! command was written, not whether the device honored it. Capabilities the
//! active transport lacks report `false` instead of failing.
//!
//! # Examples
//!
//! ```no_run
//! use dl24::Device;
//! use tokio::net::TcpStream;
//!
//! #[tokio::main]
//! async fn main() -> dl24::Result<()> {
//!     // A DL24P behind a serial-TCP bridge, speaking the broadcast stream
//!     let device = Device::broadcast();
//!     let stream = TcpStream::connect("192.168.1.50:8880").await.unwrap();
//!     device.connect(Box::new(stream)).await?;
//!
//!     device.set_current(0.5).await;
//!     device.turn_on().await;
//!
//!     device.disconnect().await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tracing::{debug, trace, warn};

use dl24_core::{Command, DeviceStatus, Mode};
use dl24_transport::{
    BoxedLink, BroadcastTransport, ErrorCallback, PollingTransport, StatusCallback, Transport,
};

use crate::error::Result;

/// DL24P electronic load
///
/// Cheap to clone; clones share the underlying transport.
#[derive(Clone)]
pub struct Device {
    transport: Arc<dyn Transport>,
}

impl Device {
    /// Device on the broadcast (serial/Bluetooth) transport
    pub fn broadcast() -> Self {
        Self::with_transport(Arc::new(BroadcastTransport::new()))
    }

    /// Device on the polling (USB report) transport
    pub fn polling() -> Self {
        Self::with_transport(Arc::new(PollingTransport::new()))
    }

    /// Device on a caller-built transport
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Take ownership of an open link and start talking to the device
    pub async fn connect(&self, link: BoxedLink) -> Result<()> {
        self.transport.connect(link).await?;
        Ok(())
    }

    /// Stop the transport and close the link
    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Latest status snapshot, safe for concurrent reads
    pub fn last_status(&self) -> Option<Arc<DeviceStatus>> {
        self.transport.last_status()
    }

    /// Register the status callback (replaces any previous one)
    pub fn set_status_callback(&self, callback: impl Fn(&DeviceStatus) + Send + Sync + 'static) {
        self.transport.set_status_callback(Arc::new(callback) as StatusCallback);
    }

    /// Register the error callback (replaces any previous one)
    pub fn set_error_callback(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.transport.set_error_callback(Arc::new(callback) as ErrorCallback);
    }

    /// Turn the load on
    pub async fn turn_on(&self) -> bool {
        self.send(Command::TurnOn).await
    }

    /// Turn the load off
    pub async fn turn_off(&self) -> bool {
        self.send(Command::TurnOff).await
    }

    /// Set the load current for CC mode (A)
    pub async fn set_current(&self, amps: f64) -> bool {
        self.send(Command::SetCurrent(amps)).await
    }

    /// Set the load power for CP mode (W)
    pub async fn set_power(&self, watts: f64) -> bool {
        self.send(Command::SetPower(watts)).await
    }

    /// Set the load resistance for CR mode (ohms)
    pub async fn set_resistance(&self, ohms: f64) -> bool {
        self.send(Command::SetResistance(ohms)).await
    }

    /// Set the load voltage for CV mode (V)
    pub async fn set_voltage(&self, volts: f64) -> bool {
        self.send(Command::SetVoltage(volts)).await
    }

    /// Select an operating mode, optionally applying its setpoint
    pub async fn set_mode(&self, mode: Mode, value: Option<f64>) -> bool {
        self.send(Command::SetMode(mode, value)).await
    }

    /// Set the voltage cutoff threshold (V)
    pub async fn set_voltage_cutoff(&self, volts: f64) -> bool {
        self.send(Command::SetVoltageCutoff(volts)).await
    }

    /// Set the run timer (seconds)
    pub async fn set_timer(&self, seconds: u32) -> bool {
        self.send(Command::SetTimer(seconds)).await
    }

    /// Set the discharge timeout; zero hours and minutes disables it
    pub async fn set_discharge_time(&self, hours: u8, minutes: u8) -> bool {
        self.send(Command::SetDischargeTime { hours, minutes }).await
    }

    /// Reset the Wh, mAh and time counters
    pub async fn reset_counters(&self) -> bool {
        self.send(Command::ResetCounters).await
    }

    /// Set screen brightness, 1 (min) to 9 (max)
    pub async fn set_brightness(&self, level: u8) -> bool {
        self.send(Command::SetBrightness(level)).await
    }

    /// Set the screen standby timeout in minutes
    pub async fn set_standby_timeout(&self, minutes: u8) -> bool {
        self.send(Command::SetStandby(minutes)).await
    }

    /// Restore the device's factory defaults
    pub async fn restore_defaults(&self) -> bool {
        self.send(Command::RestoreDefaults).await
    }

    async fn send(&self, command: Command) -> bool {
        match self.transport.send(&command).await {
            Ok(()) => {
                trace!(command = %command, "Command sent");
                true
            }
            Err(dl24_transport::Error::Unsupported(operation)) => {
                debug!(operation, "Operation not supported by the active transport");
                false
            }
            Err(e) => {
                warn!(command = %command, error = %e, "Failed to send command");
                false
            }
        }
    }
}
