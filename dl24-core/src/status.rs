//! Parsed device state snapshots

use std::fmt;

use bitflags::bitflags;

use crate::command::Mode;

bitflags! {
    /// Fault bits from the status frame flags byte
    ///
    /// Bit 0 of the wire byte is the load-on flag and is carried separately
    /// on [`DeviceStatus`].
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
    pub struct FaultFlags: u8 {
        const OVERCURRENT = 0x02;
        const OVERVOLTAGE = 0x04;
        const OVERTEMPERATURE = 0x08;
    }
}

/// One immutable measurement snapshot from the load
///
/// Produced by a codec decode (broadcast protocol) or by merging the two
/// polling responses. The optional settings fields are populated only when
/// the active protocol reports them.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DeviceStatus {
    /// Measured voltage (V)
    pub voltage: f64,
    /// Measured current (A)
    pub current: f64,
    /// Measured power (W)
    pub power: f64,
    /// Accumulated energy (Wh)
    pub energy_wh: f64,
    /// Accumulated capacity (mAh)
    pub capacity_mah: f64,
    /// MOSFET temperature (Celsius)
    pub temperature_c: f64,
    /// MOSFET temperature (Fahrenheit)
    pub temperature_f: f64,
    /// External probe temperature (Celsius)
    pub ext_temperature_c: f64,
    /// External probe temperature (Fahrenheit)
    pub ext_temperature_f: f64,
    /// Runtime hours
    pub hours: u8,
    /// Runtime minutes
    pub minutes: u8,
    /// Runtime seconds
    pub seconds: u8,
    /// Load is sinking current
    pub load_on: bool,
    /// Device fault bits
    pub faults: FaultFlags,
    /// Approximate fan speed (RPM)
    pub fan_rpm: u16,

    /// Device-reported operating mode
    pub mode: Option<Mode>,
    /// Device-reported setpoint for the active mode
    pub value_set: Option<f64>,
    /// Device-reported voltage cutoff (V)
    pub voltage_cutoff: Option<f64>,
    /// Device-reported time limit hours
    pub time_limit_hours: Option<u8>,
    /// Device-reported time limit minutes
    pub time_limit_minutes: Option<u8>,
}

impl DeviceStatus {
    /// Total runtime in seconds
    pub fn runtime_seconds(&self) -> u32 {
        u32::from(self.hours) * 3600 + u32::from(self.minutes) * 60 + u32::from(self.seconds)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.load_on { "ON" } else { "OFF" };
        write!(
            f,
            "DL24P [{state}]: {:.2}V @ {:.3}A = {:.2}W | {:.0}mAh / {:.2}Wh | Temp: {:.0}C | {:02}:{:02}:{:02}",
            self.voltage,
            self.current,
            self.power,
            self.capacity_mah,
            self.energy_wh,
            self.temperature_c,
            self.hours,
            self.minutes,
            self.seconds,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_seconds() {
        let status = DeviceStatus {
            hours: 2,
            minutes: 30,
            seconds: 45,
            ..Default::default()
        };

        assert_eq!(status.runtime_seconds(), 9045);
    }

    #[test]
    fn test_display() {
        let status = DeviceStatus {
            voltage: 12.5,
            current: 0.5,
            power: 6.25,
            energy_wh: 1.0,
            capacity_mah: 100.0,
            temperature_c: 30.0,
            minutes: 10,
            seconds: 30,
            load_on: true,
            ..Default::default()
        };

        let s = status.to_string();
        assert!(s.contains("ON"));
        assert!(s.contains("12.50V"));
        assert!(s.contains("0.500A"));
        assert!(s.contains("00:10:30"));
    }

    #[test]
    fn test_fault_flags_exclude_load_bit() {
        let faults = FaultFlags::from_bits_truncate(0x0B);
        assert!(faults.contains(FaultFlags::OVERCURRENT));
        assert!(faults.contains(FaultFlags::OVERTEMPERATURE));
        assert!(!faults.contains(FaultFlags::OVERVOLTAGE));
        assert_eq!(faults.bits(), 0x0A);
    }
}
