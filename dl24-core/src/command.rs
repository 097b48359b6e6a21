//! DL24P command and operating-mode definitions

use std::fmt;

use crate::error::{Error, Result};

/// Load operating modes
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Mode {
    /// Constant current
    Cc = 0,
    /// Constant power
    Cp = 1,
    /// Constant voltage
    Cv = 2,
    /// Constant resistance
    Cr = 3,
}

impl Mode {
    /// Get mode name as displayed on the device
    pub fn name(self) -> &'static str {
        match self {
            Self::Cc => "CC",
            Self::Cp => "CP",
            Self::Cv => "CV",
            Self::Cr => "CR",
        }
    }
}

impl From<Mode> for u8 {
    fn from(mode: Mode) -> u8 {
        mode as u8
    }
}

impl TryFrom<u8> for Mode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Cc),
            1 => Ok(Self::Cp),
            2 => Ok(Self::Cv),
            3 => Ok(Self::Cr),
            _ => Err(Error::UnknownMode(value)),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Device commands
///
/// Each codec encodes the subset its protocol can express; the rest return
/// [`Error::Unsupported`]. Physical units: amps, watts, volts, ohms.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    TurnOn,
    TurnOff,
    SetCurrent(f64),
    SetPower(f64),
    SetResistance(f64),
    SetVoltage(f64),
    SetVoltageCutoff(f64),
    /// Run timer in seconds
    SetTimer(u32),
    /// Discharge timeout; zero hours and minutes disables it
    SetDischargeTime { hours: u8, minutes: u8 },
    ResetCounters,
    /// Select an operating mode, optionally applying its setpoint
    SetMode(Mode, Option<f64>),
    /// Screen brightness, 1 (min) to 9 (max)
    SetBrightness(u8),
    /// Screen standby timeout in minutes
    SetStandby(u8),
    RestoreDefaults,
}

impl Command {
    /// Get command name
    pub fn name(&self) -> &'static str {
        match self {
            Self::TurnOn => "TURN_ON",
            Self::TurnOff => "TURN_OFF",
            Self::SetCurrent(_) => "SET_CURRENT",
            Self::SetPower(_) => "SET_POWER",
            Self::SetResistance(_) => "SET_RESISTANCE",
            Self::SetVoltage(_) => "SET_VOLTAGE",
            Self::SetVoltageCutoff(_) => "SET_VOLTAGE_CUTOFF",
            Self::SetTimer(_) => "SET_TIMER",
            Self::SetDischargeTime { .. } => "SET_DISCHARGE_TIME",
            Self::ResetCounters => "RESET_COUNTERS",
            Self::SetMode(..) => "SET_MODE",
            Self::SetBrightness(_) => "SET_BRIGHTNESS",
            Self::SetStandby(_) => "SET_STANDBY",
            Self::RestoreDefaults => "RESTORE_DEFAULTS",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetCurrent(a) => write!(f, "SET_CURRENT({a:.3}A)"),
            Self::SetPower(w) => write!(f, "SET_POWER({w:.2}W)"),
            Self::SetResistance(r) => write!(f, "SET_RESISTANCE({r:.2}R)"),
            Self::SetVoltage(v) => write!(f, "SET_VOLTAGE({v:.2}V)"),
            Self::SetVoltageCutoff(v) => write!(f, "SET_VOLTAGE_CUTOFF({v:.2}V)"),
            Self::SetTimer(s) => write!(f, "SET_TIMER({s}s)"),
            Self::SetDischargeTime { hours, minutes } => {
                write!(f, "SET_DISCHARGE_TIME({hours}h{minutes:02}m)")
            }
            Self::SetMode(mode, Some(value)) => write!(f, "SET_MODE({mode}, {value})"),
            Self::SetMode(mode, None) => write!(f, "SET_MODE({mode})"),
            Self::SetBrightness(level) => write!(f, "SET_BRIGHTNESS({level})"),
            Self::SetStandby(minutes) => write!(f, "SET_STANDBY({minutes}m)"),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_conversion() {
        assert_eq!(u8::from(Mode::Cc), 0);
        assert_eq!(Mode::try_from(3).unwrap(), Mode::Cr);
        assert!(Mode::try_from(4).is_err());
    }

    #[test]
    fn test_command_display() {
        assert_eq!(Command::SetCurrent(0.5).to_string(), "SET_CURRENT(0.500A)");
        assert_eq!(Command::TurnOn.to_string(), "TURN_ON");
    }
}
