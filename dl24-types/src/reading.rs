//! Measurement samples and session metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::profile::TestProfile;

/// One timestamped sample taken during a run
///
/// Handed to the injected recorder as soon as it is taken; the core keeps
/// no history of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    /// Voltage (V)
    pub voltage: f64,
    /// Current (A)
    pub current: f64,
    /// Power (W)
    pub power: f64,
    /// Accumulated energy (Wh)
    pub energy_wh: f64,
    /// Accumulated capacity (mAh)
    pub capacity_mah: f64,
    /// MOSFET temperature (Celsius)
    pub temperature_c: f64,
    /// External probe temperature (Celsius)
    pub ext_temperature_c: f64,
    /// Device-reported runtime (s)
    pub runtime_seconds: u32,
}

/// Session-open metadata handed to the recorder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Name of the profile being run
    pub profile_name: String,
    /// Battery or device under test
    pub battery_name: String,
    /// Free-form operator notes
    pub notes: String,
    /// Profile kind tag ("discharge", "cycle", ...)
    pub test_type: String,
    /// Session start stamp
    pub start_time: DateTime<Utc>,
    /// Snapshot of the profile settings
    pub settings: serde_json::Value,
}

impl SessionMeta {
    /// Build the metadata for one run of `profile`
    ///
    /// # Errors
    ///
    /// Fails only if the profile cannot be serialized into the settings
    /// snapshot.
    pub fn new(
        profile: &TestProfile,
        battery_name: impl Into<String>,
        notes: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            profile_name: profile.name.clone(),
            battery_name: battery_name.into(),
            notes: notes.into(),
            test_type: profile.test_type().to_string(),
            start_time: Utc::now(),
            settings: serde_json::to_value(profile)?,
        })
    }
}
