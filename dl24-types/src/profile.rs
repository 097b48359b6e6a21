//! Test profile definitions
//!
//! A profile describes one load program. Profiles are plain data plus
//! validation and JSON round-tripping; the runner interprets them.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Highest cutoff the hardware accepts (the wire range tops out at 200 V)
pub const MAX_CUTOFF_V: f64 = 200.0;

/// Highest current the load sinks (A)
pub const MAX_CURRENT_A: f64 = 24.0;

fn default_cycle_rest() -> u64 {
    60
}

fn default_step_rest() -> u64 {
    10
}

/// One stage of a stepped profile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Current to hold (A)
    pub current_a: f64,
    /// How long to hold it (s)
    pub duration_s: u64,
}

/// A load program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub kind: ProfileKind,
}

/// Profile variants
///
/// One discriminated union instead of subclasses: the runner dispatches on
/// this exhaustively, so a new kind extends the enum and the dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProfileKind {
    /// Discharge at a fixed current until the voltage cutoff
    Discharge {
        current_a: f64,
        voltage_cutoff: f64,
        #[serde(default)]
        max_duration_s: Option<u64>,
    },
    /// Repeated discharge cycles with a rest in between
    Cycle {
        current_a: f64,
        voltage_cutoff: f64,
        num_cycles: u32,
        #[serde(default = "default_cycle_rest")]
        rest_between_cycles_s: u64,
    },
    /// Fixed-duration run, cutoff optional
    Timed {
        current_a: f64,
        duration_s: u64,
        #[serde(default)]
        voltage_cutoff: Option<f64>,
    },
    /// Ordered current steps, e.g. for internal resistance estimation
    Stepped {
        steps: Vec<Step>,
        #[serde(default)]
        voltage_cutoff: Option<f64>,
        #[serde(default = "default_step_rest")]
        rest_between_steps_s: u64,
    },
}

fn check_current(amps: f64) -> Result<()> {
    if !amps.is_finite() || amps < 0.0 || amps > MAX_CURRENT_A {
        return Err(Error::InvalidProfile(format!(
            "current {amps}A outside 0..={MAX_CURRENT_A}A"
        )));
    }
    Ok(())
}

fn check_cutoff(volts: f64) -> Result<()> {
    if !volts.is_finite() || volts < 0.0 || volts > MAX_CUTOFF_V {
        return Err(Error::InvalidProfile(format!(
            "voltage cutoff {volts}V outside 0..={MAX_CUTOFF_V}V"
        )));
    }
    Ok(())
}

impl TestProfile {
    /// Profile kind as a short lowercase tag, for session metadata
    pub fn test_type(&self) -> &'static str {
        match self.kind {
            ProfileKind::Discharge { .. } => "discharge",
            ProfileKind::Cycle { .. } => "cycle",
            ProfileKind::Timed { .. } => "timed",
            ProfileKind::Stepped { .. } => "stepped",
        }
    }

    /// Validate the profile before a run
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProfile`] for negative or out-of-range
    /// values, a zero cycle count or duration, or an empty step list.
    pub fn validate(&self) -> Result<()> {
        match &self.kind {
            ProfileKind::Discharge {
                current_a,
                voltage_cutoff,
                max_duration_s,
            } => {
                check_current(*current_a)?;
                check_cutoff(*voltage_cutoff)?;
                if *max_duration_s == Some(0) {
                    return Err(Error::InvalidProfile("max duration must be positive".into()));
                }
            }
            ProfileKind::Cycle {
                current_a,
                voltage_cutoff,
                num_cycles,
                ..
            } => {
                check_current(*current_a)?;
                check_cutoff(*voltage_cutoff)?;
                if *num_cycles == 0 {
                    return Err(Error::InvalidProfile("at least one cycle required".into()));
                }
            }
            ProfileKind::Timed {
                current_a,
                duration_s,
                voltage_cutoff,
            } => {
                check_current(*current_a)?;
                if *duration_s == 0 {
                    return Err(Error::InvalidProfile("duration must be positive".into()));
                }
                if let Some(cutoff) = voltage_cutoff {
                    check_cutoff(*cutoff)?;
                }
            }
            ProfileKind::Stepped {
                steps,
                voltage_cutoff,
                ..
            } => {
                if steps.is_empty() {
                    return Err(Error::InvalidProfile("at least one step required".into()));
                }
                for step in steps {
                    check_current(step.current_a)?;
                    if step.duration_s == 0 {
                        return Err(Error::InvalidProfile(
                            "step duration must be positive".into(),
                        ));
                    }
                }
                if let Some(cutoff) = voltage_cutoff {
                    check_cutoff(*cutoff)?;
                }
            }
        }
        Ok(())
    }

    /// Serialize to a JSON document
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Build a stepped profile for internal resistance estimation:
    /// equal-duration steps at a ladder of currents, short rests
    pub fn internal_resistance(currents: &[f64], duration_per_step_s: u64) -> Self {
        Self {
            name: "IR Test".into(),
            description: "Internal resistance estimation".into(),
            kind: ProfileKind::Stepped {
                steps: currents
                    .iter()
                    .map(|&current_a| Step {
                        current_a,
                        duration_s: duration_per_step_s,
                    })
                    .collect(),
                voltage_cutoff: None,
                rest_between_steps_s: 5,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn discharge(current_a: f64, voltage_cutoff: f64) -> TestProfile {
        TestProfile {
            name: "test".into(),
            description: String::new(),
            kind: ProfileKind::Discharge {
                current_a,
                voltage_cutoff,
                max_duration_s: None,
            },
        }
    }

    #[test]
    fn test_validate_discharge() {
        assert!(discharge(0.5, 3.0).validate().is_ok());
        assert!(discharge(-0.5, 3.0).validate().is_err());
        assert!(discharge(0.5, -1.0).validate().is_err());
        assert!(discharge(0.5, 250.0).validate().is_err());
        assert!(discharge(30.0, 3.0).validate().is_err());
    }

    #[test]
    fn test_validate_cycle_counts() {
        let profile = TestProfile {
            name: "cycles".into(),
            description: String::new(),
            kind: ProfileKind::Cycle {
                current_a: 1.0,
                voltage_cutoff: 3.0,
                num_cycles: 0,
                rest_between_cycles_s: 60,
            },
        };
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_validate_stepped_needs_steps() {
        let profile = TestProfile {
            name: "steps".into(),
            description: String::new(),
            kind: ProfileKind::Stepped {
                steps: vec![],
                voltage_cutoff: None,
                rest_between_steps_s: 10,
            },
        };
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let profile = TestProfile {
            name: "18650 capacity".into(),
            description: "standard capacity check".into(),
            kind: ProfileKind::Discharge {
                current_a: 0.5,
                voltage_cutoff: 3.0,
                max_duration_s: Some(14400),
            },
        };

        let json = profile.to_json().unwrap();
        let loaded = TestProfile::from_json(&json).unwrap();

        assert_eq!(profile, loaded);
        assert!(json.contains("\"type\": \"Discharge\""));
    }

    #[test]
    fn test_json_defaults() {
        let json = r#"{
            "name": "quick",
            "type": "Timed",
            "current_a": 1.0,
            "duration_s": 600
        }"#;

        let profile = TestProfile::from_json(json).unwrap();
        assert_eq!(profile.description, "");
        assert_eq!(
            profile.kind,
            ProfileKind::Timed {
                current_a: 1.0,
                duration_s: 600,
                voltage_cutoff: None,
            }
        );
    }

    #[test]
    fn test_internal_resistance_builder() {
        let profile = TestProfile::internal_resistance(&[0.2, 0.5, 1.0], 30);

        assert_eq!(profile.test_type(), "stepped");
        let ProfileKind::Stepped { steps, .. } = &profile.kind else {
            panic!("expected stepped profile");
        };
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[1].current_a, 0.5);
        assert_eq!(steps[1].duration_s, 30);
        assert!(profile.validate().is_ok());
    }
}
