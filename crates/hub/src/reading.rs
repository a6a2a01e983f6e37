//! Normalized sensor snapshot shared by every feed.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// One normalized snapshot of a plantation: percent humidity, lux light,
/// degrees Celsius temperature (when the source reports one).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub temperature: Option<f64>,
    pub humidity: f64,
    pub light: f64,
    pub irrigation_active: bool,
    pub illumination_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Reading {
    /// All-zero placeholder for a live plantation whose device has not
    /// reported yet. Carries no temperature.
    pub fn zeroed(actuators: Actuators, at: OffsetDateTime) -> Self {
        Self {
            temperature: None,
            humidity: 0.0,
            light: 0.0,
            irrigation_active: actuators.irrigation,
            illumination_active: actuators.illumination,
            timestamp: at,
        }
    }

    /// A new reading with the same sensor values but a changed actuator
    /// state, stamped `at`. Used when the user flips a switch.
    pub fn with_actuators(&self, actuators: Actuators, at: OffsetDateTime) -> Self {
        Self {
            irrigation_active: actuators.irrigation,
            illumination_active: actuators.illumination,
            timestamp: at,
            ..self.clone()
        }
    }

    pub fn actuators(&self) -> Actuators {
        Actuators {
            irrigation: self.irrigation_active,
            illumination: self.illumination_active,
        }
    }
}

/// Irrigation / illumination switch positions as last requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Actuators {
    pub irrigation: bool,
    pub illumination: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Live,
    Synthetic,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Synthetic => "synthetic",
        }
    }

    pub fn from_str_lossy(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" | "real" => Some(Self::Live),
            "synthetic" | "simulated" | "simulada" => Some(Self::Synthetic),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
