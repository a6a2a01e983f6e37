//! Threshold classification and the automatic-irrigation edge detector.

use serde::Serialize;
use std::fmt;

use crate::reading::Reading;
use crate::thresholds::ThresholdConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    Normal,
    Warning,
    Critical,
}

impl fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// `true` when `value` is present and strictly above `limit`.
fn above(value: Option<f64>, limit: f64) -> bool {
    value.is_some_and(|v| v > limit)
}

/// Classify a reading. Critical is checked before Warning, first match wins.
pub fn classify(r: &Reading, cfg: &ThresholdConfig) -> SystemStatus {
    if above(r.temperature, cfg.temperature.critical)
        || r.humidity < cfg.humidity.critical
        || r.light > cfg.light.critical
    {
        SystemStatus::Critical
    } else if above(r.temperature, cfg.temperature.max)
        || r.humidity < cfg.humidity.min
        || r.light > cfg.light.max
    {
        SystemStatus::Warning
    } else {
        SystemStatus::Normal
    }
}

/// Whether the irrigation rule asks for automatic watering. A reading
/// without a temperature can never satisfy the temperature clause.
pub fn auto_irrigation(r: &Reading, cfg: &ThresholdConfig) -> bool {
    let rule = &cfg.irrigation;
    rule.enabled
        && r.humidity < rule.humidity_threshold
        && above(r.temperature, rule.temp_threshold)
        && r.light < rule.light_threshold
}

/// Turns a level signal into transitions. Starts low, so a first `false`
/// is not an edge.
#[derive(Debug, Default, Clone, Copy)]
pub struct EdgeDetector {
    last: bool,
}

impl EdgeDetector {
    /// Feed the current level; returns the new level on a transition.
    pub fn update(&mut self, level: bool) -> Option<bool> {
        if level == self.last {
            None
        } else {
            self.last = level;
            Some(level)
        }
    }

    pub fn level(&self) -> bool {
        self.last
    }
}

// ===========================================================================
// Tests
// ===========================================================================
