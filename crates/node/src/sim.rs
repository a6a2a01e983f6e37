//! Stateful field simulator for local development.
//!
//! Models what the greenhouse device reports:
//! - Soil humidity (percent) as a random walk with mean reversion
//! - Drying drift, reversed while the irrigation relay is open
//! - A diurnal light cycle on the photoresistor (low counts = bright)
//! - Air temperature following the same cycle, peaking in the afternoon
//! - Per-reading sensor noise

use std::f64::consts::PI;
use std::fmt;

/// Photoresistor ADC full scale.
const LDR_MAX: f64 = 4000.0;
/// Counts at dusk/dawn; noon sits `LDR_SWING` below, midnight above.
const LDR_MID: f64 = 2000.0;
const LDR_SWING: f64 = 1200.0;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts mid-range and dries steadily. Crosses the hub's automatic
    /// irrigation threshold within a few minutes.
    Drying,
    /// Hovers in the comfortable band with little noise.
    Stable,
    /// Starts near saturation and dries very slowly.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "wet" => Self::Wet,
            _ => Self::Drying,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// One tick's worth of sensor values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub humidity: f64,
    pub ldr: u16,
    pub temperature: f64,
}

pub struct FieldSim {
    /// Current "true" soil humidity, percent.
    humidity: f64,

    // Random walk parameters
    drift_per_sample: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    center: f64,
    noise_sigma: f64,

    diurnal_period_s: f64,

    // Irrigation response
    irrigating: bool,
    wet_rate: f64,
}

impl FieldSim {
    /// `diurnal_period_s` controls the day/night cycle length. Use 600
    /// (10 min) for fast dev iteration or 86400 for real-time.
    pub fn new(scenario: Scenario, diurnal_period_s: f64) -> Self {
        let (drift, walk_sigma, mean_rev, noise_sigma, start) = match scenario {
            Scenario::Drying => (0.8, 0.6, 0.01, 0.4, 62.0),
            Scenario::Stable => (0.05, 0.3, 0.08, 0.2, 60.0),
            Scenario::Wet => (0.1, 0.4, 0.02, 0.3, 85.0),
        };

        Self {
            humidity: start + gaussian(0.0, 2.0),
            drift_per_sample: drift,
            walk_sigma,
            mean_reversion: mean_rev,
            center: start,
            noise_sigma,
            diurnal_period_s,
            irrigating: false,
            wet_rate: 3.0,
        }
    }

    /// Inform the simulator whether the irrigation relay is open.
    pub fn set_irrigating(&mut self, active: bool) {
        self.irrigating = active;
    }

    /// Advance one tick. `now_s` is seconds since the epoch and only drives
    /// the day/night phase.
    pub fn sample(&mut self, now_s: f64) -> Sample {
        // -- Evolve the soil ------------------------------------------------
        let pull = self.mean_reversion * (self.center - self.humidity);
        let walk = gaussian(0.0, self.walk_sigma);
        let wet = if self.irrigating { self.wet_rate } else { 0.0 };

        self.humidity = (self.humidity - self.drift_per_sample + pull + walk + wet).clamp(0.0, 100.0);

        // -- Build the instantaneous reading --------------------------------

        // Positive during the day, peaking a quarter period in.
        let daylight = (2.0 * PI * now_s / self.diurnal_period_s).sin();

        let humidity = (self.humidity + gaussian(0.0, self.noise_sigma)).clamp(0.0, 100.0);
        let ldr = (LDR_MID - LDR_SWING * daylight + gaussian(0.0, 40.0))
            .round()
            .clamp(1.0, LDR_MAX - 1.0) as u16;
        let temperature = 22.0 + 5.0 * daylight + gaussian(0.0, 0.3);

        Sample {
            humidity: (humidity * 10.0).round() / 10.0,
            ldr,
            temperature: (temperature * 10.0).round() / 10.0,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
