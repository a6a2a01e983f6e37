//! Photoresistor (LDR) voltage-divider calibration: raw ADC counts to lux.
//!
//! The curve is an empirical fit. Keep the constants and the rounding point
//! exactly as they are so output matches what the field devices report
//! elsewhere.

use serde::Deserialize;
use thiserror::Error;

/// Full-scale ADC count reported by the device.
pub const ADC_MAX: f64 = 4000.0;
/// Divider reference voltage.
pub const V_REF: f64 = 3.3;
/// Fixed divider resistor, ohms.
pub const R_FIXED: f64 = 10_000.0;

const LUX_SCALE: f64 = 500.0;
const LUX_REF_OHMS: f64 = 10_000.0;
const LUX_EXPONENT: f64 = 1.4;

/// What to do with counts at or beyond the ends of the divider's range.
/// At 0 the LDR resistance collapses to zero (infinite lux); at full scale
/// the divider denominator is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LdrPolicy {
    /// Treat the frame as malformed.
    #[default]
    Reject,
    /// Pin the count to the nearest convertible value, 1 or ADC_MAX - 1.
    Clamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum LightError {
    #[error("ldr count {0} is outside the convertible range (0, {ADC_MAX})")]
    OutOfRange(f64),
    #[error("ldr count is not a finite number")]
    NotFinite,
}

/// Convert a raw count strictly inside (0, ADC_MAX) to whole lux.
pub fn lux_from_adc(adc: f64) -> Result<f64, LightError> {
    if !adc.is_finite() {
        return Err(LightError::NotFinite);
    }
    if adc <= 0.0 || adc >= ADC_MAX {
        return Err(LightError::OutOfRange(adc));
    }
    let voltage = (adc / ADC_MAX) * V_REF;
    let r_ldr = R_FIXED * (voltage / (V_REF - voltage));
    let lux = LUX_SCALE * (LUX_REF_OHMS / r_ldr).powf(LUX_EXPONENT);
    Ok(lux.round())
}

impl LdrPolicy {
    pub fn convert(self, adc: f64) -> Result<f64, LightError> {
        match self {
            Self::Reject => lux_from_adc(adc),
            Self::Clamp => {
                if adc.is_nan() {
                    return Err(LightError::NotFinite);
                }
                lux_from_adc(adc.clamp(1.0, ADC_MAX - 1.0))
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
