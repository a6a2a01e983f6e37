//! Alert and automatic-irrigation thresholds, rebuilt from the persisted
//! settings blobs with per-field fallback to the built-in defaults.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

pub const TEMP_BLOB: &str = "tempConfig";
pub const HUMIDITY_BLOB: &str = "humidityConfig";
pub const LIGHT_BLOB: &str = "lightConfig";
pub const IRRIGATION_BLOB: &str = "irrigationConfig";

/// The settings blobs thresholds are built from.
pub const THRESHOLD_BLOBS: &[&str] = &[TEMP_BLOB, HUMIDITY_BLOB, LIGHT_BLOB, IRRIGATION_BLOB];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Band {
    pub min: f64,
    pub max: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IrrigationRule {
    pub enabled: bool,
    pub humidity_threshold: f64,
    pub temp_threshold: f64,
    pub light_threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdConfig {
    pub temperature: Band,
    pub humidity: Band,
    pub light: Band,
    pub irrigation: IrrigationRule,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            temperature: Band {
                min: 17.0,
                max: 28.0,
                critical: 30.0,
            },
            humidity: Band {
                min: 45.0,
                max: 75.0,
                critical: 30.0,
            },
            light: Band {
                min: 350.0,
                max: 750.0,
                critical: 2000.0,
            },
            irrigation: IrrigationRule {
                enabled: true,
                humidity_threshold: 50.0,
                temp_threshold: 25.0,
                light_threshold: 1500.0,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Per-field fallback
// ---------------------------------------------------------------------------

/// A stored number, or `fallback` when the field is absent, null,
/// non-numeric or zero. Zero counts as unset, the same way the settings
/// screen treats an empty input.
fn number_or(blob: Option<&Value>, key: &str, fallback: f64) -> f64 {
    blob.and_then(|b| b.get(key))
        .and_then(Value::as_f64)
        .filter(|v| *v != 0.0 && v.is_finite())
        .unwrap_or(fallback)
}

/// A stored bool, or `fallback` only when absent or null; `false` is kept.
pub(crate) fn bool_or(blob: Option<&Value>, key: &str, fallback: bool) -> bool {
    blob.and_then(|b| b.get(key))
        .and_then(Value::as_bool)
        .unwrap_or(fallback)
}

impl ThresholdConfig {
    /// Build from raw settings blobs keyed by blob name. Blobs that are
    /// missing or not JSON objects contribute nothing.
    pub fn from_blobs(blobs: &HashMap<String, Value>) -> Self {
        let d = Self::default();
        let get = |name: &str| blobs.get(name).filter(|v| v.is_object());

        let temp = get(TEMP_BLOB);
        let hum = get(HUMIDITY_BLOB);
        let light = get(LIGHT_BLOB);
        let irr = get(IRRIGATION_BLOB);

        Self {
            temperature: Band {
                min: number_or(temp, "tempMin", d.temperature.min),
                max: number_or(temp, "tempMax", d.temperature.max),
                critical: number_or(temp, "tempCritical", d.temperature.critical),
            },
            humidity: Band {
                min: number_or(hum, "humidityMin", d.humidity.min),
                max: number_or(hum, "humidityMax", d.humidity.max),
                critical: number_or(hum, "humidityCritical", d.humidity.critical),
            },
            light: Band {
                min: number_or(light, "lightMin", d.light.min),
                max: number_or(light, "lightMax", d.light.max),
                critical: number_or(light, "lightCritical", d.light.critical),
            },
            irrigation: IrrigationRule {
                enabled: bool_or(irr, "irrigationEnabled", d.irrigation.enabled),
                humidity_threshold: number_or(
                    irr,
                    "irrigationHumidityThreshold",
                    d.irrigation.humidity_threshold,
                ),
                temp_threshold: number_or(
                    irr,
                    "irrigationTempThreshold",
                    d.irrigation.temp_threshold,
                ),
                light_threshold: number_or(
                    irr,
                    "irrigationLightThreshold",
                    d.irrigation.light_threshold,
                ),
            },
        }
    }

    /// Parse raw stored text blobs; unparseable text is treated as absent.
    pub fn from_raw_blobs(raw: &HashMap<String, String>) -> Self {
        let parsed: HashMap<String, Value> = raw
            .iter()
            .filter_map(|(name, text)| match serde_json::from_str::<Value>(text) {
                Ok(v) => Some((name.clone(), v)),
                Err(e) => {
                    tracing::debug!(blob = %name, "ignoring unparseable settings blob: {e}");
                    None
                }
            })
            .collect();
        Self::from_blobs(&parsed)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
