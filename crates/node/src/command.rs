//! Hub -> device control messages: a flat JSON object of command keys, e.g.
//! `{"RIEGO_ON":true,"AUTO_OFF":true}`.

use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Key {
    AutoOn,
    AutoOff,
    IrrigationOn,
    IrrigationOff,
    LampOn,
    LampOff,
}

impl Key {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "AUTO_ON" => Self::AutoOn,
            "AUTO_OFF" => Self::AutoOff,
            "RIEGO_ON" => Self::IrrigationOn,
            "RIEGO_OFF" => Self::IrrigationOff,
            "ILUM_ON" => Self::LampOn,
            "ILUM_OFF" => Self::LampOff,
            _ => return None,
        })
    }
}

/// Decode one control message into the keys set to `true`, mode keys
/// first. Unknown keys and non-true values are logged and skipped.
pub fn decode(text: &str) -> Result<Vec<Key>, serde_json::Error> {
    let map: Map<String, Value> = serde_json::from_str(text)?;
    let mut keys = Vec::with_capacity(map.len());

    for (name, value) in &map {
        match (Key::from_name(name), value) {
            (Some(k), Value::Bool(true)) => keys.push(k),
            (Some(_), other) => tracing::debug!(key = %name, value = %other, "command key not set, skipped"),
            (None, _) => tracing::warn!(key = %name, "unknown command key ignored"),
        }
    }

    keys.sort();
    keys.dedup();
    Ok(keys)
}

// ===========================================================================
// Tests
// ===========================================================================
