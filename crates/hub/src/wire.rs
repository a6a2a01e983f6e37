use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, Time};

use crate::light::{LdrPolicy, LightError};
use crate::reading::Reading;

// ---------------------------------------------------------------------------
// Device status frame (device -> hub)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct DeviceFrame {
    #[serde(alias = "humedad")]
    pub(crate) humidity: f64,
    pub(crate) ldr: f64,
    #[serde(rename = "riegoActivo")]
    pub(crate) irrigation_active: bool,
    pub(crate) timestamp: String,
    #[serde(default, alias = "temperatura")]
    pub(crate) temperature: Option<f64>,
}

#[derive(Debug, Error)]
pub(crate) enum FrameError {
    #[error("frame is not valid text")]
    NotText,
    #[error("bad frame json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad ldr value: {0}")]
    Light(#[from] LightError),
    #[error("bad time of day '{0}' (want HH:MM or HH:MM:SS)")]
    TimeOfDay(String),
    #[error("humidity {0} is not a finite number")]
    Humidity(f64),
}

/// Parse a device time of day, "HH:MM" or "HH:MM:SS".
pub(crate) fn parse_time_of_day(s: &str) -> Result<Time, FrameError> {
    let s = s.trim();
    let with_seconds = format_description!("[hour]:[minute]:[second]");
    let without_seconds = format_description!("[hour]:[minute]");
    Time::parse(s, &with_seconds)
        .or_else(|_| Time::parse(s, &without_seconds))
        .map_err(|_| FrameError::TimeOfDay(s.to_string()))
}

/// Attach the calendar date of `now` to a device time of day. The device
/// clock is read in `now`'s offset, so pass `now` already shifted into the
/// device's zone.
pub(crate) fn complete_timestamp(time_of_day: &str, now: OffsetDateTime) -> Result<OffsetDateTime, FrameError> {
    let t = parse_time_of_day(time_of_day)?;
    Ok(PrimitiveDateTime::new(now.date(), t).assume_offset(now.offset()))
}

impl DeviceFrame {
    /// Normalize into a [`Reading`]: percent humidity, lux light, full
    /// timestamp. The device does not report the lamp, so the caller passes
    /// the last requested illumination state.
    pub(crate) fn into_reading(
        self,
        policy: LdrPolicy,
        illumination_active: bool,
        now: OffsetDateTime,
    ) -> Result<Reading, FrameError> {
        if !self.humidity.is_finite() {
            return Err(FrameError::Humidity(self.humidity));
        }
        let humidity = self.humidity.clamp(0.0, 100.0);
        if humidity != self.humidity {
            tracing::debug!(raw = self.humidity, "device humidity outside 0..=100, clamped");
        }
        let light = policy.convert(self.ldr)?;
        let timestamp = complete_timestamp(&self.timestamp, now)?;

        Ok(Reading {
            temperature: self.temperature.filter(|t| t.is_finite()),
            humidity,
            light,
            irrigation_active: self.irrigation_active,
            illumination_active,
            timestamp,
        })
    }
}

/// Decode one inbound text frame.
pub(crate) fn decode_frame(
    payload: &[u8],
    policy: LdrPolicy,
    illumination_active: bool,
    now: OffsetDateTime,
) -> Result<Reading, FrameError> {
    let text = std::str::from_utf8(payload).map_err(|_| FrameError::NotText)?;
    let frame: DeviceFrame = serde_json::from_str(text)?;
    frame.into_reading(policy, illumination_active, now)
}

// ---------------------------------------------------------------------------
// Control commands (hub -> device)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    AutoOn,
    AutoOff,
    /// Manual irrigation switch; implies leaving automatic mode.
    Irrigation(bool),
    /// Manual lamp switch; implies leaving automatic mode.
    Illumination(bool),
}

impl Command {
    fn keys(self) -> &'static [&'static str] {
        match self {
            Self::AutoOn => &["AUTO_ON"],
            Self::AutoOff => &["AUTO_OFF"],
            Self::Irrigation(true) => &["RIEGO_ON", "AUTO_OFF"],
            Self::Irrigation(false) => &["RIEGO_OFF", "AUTO_OFF"],
            Self::Illumination(true) => &["ILUM_ON", "AUTO_OFF"],
            Self::Illumination(false) => &["ILUM_OFF", "AUTO_OFF"],
        }
    }

    /// Flat key -> true object, e.g. `{"RIEGO_ON":true,"AUTO_OFF":true}`.
    pub fn to_json(self) -> Value {
        let map: Map<String, Value> = self
            .keys()
            .iter()
            .map(|k| (k.to_string(), Value::Bool(true)))
            .collect();
        Value::Object(map)
    }

    pub fn encode(self) -> String {
        self.to_json().to_string()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::{datetime, offset, time};

    const NOW: OffsetDateTime = datetime!(2025-05-01 18:42:10 UTC);

    // -- parse_time_of_day --------------------------------------------------

    #[test]
    fn time_of_day_with_seconds() {
        assert_eq!(parse_time_of_day("14:03:09").unwrap(), time!(14:03:09));
    }

    #[test]
    fn time_of_day_without_seconds() {
        assert_eq!(parse_time_of_day("07:45").unwrap(), time!(7:45));
    }

    #[test]
    fn time_of_day_trims_whitespace() {
        assert_eq!(parse_time_of_day(" 07:45 ").unwrap(), time!(7:45));
    }

    #[test]
    fn time_of_day_garbage() {
        assert!(parse_time_of_day("").is_err());
        assert!(parse_time_of_day("25:00").is_err());
        assert!(parse_time_of_day("2025-05-01T10:00:00Z").is_err());
    }

    #[test]
    fn complete_timestamp_uses_current_date() {
        let ts = complete_timestamp("09:15:00", NOW).unwrap();
        assert_eq!(ts, datetime!(2025-05-01 09:15:00 UTC));
    }

    #[test]
    fn complete_timestamp_in_device_zone() {
        // 22:00 UTC is already the next day at +02:00
        let now = datetime!(2025-05-01 22:00:00 UTC).to_offset(offset!(+2));
        let ts = complete_timestamp("23:30:00", now).unwrap();
        assert_eq!(ts, datetime!(2025-05-02 21:30:00 UTC));
        assert_eq!(ts.offset(), offset!(+2));
    }

    // -- decode_frame -------------------------------------------------------

    #[test]
    fn decode_valid_frame() {
        let raw = br#"{"humidity":41.5,"ldr":2000,"riegoActivo":true,"timestamp":"18:42"}"#;
        let r = decode_frame(raw, LdrPolicy::Reject, false, NOW).unwrap();
        assert_eq!(r.humidity, 41.5);
        assert_eq!(r.light, 500.0);
        assert!(r.irrigation_active);
        assert!(!r.illumination_active);
        assert_eq!(r.temperature, None);
        assert_eq!(r.timestamp, datetime!(2025-05-01 18:42:00 UTC));
    }

    #[test]
    fn decode_accepts_spanish_field_names() {
        let raw = br#"{"humedad":60,"ldr":1000,"riegoActivo":false,"timestamp":"08:00:00","temperatura":23.5}"#;
        let r = decode_frame(raw, LdrPolicy::Reject, true, NOW).unwrap();
        assert_eq!(r.humidity, 60.0);
        assert_eq!(r.temperature, Some(23.5));
        assert!(r.illumination_active);
    }

    #[test]
    fn decode_ignores_extra_fields() {
        let raw = br#"{"humidity":50,"ldr":2000,"riegoActivo":false,"timestamp":"08:00","rssi":-70}"#;
        assert!(decode_frame(raw, LdrPolicy::Reject, false, NOW).is_ok());
    }

    #[test]
    fn decode_missing_field_fails() {
        let raw = br#"{"humidity":50,"riegoActivo":false,"timestamp":"08:00"}"#;
        assert!(matches!(
            decode_frame(raw, LdrPolicy::Reject, false, NOW),
            Err(FrameError::Json(_))
        ));
    }

    #[test]
    fn decode_not_json_fails() {
        assert!(matches!(
            decode_frame(b"hello", LdrPolicy::Reject, false, NOW),
            Err(FrameError::Json(_))
        ));
    }

    #[test]
    fn decode_non_utf8_fails() {
        assert!(matches!(
            decode_frame(&[0xff, 0xfe], LdrPolicy::Reject, false, NOW),
            Err(FrameError::NotText)
        ));
    }

    #[test]
    fn decode_ldr_at_zero_depends_on_policy() {
        let raw = br#"{"humidity":50,"ldr":0,"riegoActivo":false,"timestamp":"08:00"}"#;
        assert!(matches!(
            decode_frame(raw, LdrPolicy::Reject, false, NOW),
            Err(FrameError::Light(_))
        ));
        assert!(decode_frame(raw, LdrPolicy::Clamp, false, NOW).is_ok());
    }

    #[test]
    fn decode_bad_time_fails() {
        let raw = br#"{"humidity":50,"ldr":2000,"riegoActivo":false,"timestamp":"noon"}"#;
        assert!(matches!(
            decode_frame(raw, LdrPolicy::Reject, false, NOW),
            Err(FrameError::TimeOfDay(_))
        ));
    }

    #[test]
    fn decode_clamps_humidity() {
        let raw = br#"{"humidity":104.2,"ldr":2000,"riegoActivo":false,"timestamp":"08:00"}"#;
        let r = decode_frame(raw, LdrPolicy::Reject, false, NOW).unwrap();
        assert_eq!(r.humidity, 100.0);
    }

    // -- Command encoding ---------------------------------------------------

    #[test]
    fn automatic_commands() {
        assert_eq!(Command::AutoOn.to_json(), json!({ "AUTO_ON": true }));
        assert_eq!(Command::AutoOff.to_json(), json!({ "AUTO_OFF": true }));
    }

    #[test]
    fn manual_commands_always_leave_auto() {
        assert_eq!(
            Command::Irrigation(true).to_json(),
            json!({ "RIEGO_ON": true, "AUTO_OFF": true })
        );
        assert_eq!(
            Command::Irrigation(false).to_json(),
            json!({ "RIEGO_OFF": true, "AUTO_OFF": true })
        );
        assert_eq!(
            Command::Illumination(true).to_json(),
            json!({ "ILUM_ON": true, "AUTO_OFF": true })
        );
        assert_eq!(
            Command::Illumination(false).to_json(),
            json!({ "ILUM_OFF": true, "AUTO_OFF": true })
        );
    }

    #[test]
    fn encode_is_compact_json() {
        let text = Command::AutoOn.encode();
        assert_eq!(text, r#"{"AUTO_ON":true}"#);
    }
}
