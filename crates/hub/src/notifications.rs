//! Alert delivery preferences from the `notificationConfig` settings blob.
//! Stored and served back with defaults filled in; nothing is sent.

use serde::Serialize;
use serde_json::Value;

use crate::thresholds::bool_or;

pub const NOTIFICATION_BLOB: &str = "notificationConfig";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    pub notifications_enabled: bool,
    pub email_notifications: bool,
    pub sms_notifications: bool,
    pub notification_email: String,
    pub notification_phone: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            notifications_enabled: true,
            email_notifications: true,
            sms_notifications: false,
            notification_email: "admin@ejemplo.com".to_string(),
            notification_phone: "+34600000000".to_string(),
        }
    }
}

/// A stored non-empty string, or `fallback`.
fn text_or(blob: Option<&Value>, key: &str, fallback: String) -> String {
    blob.and_then(|b| b.get(key))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .unwrap_or(fallback)
}

impl NotificationSettings {
    /// Stored fields over the defaults. Flags keep a stored `false`; an
    /// empty address falls back.
    pub fn from_blob(blob: Option<&Value>) -> Self {
        let d = Self::default();
        let blob = blob.filter(|v| v.is_object());
        Self {
            notifications_enabled: bool_or(blob, "notificationsEnabled", d.notifications_enabled),
            email_notifications: bool_or(blob, "emailNotifications", d.email_notifications),
            sms_notifications: bool_or(blob, "smsNotifications", d.sms_notifications),
            notification_email: text_or(blob, "notificationEmail", d.notification_email),
            notification_phone: text_or(blob, "notificationPhone", d.notification_phone),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nothing_stored_gives_defaults() {
        assert_eq!(
            NotificationSettings::from_blob(None),
            NotificationSettings::default()
        );
    }

    #[test]
    fn stored_fields_win_and_false_is_kept() {
        let blob = json!({
            "notificationsEnabled": false,
            "smsNotifications": true,
            "notificationEmail": "ops@farm.test",
            "notificationPhone": ""
        });
        let n = NotificationSettings::from_blob(Some(&blob));
        assert!(!n.notifications_enabled);
        assert!(n.email_notifications);
        assert!(n.sms_notifications);
        assert_eq!(n.notification_email, "ops@farm.test");
        assert_eq!(n.notification_phone, "+34600000000");
    }

    #[test]
    fn serializes_with_stored_field_names() {
        let v = serde_json::to_value(NotificationSettings::default()).unwrap();
        assert_eq!(v["notificationsEnabled"], true);
        assert_eq!(v["smsNotifications"], false);
        assert_eq!(v["notificationEmail"], "admin@ejemplo.com");
    }
}
