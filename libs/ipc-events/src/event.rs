//! The wire schema carried by every IPC frame: a `name` plus an optional,
//! sparsely-populated `data` payload.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EventData>,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: None,
        }
    }

    pub fn with_data(name: impl Into<String>, data: EventData) -> Self {
        Self {
            name: name.into(),
            data: Some(data),
        }
    }
}

/// Every field is optional; absence means "not carried by this event", not
/// a default value. Readers must tolerate any subset being present.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "reportDeviceName")]
    pub report_device_name: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "checkUpdates")]
    pub check_updates: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "updateChannel")]
    pub update_channel: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_fields_round_trip_as_absent() {
        let event = Event::new("status");
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"name":"status"}"#);
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn populated_fields_round_trip() {
        let event = Event::with_data(
            "status",
            EventData {
                enabled: Some(true),
                ..Default::default()
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"name":"status","data":{"enabled":true}}"#);
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn deserializing_tolerates_missing_optional_fields() {
        let event: Event = serde_json::from_str(r#"{"name":"configuration","data":{"configuration":"abc"}}"#).unwrap();
        assert_eq!(event.data.unwrap().report_device_name, None);
    }
}
