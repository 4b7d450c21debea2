//! Unsolicited hardware events and subscription masks

use chrono::Utc;
use nabbit_core::button::ButtonEvent;
use nabbit_core::ears::EarId;
use nabbit_core::tag::{app_name, TagFlags, TagSnapshot, APP_NONE};
use serde::Serialize;

/// Event categories a connection listens to by default in interactive mode
pub const DEFAULT_INTERACTIVE_EVENTS: [&str; 2] = ["ears", "button"];

/// Seconds since the epoch, as carried in the `time` slot
pub fn now_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Check a category such as `rfid/nabweatherd` against a subscription mask
///
/// Matches the category itself or its `prefix/*` wildcard.
pub fn event_matches<S: AsRef<str>>(category: &str, mask: &[S]) -> bool {
    if mask.iter().any(|m| m.as_ref() == category) {
        return true;
    }
    match category.split_once('/') {
        Some((prefix, _)) => mask.iter().any(|m| {
            m.as_ref()
                .strip_suffix("/*")
                .is_some_and(|p| p == prefix)
        }),
        None => false,
    }
}

/// `rfid_event` payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RfidEvent {
    pub tech: &'static str,
    pub uid: String,
    /// `detected` or `removed`
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub support: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    pub time: f64,
}

impl RfidEvent {
    /// Build the event reported for a reader callback
    pub fn from_snapshot(snapshot: &TagSnapshot, time: f64) -> Self {
        let removed = snapshot.flags.contains(TagFlags::REMOVED);
        let (support, locked) = if removed {
            (None, None)
        } else {
            let locked = snapshot.flags.contains(TagFlags::READONLY).then_some(true);
            (Some(snapshot.flags.support().as_str()), locked)
        };

        let (app, data) = match snapshot.app {
            Some(id) if id != APP_NONE => {
                let name = app_name(id)
                    .map(str::to_string)
                    .unwrap_or_else(|| id.to_string());
                let data = snapshot
                    .data_text()
                    .map(|bytes| String::from_utf8_lossy(bytes).into_owned());
                (Some(name), data)
            }
            _ => (None, None),
        };

        Self {
            tech: snapshot.tech.as_str(),
            uid: snapshot.uid.to_string(),
            event: if removed { "removed" } else { "detected" },
            support,
            locked,
            picture: snapshot.picture,
            app,
            data,
            time,
        }
    }

    /// `rfid/<app>` for tags carrying an application, `rfid/*` otherwise
    pub fn category(&self) -> String {
        match &self.app {
            Some(app) => format!("rfid/{}", app),
            None => "rfid/*".to_string(),
        }
    }
}

/// Event line sent to subscribed connections
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventMessage {
    ButtonEvent { event: &'static str, time: f64 },
    EarsEvent { left: u8, right: u8, time: f64 },
    /// Sent to the interactive owner while the user moves an ear
    EarEvent { ear: &'static str, time: f64 },
    RfidEvent(RfidEvent),
}

impl EventMessage {
    pub fn button(event: ButtonEvent, time: f64) -> Self {
        EventMessage::ButtonEvent {
            event: event.as_str(),
            time,
        }
    }

    pub fn ears(left: u8, right: u8, time: f64) -> Self {
        EventMessage::EarsEvent { left, right, time }
    }

    pub fn ear(ear: EarId, time: f64) -> Self {
        EventMessage::EarEvent {
            ear: ear.as_str(),
            time,
        }
    }

    /// Subscription category
    pub fn category(&self) -> String {
        match self {
            EventMessage::ButtonEvent { .. } => "button".to_string(),
            EventMessage::EarsEvent { .. } | EventMessage::EarEvent { .. } => "ears".to_string(),
            EventMessage::RfidEvent(event) => event.category(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nabbit_core::tag::{TagTechnology, Uid};
    use serde_json::json;

    fn snapshot(app: Option<u8>, data: &[u8], flags: TagFlags) -> TagSnapshot {
        TagSnapshot {
            tech: TagTechnology::St25tb,
            uid: Uid::from_be(&[0xd0, 0x02, 0x1a, 0x05]),
            picture: Some(3),
            app,
            data: Some(heapless::Vec::from_slice(data).unwrap()),
            flags,
        }
    }

    #[test]
    fn test_event_matches_exact_and_wildcard() {
        let mask = ["button", "rfid/*"];
        assert!(event_matches("button", &mask));
        assert!(event_matches("rfid/nabweatherd", &mask));
        assert!(event_matches("rfid/*", &mask));
        assert!(!event_matches("ears", &mask));
        assert!(!event_matches("asr/fr", &mask));
    }

    #[test]
    fn test_event_matches_specific_app_only() {
        let mask = vec!["rfid/nabclockd".to_string()];
        assert!(event_matches("rfid/nabclockd", &mask));
        assert!(!event_matches("rfid/nabweatherd", &mask));
        assert!(!event_matches("rfid/*", &mask));
    }

    #[test]
    fn test_detected_formatted_tag() {
        let tag = snapshot(Some(9), b"paris\xff\xff", TagFlags::FORMATTED);
        let event = RfidEvent::from_snapshot(&tag, 1.5);
        assert_eq!(event.category(), "rfid/nabweatherd");
        assert_eq!(
            serde_json::to_value(EventMessage::RfidEvent(event)).unwrap(),
            json!({
                "type": "rfid_event",
                "tech": "st25tb",
                "uid": "d0:02:1a:05",
                "event": "detected",
                "support": "formatted",
                "picture": 3,
                "app": "nabweatherd",
                "data": "paris",
                "time": 1.5
            })
        );
    }

    #[test]
    fn test_locked_foreign_tag_has_no_app() {
        let mut tag = snapshot(None, b"", TagFlags::FOREIGN_DATA | TagFlags::READONLY);
        tag.picture = None;
        let event = RfidEvent::from_snapshot(&tag, 0.0);
        assert_eq!(event.support, Some("foreign-data"));
        assert_eq!(event.locked, Some(true));
        assert_eq!(event.category(), "rfid/*");
    }

    #[test]
    fn test_unnamed_app_uses_decimal_category() {
        let tag = snapshot(Some(42), b"", TagFlags::FORMATTED);
        assert_eq!(RfidEvent::from_snapshot(&tag, 0.0).category(), "rfid/42");
    }

    #[test]
    fn test_removed_event_keeps_app() {
        let tag = snapshot(Some(5), b"", TagFlags::FORMATTED).removed();
        let event = RfidEvent::from_snapshot(&tag, 0.0);
        assert_eq!(event.event, "removed");
        assert_eq!(event.support, None);
        assert_eq!(event.category(), "rfid/nabclockd");
    }

    #[test]
    fn test_button_event_shape() {
        let msg = EventMessage::button(ButtonEvent::DoubleClick, 2.0);
        assert_eq!(msg.category(), "button");
        assert_eq!(
            serde_json::to_value(msg).unwrap(),
            json!({"type": "button_event", "event": "double_click", "time": 2.0})
        );
    }

    #[test]
    fn test_ear_event_category() {
        let msg = EventMessage::ear(EarId::Right, 0.0);
        assert_eq!(msg.category(), "ears");
        assert_eq!(serde_json::to_value(msg).unwrap()["ear"], "right");
    }
}
