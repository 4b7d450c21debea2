//! Daemon to client messages: responses and state broadcasts

use nabbit_core::state::RobotState;
use serde::Serialize;
use serde_json::{Map, Value};

/// Outcome of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
    Canceled,
    Expired,
    Failure,
    Timeout,
}

/// Error classes carried by `status: error` responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    MalformedPacket,
    UnknownPacket,
    NotCancelable,
    NotPlaying,
    AlreadyInInteractiveMode,
    UnicodeDecodeError,
    JsonDecodeError,
    NfcException,
    NfcWriteError,
}

impl ErrorClass {
    /// Wire name
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorClass::MalformedPacket => "MalformedPacket",
            ErrorClass::UnknownPacket => "UnknownPacket",
            ErrorClass::NotCancelable => "NotCancelable",
            ErrorClass::NotPlaying => "NotPlaying",
            ErrorClass::AlreadyInInteractiveMode => "AlreadyInInteractiveMode",
            ErrorClass::UnicodeDecodeError => "UnicodeDecodeError",
            ErrorClass::JsonDecodeError => "JSONDecodeError",
            ErrorClass::NfcException => "NFCException",
            ErrorClass::NfcWriteError => "NFCWriteError",
        }
    }
}

/// `{"type":"response", ...}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    #[serde(rename = "type")]
    kind: &'static str,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Additional slots (`uid`, gestalt fields)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Response {
    /// Response with the given status
    pub fn new(status: Status) -> Self {
        Self {
            kind: "response",
            status,
            request_id: None,
            class: None,
            message: None,
            extra: Map::new(),
        }
    }

    /// `status: ok`
    pub fn ok() -> Self {
        Self::new(Status::Ok)
    }

    /// `status: error` with a class and message
    pub fn error(class: impl Into<String>, message: impl Into<String>) -> Self {
        let mut response = Self::new(Status::Error);
        response.class = Some(class.into());
        response.message = Some(message.into());
        response
    }

    /// `MalformedPacket` error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::error(ErrorClass::MalformedPacket.as_str(), message)
    }

    /// Echo the request id of the original packet
    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    /// Attach a message without changing the status
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Add a slot
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// `{"type":"state","state":...}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    pub state: RobotState,
}

impl StateMessage {
    pub fn new(state: RobotState) -> Self {
        Self { kind: "state", state }
    }
}

/// Hardware part of a gestalt response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GestaltHardware {
    pub model: String,
    pub sound_card: String,
    pub sound_input: bool,
    pub rfid: bool,
    pub left_ear_status: String,
    pub right_ear_status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ok_response_shape() {
        let response = Response::ok().with_request_id(Some("42".into()));
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"type": "response", "status": "ok", "request_id": "42"})
        );
    }

    #[test]
    fn test_error_response_shape() {
        let response = Response::malformed("Missing mode slot");
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "type": "response",
                "status": "error",
                "class": "MalformedPacket",
                "message": "Missing mode slot"
            })
        );
    }

    #[test]
    fn test_extra_fields_are_flattened() {
        let response = Response::ok().with_field("uid", "d0:02");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["uid"], "d0:02");
    }

    #[test]
    fn test_state_message() {
        let value = serde_json::to_value(StateMessage::new(RobotState::Asleep)).unwrap();
        assert_eq!(value, json!({"type": "state", "state": "asleep"}));
    }
}
