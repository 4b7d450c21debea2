//! Client packets and their validation
//!
//! A decoded line becomes a [`Request`]: the optional `request_id` plus a
//! typed [`Packet`]. Validation failures become a [`Rejected`] carrying the
//! request id, so the reply can still be matched by the client.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use nabbit_core::tag::{app_id, TagTechnology, Uid};
use nabbit_core::traits::{Led, Rgb, LED_COUNT};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::messages::{ErrorClass, Response};

/// Why a packet was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// A required slot is missing or has the wrong type
    #[error("{0}")]
    Malformed(String),
    /// Unrecognized packet type or mode
    #[error("{0}")]
    Unknown(String),
}

impl PacketError {
    fn malformed(message: impl Into<String>) -> Self {
        PacketError::Malformed(message.into())
    }

    /// Error class reported to the client
    pub fn class(&self) -> ErrorClass {
        match self {
            PacketError::Malformed(_) => ErrorClass::MalformedPacket,
            PacketError::Unknown(_) => ErrorClass::UnknownPacket,
        }
    }
}

/// A refused packet, with the request id to echo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    pub request_id: Option<String>,
    pub error: PacketError,
}

impl Rejected {
    /// Error response for the client
    pub fn response(&self) -> Response {
        Response::error(self.error.class().as_str(), self.error.to_string())
            .with_request_id(self.request_id.clone())
    }
}

/// Ambient LED animation shown while idle
#[derive(Debug, Clone, PartialEq)]
pub struct Animation {
    /// Frame length in hundredths of a second
    pub tempo: f64,
    /// Frames, indexed by [`Led::index`]
    pub colors: Vec<[Rgb; LED_COUNT]>,
}

/// One step of a command: audio files and/or a choreography
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SequenceItem {
    pub audio: Vec<String>,
    pub choreography: Option<String>,
}

/// Instant after which a queued request is answered `expired`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Expiration(DateTime<Utc>);

impl Expiration {
    /// Parse an ISO-8601 timestamp; without an offset it is local time
    pub fn parse(s: &str) -> Option<Self> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(Expiration(dt.with_timezone(&Utc)));
        }
        const NAIVE_FORMATS: [&str; 4] = [
            "%Y-%m-%dT%H:%M:%S%.f",
            "%Y-%m-%dT%H:%M",
            "%Y-%m-%d %H:%M:%S%.f",
            "%Y-%m-%d %H:%M",
        ];
        NAIVE_FORMATS.iter().find_map(|fmt| {
            let naive = NaiveDateTime::parse_from_str(s, fmt).ok()?;
            let local = Local.from_local_datetime(&naive).earliest()?;
            Some(Expiration(local.with_timezone(&Utc)))
        })
    }

    pub fn at(instant: DateTime<Utc>) -> Self {
        Expiration(instant)
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.0
    }

    /// Check against the current time
    pub fn is_past(&self) -> bool {
        self.0 < Utc::now()
    }
}

/// Target of a `mode` packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Interactive,
}

/// A validated client packet
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Info {
        info_id: String,
        /// `None` removes the animation
        animation: Option<Animation>,
    },
    Ears {
        left: Option<u8>,
        right: Option<u8>,
        event: bool,
    },
    Command {
        sequence: Vec<SequenceItem>,
        expiration: Option<Expiration>,
        cancelable: bool,
    },
    Message {
        signature: Option<SequenceItem>,
        body: Vec<SequenceItem>,
        expiration: Option<Expiration>,
        cancelable: bool,
    },
    Cancel,
    Wakeup,
    Sleep,
    Mode {
        mode: Mode,
        events: Option<Vec<String>>,
    },
    Gestalt,
    Test {
        test: String,
    },
    RfidWrite {
        tech: TagTechnology,
        uid: Uid,
        picture: u8,
        app: u8,
        data: Option<String>,
        /// Seconds
        timeout: Option<f64>,
    },
    ConfigUpdate {
        service: String,
        slot: Option<String>,
    },
    Shutdown {
        reboot: bool,
    },
}

impl Packet {
    /// Wire type name
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Info { .. } => "info",
            Packet::Ears { .. } => "ears",
            Packet::Command { .. } => "command",
            Packet::Message { .. } => "message",
            Packet::Cancel => "cancel",
            Packet::Wakeup => "wakeup",
            Packet::Sleep => "sleep",
            Packet::Mode { .. } => "mode",
            Packet::Gestalt => "gestalt",
            Packet::Test { .. } => "test",
            Packet::RfidWrite { .. } => "rfid_write",
            Packet::ConfigUpdate { .. } => "config-update",
            Packet::Shutdown { .. } => "shutdown",
        }
    }

    /// Expiration of playback packets
    pub fn expiration(&self) -> Option<Expiration> {
        match self {
            Packet::Command { expiration, .. } | Packet::Message { expiration, .. } => *expiration,
            _ => None,
        }
    }

    /// Whether a button click or `cancel` may interrupt this packet
    pub fn cancelable(&self) -> bool {
        match self {
            Packet::Command { cancelable, .. } | Packet::Message { cancelable, .. } => *cancelable,
            _ => false,
        }
    }
}

/// A packet with the id its reply must carry
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub request_id: Option<String>,
    pub packet: Packet,
}

impl Request {
    /// Validate a decoded JSON line
    pub fn from_value(value: Value) -> Result<Request, Rejected> {
        let Value::Object(slots) = value else {
            return Err(Rejected {
                request_id: None,
                error: PacketError::malformed("Missing type slot"),
            });
        };
        let request_id = match slots.get("request_id") {
            Some(Value::String(id)) => Some(id.clone()),
            _ => None,
        };
        let reject = |error| Rejected {
            request_id: request_id.clone(),
            error,
        };

        let kind = match slots.get("type") {
            Some(Value::String(kind)) => kind.as_str(),
            Some(other) => {
                return Err(reject(PacketError::Unknown(format!(
                    "Packet of unknown type ({})",
                    other
                ))))
            }
            None => return Err(reject(PacketError::malformed("Missing type slot"))),
        };
        if slots.get("request_id").is_some_and(|id| !id.is_string()) {
            return Err(reject(PacketError::malformed(
                "Invalid request_id slot, expected a string",
            )));
        }

        let packet = match kind {
            "info" => parse_info(&slots),
            "ears" => parse_ears(&slots),
            "command" => parse_command(&slots),
            "message" => parse_message(&slots),
            "cancel" if request_id.is_some() => Ok(Packet::Cancel),
            "cancel" => Err(PacketError::malformed("Missing required request_id slot")),
            "wakeup" => Ok(Packet::Wakeup),
            "sleep" => Ok(Packet::Sleep),
            "mode" => parse_mode(&slots),
            "gestalt" => Ok(Packet::Gestalt),
            "test" => match slots.get("test") {
                Some(Value::String(test)) => Ok(Packet::Test { test: test.clone() }),
                _ => Err(PacketError::malformed("Test packet with missing test slot")),
            },
            "rfid_write" => parse_rfid_write(&slots),
            "config-update" => parse_config_update(&slots),
            "shutdown" => Ok(Packet::Shutdown {
                reboot: slots.get("mode").and_then(Value::as_str) == Some("reboot"),
            }),
            other => Err(PacketError::Unknown(format!(
                "Packet of unknown type ({})",
                other
            ))),
        };

        packet
            .map(|packet| Request {
                request_id: request_id.clone(),
                packet,
            })
            .map_err(reject)
    }
}

fn parse_info(slots: &Map<String, Value>) -> Result<Packet, PacketError> {
    let info_id = match slots.get("info_id") {
        Some(Value::String(id)) => id.clone(),
        Some(_) => return Err(PacketError::malformed("Invalid info_id slot, expected a string")),
        None => return Err(PacketError::malformed("Missing required info_id slot")),
    };
    let animation = match slots.get("animation") {
        None | Some(Value::Null) => None,
        Some(Value::Object(animation)) => Some(parse_animation(animation)?),
        Some(_) => return Err(PacketError::malformed("Invalid animation slot, expected a dict")),
    };
    Ok(Packet::Info { info_id, animation })
}

fn parse_animation(animation: &Map<String, Value>) -> Result<Animation, PacketError> {
    let tempo = match animation.get("tempo") {
        Some(tempo) => tempo.as_f64().ok_or_else(|| {
            PacketError::malformed("Invalid tempo slot in animation, expected a number")
        })?,
        None => return Err(PacketError::malformed("Missing required tempo slot in animation")),
    };
    let frames = match animation.get("colors") {
        Some(Value::Array(frames)) => frames,
        Some(_) => return Err(PacketError::malformed("Invalid colors slot in animation")),
        None => return Err(PacketError::malformed("Missing required colors slot in animation")),
    };
    let colors = frames
        .iter()
        .map(parse_frame)
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| PacketError::malformed("Invalid colors slot in animation"))?;
    Ok(Animation { tempo, colors })
}

/// `{"left":"ff0000","nose":"00ff00"}`; absent slots are off
fn parse_frame(frame: &Value) -> Option<[Rgb; LED_COUNT]> {
    let frame = frame.as_object()?;
    let mut colors = [Rgb::OFF; LED_COUNT];
    for led in Led::ALL {
        if let Some(color) = frame.get(led.as_str()) {
            colors[led.index()] = Rgb::parse_hex(color.as_str()?).ok()?;
        }
    }
    Some(colors)
}

fn parse_ears(slots: &Map<String, Value>) -> Result<Packet, PacketError> {
    let position = |slot: &str| match slots.get(slot) {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|pos| u8::try_from(pos).ok())
            .map(Some)
            .ok_or_else(|| PacketError::Malformed(format!("Invalid {} slot, expected an int", slot))),
    };
    let left = position("left")?;
    let right = position("right")?;
    let event = match slots.get("event") {
        None => false,
        Some(Value::Bool(event)) => *event,
        Some(_) => return Err(PacketError::malformed("Invalid event slot, expected a bool")),
    };
    Ok(Packet::Ears { left, right, event })
}

fn parse_item(item: &Value) -> Option<SequenceItem> {
    let item = item.as_object()?;
    let audio = match item.get("audio") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(file)) => vec![file.clone()],
        Some(Value::Array(files)) => files
            .iter()
            .map(|f| f.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()?,
        Some(_) => return None,
    };
    let choreography = match item.get("choreography") {
        None | Some(Value::Null) => None,
        Some(Value::String(chor)) => Some(chor.clone()),
        Some(_) => return None,
    };
    Some(SequenceItem { audio, choreography })
}

/// A list of items, or a single item
fn parse_sequence(slot: &str, value: &Value) -> Result<Vec<SequenceItem>, PacketError> {
    let items = match value {
        Value::Array(items) => items.iter().map(parse_item).collect::<Option<Vec<_>>>(),
        Value::Object(_) => parse_item(value).map(|item| vec![item]),
        _ => None,
    };
    items.ok_or_else(|| PacketError::Malformed(format!("Invalid {} slot", slot)))
}

fn parse_playback_options(
    slots: &Map<String, Value>,
) -> Result<(Option<Expiration>, bool), PacketError> {
    let expiration = match slots.get("expiration") {
        None | Some(Value::Null) => None,
        Some(Value::String(date)) => Some(
            Expiration::parse(date)
                .ok_or_else(|| PacketError::malformed("Invalid expiration slot"))?,
        ),
        Some(_) => return Err(PacketError::malformed("Invalid expiration slot")),
    };
    let cancelable = match slots.get("cancelable") {
        None => true,
        Some(Value::Bool(cancelable)) => *cancelable,
        Some(_) => return Err(PacketError::malformed("Invalid cancelable slot, expected a bool")),
    };
    Ok((expiration, cancelable))
}

fn parse_command(slots: &Map<String, Value>) -> Result<Packet, PacketError> {
    let sequence = slots
        .get("sequence")
        .ok_or_else(|| PacketError::malformed("Missing required sequence slot"))?;
    let sequence = parse_sequence("sequence", sequence)?;
    let (expiration, cancelable) = parse_playback_options(slots)?;
    Ok(Packet::Command {
        sequence,
        expiration,
        cancelable,
    })
}

fn parse_message(slots: &Map<String, Value>) -> Result<Packet, PacketError> {
    let body = slots
        .get("body")
        .ok_or_else(|| PacketError::malformed("Missing required body slot"))?;
    let body = parse_sequence("body", body)?;
    let signature = match slots.get("signature") {
        None | Some(Value::Null) => None,
        Some(signature) => Some(
            parse_item(signature).ok_or_else(|| PacketError::malformed("Invalid signature slot"))?,
        ),
    };
    let (expiration, cancelable) = parse_playback_options(slots)?;
    Ok(Packet::Message {
        signature,
        body,
        expiration,
        cancelable,
    })
}

fn parse_mode(slots: &Map<String, Value>) -> Result<Packet, PacketError> {
    let mode = match slots.get("mode").and_then(Value::as_str) {
        Some("idle") => Mode::Idle,
        Some("interactive") => Mode::Interactive,
        Some(_) => return Err(PacketError::Unknown("Mode packet with unknown mode slot".into())),
        None => return Err(PacketError::malformed("Missing mode slot")),
    };
    let events = match slots.get("events") {
        None | Some(Value::Null) => None,
        Some(Value::Array(events)) => Some(
            events
                .iter()
                .map(|e| e.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| PacketError::malformed("Invalid events slot, expected a list of strings"))?,
        ),
        Some(_) => {
            return Err(PacketError::malformed(
                "Invalid events slot, expected a list of strings",
            ))
        }
    };
    Ok(Packet::Mode { mode, events })
}

fn parse_rfid_write(slots: &Map<String, Value>) -> Result<Packet, PacketError> {
    let invalid = || PacketError::malformed("rfid_write packet with missing or invalid slots");
    let tech = slots
        .get("tech")
        .and_then(Value::as_str)
        .and_then(TagTechnology::from_name)
        .ok_or_else(invalid)?;
    let uid = slots
        .get("uid")
        .and_then(Value::as_str)
        .and_then(|uid| Uid::parse(uid).ok())
        .ok_or_else(invalid)?;
    let picture = slots
        .get("picture")
        .and_then(Value::as_u64)
        .and_then(|p| u8::try_from(p).ok())
        .ok_or_else(invalid)?;
    let app = match slots.get("app") {
        Some(Value::String(name)) => app_id(name),
        Some(Value::Number(id)) => id
            .as_u64()
            .and_then(|id| u8::try_from(id).ok())
            .ok_or_else(invalid)?,
        _ => return Err(invalid()),
    };
    let data = match slots.get("data") {
        None | Some(Value::Null) => None,
        Some(Value::String(data)) => Some(data.clone()),
        Some(_) => return Err(invalid()),
    };
    let timeout = match slots.get("timeout") {
        None | Some(Value::Null) => None,
        Some(timeout) => Some(timeout.as_f64().filter(|t| *t >= 0.0).ok_or_else(invalid)?),
    };
    Ok(Packet::RfidWrite {
        tech,
        uid,
        picture,
        app,
        data,
        timeout,
    })
}

fn parse_config_update(slots: &Map<String, Value>) -> Result<Packet, PacketError> {
    let service = slots
        .get("service")
        .and_then(Value::as_str)
        .ok_or_else(|| PacketError::malformed("Config update packet with missing service slot"))?;
    Ok(Packet::ConfigUpdate {
        service: service.to_string(),
        slot: slots.get("slot").and_then(Value::as_str).map(str::to_string),
    })
}
