//! nabbitd service protocol
//!
//! Application daemons talk to nabbitd over TCP with one JSON object per
//! line:
//!
//! ```text
//! {"type":"command","request_id":"1","sequence":[{"audio":["a.mp3"]}]}\r\n
//! ```
//!
//! Every client object carries a `type`; most carry an optional
//! `request_id` that is echoed in the matching `response`. The daemon also
//! sends unsolicited `state` lines (to everyone) and `*_event` lines (to
//! subscribers).

#![deny(unsafe_code)]

pub mod events;
pub mod line;
pub mod messages;
pub mod packets;

pub use events::{event_matches, now_timestamp, EventMessage, RfidEvent, DEFAULT_INTERACTIVE_EVENTS};
pub use line::{decode_line, encode_line, DecodeError, LineParser, MAX_LINE_LEN};
pub use messages::{ErrorClass, GestaltHardware, Response, StateMessage, Status};
pub use packets::{
    Animation, Expiration, Mode, Packet, PacketError, Rejected, Request, SequenceItem,
};

/// Default TCP port
pub const PORT_NUMBER: u16 = 10543;
