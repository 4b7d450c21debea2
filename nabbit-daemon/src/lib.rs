//! nabbitd
//!
//! Serves a Nabaztag-style rabbit to application daemons: ears, LEDs,
//! sound, tag reader and button behind a line-delimited JSON protocol.
//!
//! - [`capabilities`]: per-subsystem interfaces with device and simulated
//!   backends
//! - [`nabio`]: robot-level actions and the choreography player
//! - [`controller`] and [`daemon`]: state, queue and client coordination
//! - [`tasks`]: service, drain, hardware and signal tasks

pub mod app;
pub mod capabilities;
pub mod channels;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod error;
pub mod nabio;
pub mod pidfile;
pub mod resources;
pub mod tasks;

pub use app::App;
pub use daemon::Nabbitd;
