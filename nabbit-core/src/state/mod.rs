//! Robot state machine
//!
//! Defines the single authoritative state of the robot. The state machine is
//! explicit, finite and deterministic; the daemon is its only caller.

pub mod events;
pub mod machine;

pub use events::Event;
pub use machine::RobotState;
