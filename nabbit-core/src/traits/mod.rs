//! Hardware abstraction traits
//!
//! These traits and value types define the interface between the robot
//! logic and device-specific implementations.

pub mod leds;
pub mod motor;

pub use leds::{Led, Rgb, RgbParseError, LED_COUNT};
pub use motor::{Direction, EarMotor, MotorError};
