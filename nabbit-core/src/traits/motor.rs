//! Ear motor driver trait
//!
//! Each ear is a DC motor that can turn either way. The controller only
//! ever switches it on in one direction or off; speed is fixed.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Motor rotation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Direction {
    /// Increasing encoder position
    #[default]
    Forward,
    /// Decreasing encoder position
    Backward,
}

impl Direction {
    /// Get the opposite direction
    pub fn opposite(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    /// Direction encoded in choreographies and ear device commands
    ///
    /// `0` is forward, anything else backward.
    pub fn from_wire(value: u8) -> Self {
        if value == 0 {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }

    /// Signed step for one encoder edge
    pub fn step(self) -> i8 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

/// Errors that can occur with ear motor operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotorError {
    /// The motor produced no encoder edge within the notch window
    Broken,
    /// The output pins could not be driven
    Output,
}

impl core::fmt::Display for MotorError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MotorError::Broken => f.write_str("ear motor is broken"),
            MotorError::Output => f.write_str("ear motor output failed"),
        }
    }
}

/// Trait for a bidirectional ear motor
///
/// Implementations must never energize both directions at once: `run`
/// releases the opposite direction before driving the requested one.
pub trait EarMotor {
    /// Start turning in the given direction
    fn run(&mut self, dir: Direction) -> Result<(), MotorError>;

    /// Stop the motor
    fn stop(&mut self) -> Result<(), MotorError>;

    /// Direction currently driven, if running
    fn running(&self) -> Option<Direction>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_wire() {
        assert_eq!(Direction::from_wire(0), Direction::Forward);
        assert_eq!(Direction::from_wire(1), Direction::Backward);
        assert_eq!(Direction::from_wire(7), Direction::Backward);
        assert_eq!(Direction::Backward.step(), -1);
        assert_eq!(Direction::Forward.opposite(), Direction::Backward);
    }
}
