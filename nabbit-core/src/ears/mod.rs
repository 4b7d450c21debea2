//! Closed-loop ear position control
//!
//! Each ear is a motor arm on a ring with [`STEPS`] encoder holes, one of
//! which is missing. Position is only known by counting encoder edges and
//! is lost at boot or when someone moves the ear by hand; the missing hole
//! (the notch) is how it is found again.

pub mod axis;
pub mod detect;

pub use axis::{AxisEvent, EarAxis, EarError};
pub use detect::NotchDetector;

/// Encoder holes per revolution
pub const STEPS: u8 = 17;

/// Ear identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EarId {
    Left = 0,
    Right = 1,
}

impl EarId {
    /// Both ears in index order
    pub const BOTH: [EarId; 2] = [EarId::Left, EarId::Right];

    /// Ear from its index in choreographies and device names
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(EarId::Left),
            1 => Some(EarId::Right),
            _ => None,
        }
    }

    /// Index of the ear
    pub fn index(self) -> usize {
        self as usize
    }

    /// Wire name of the ear
    pub const fn as_str(self) -> &'static str {
        match self {
            EarId::Left => "left",
            EarId::Right => "right",
        }
    }
}

/// Health of one ear as reported by diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EarStatus {
    /// No encoder edge within the notch window; motor disconnected or jammed
    Broken,
    /// Working, position unknown until the next detection
    Unknown,
    /// Working, at the given position
    At(u8),
}

impl core::fmt::Display for EarStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EarStatus::Broken => f.write_str("broken"),
            EarStatus::Unknown => f.write_str("ok (position unknown)"),
            EarStatus::At(pos) => write!(f, "ok (position={})", pos),
        }
    }
}

/// Reduce any step count to a position on the ring
pub fn wrap(position: i32) -> u8 {
    position.rem_euclid(STEPS as i32) as u8
}
