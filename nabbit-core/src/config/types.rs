//! Configuration type definitions
//!
//! All durations are in milliseconds so the core never depends on a clock
//! type.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Encoder and notch timing for the ear controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EarTiming {
    /// Edges closer than this to the previous edge are contact bounce
    pub debounce_ms: u32,
    /// A gap between edges longer than this means the notch was passed
    pub notch_gap_ms: u32,
    /// Interval at which a quiet encoder is polled during detection
    pub quiet_poll_ms: u32,
    /// A running motor with no edge for this long is broken
    pub stall_timeout_ms: u32,
}

impl Default for EarTiming {
    fn default() -> Self {
        Self {
            debounce_ms: 20,
            notch_gap_ms: 400,
            quiet_poll_ms: 300,
            stall_timeout_ms: 2000,
        }
    }
}

/// Button click sequence timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ButtonTiming {
    /// Press held this long without release is a hold
    pub hold_ms: u32,
    /// Second press held this long is a click-and-hold
    pub click_and_hold_ms: u32,
    /// Release not followed by a press within this window is a click
    pub double_click_ms: u32,
    /// Second release not followed by a press within this window is a double click
    pub triple_click_ms: u32,
}

impl Default for ButtonTiming {
    fn default() -> Self {
        Self {
            hold_ms: 2000,
            click_and_hold_ms: 2000,
            double_click_ms: 150,
            triple_click_ms: 150,
        }
    }
}

/// Tag reader timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TagTiming {
    /// No UID within this window while polling means the tag was removed
    pub removal_window_ms: u32,
    /// Same window for the NFC reader, whose discovery loop is slower
    pub nfc_removal_window_ms: u32,
    /// Delay between consecutive block writes on the NFC reader
    pub block_write_delay_ms: u32,
    /// Default write timeout when the request does not carry one
    pub write_timeout_ms: u32,
}

impl Default for TagTiming {
    fn default() -> Self {
        Self {
            removal_window_ms: 1000,
            nfc_removal_window_ms: 1500,
            block_write_delay_ms: 7,
            write_timeout_ms: 20_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let ears = EarTiming::default();
        assert!(ears.notch_gap_ms > ears.quiet_poll_ms);
        assert!(ears.stall_timeout_ms > ears.notch_gap_ms);

        let button = ButtonTiming::default();
        assert_eq!(button.hold_ms, 2000);
        assert_eq!(button.double_click_ms, 150);

        assert_eq!(TagTiming::default().write_timeout_ms, 20_000);
    }
}
