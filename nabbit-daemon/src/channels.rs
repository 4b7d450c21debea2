//! Handoff from hardware drivers to the daemon
//!
//! Driver tasks and threads never touch daemon state. They post
//! [`HardwareEvent`]s on an unbounded channel drained by the hardware task.

use std::time::Instant;

use nabbit_core::button::ButtonEvent;
use nabbit_core::ears::EarId;
use nabbit_core::tag::TagSnapshot;
use tokio::sync::mpsc;

/// Event raised by a driver
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareEvent {
    /// Button edge or gesture, with its epoch timestamp
    Button(ButtonEvent, f64),
    /// An ear was moved by hand
    EarMoved(EarId),
    /// A tag was detected or removed
    Tag(TagSnapshot),
}

pub type HardwareSender = mpsc::UnboundedSender<HardwareEvent>;
pub type HardwareReceiver = mpsc::UnboundedReceiver<HardwareEvent>;

pub fn hardware_channel() -> (HardwareSender, HardwareReceiver) {
    mpsc::unbounded_channel()
}

/// Millisecond clock fed to the driver state machines
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Instant of a driver deadline
    pub fn instant_of(&self, ms: u64) -> tokio::time::Instant {
        tokio::time::Instant::from_std(self.start + std::time::Duration::from_millis(ms))
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
