//! Hardware capabilities
//!
//! One small interface per subsystem. Implementations are picked once at
//! startup ([`device`] or [`sim`]) and bundled in [`Hardware`]; nothing above
//! this module knows which one runs.

pub mod device;
pub mod rfid;
pub mod sim;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use nabbit_core::ears::{EarId, EarStatus};
use nabbit_core::tag::{TagTechnology, Uid};
use nabbit_core::traits::{Direction, Led, Rgb, LED_COUNT};

use crate::error::DeviceError;

pub use rfid::RfidHandle;

/// Two motorized ears
#[async_trait]
pub trait Ears: Send + Sync {
    /// Start an absolute move; returns before the ear arrives
    ///
    /// Positions `>= 17` add a full turn first.
    async fn go(&self, ear: EarId, position: u8, dir: Direction) -> Result<(), DeviceError>;

    /// Start a relative move; returns before the ear arrives
    async fn move_by(&self, ear: EarId, delta: u8, dir: Direction) -> Result<(), DeviceError>;

    /// Wait until both motors stopped
    async fn wait_while_running(&self);

    /// Positions, running a detection first for unknown ones
    async fn detect_positions(&self) -> (Option<u8>, Option<u8>);

    /// Positions without detection
    async fn positions(&self) -> (Option<u8>, Option<u8>);

    fn status(&self, ear: EarId) -> EarStatus;
}

/// The five RGB LEDs
pub trait Leds: Send + Sync {
    fn set(&self, led: Led, color: Rgb);

    fn set_all(&self, color: Rgb) {
        for led in Led::ALL {
            self.set(led, color);
        }
    }

    /// Slowly pulse one LED; the blending itself belongs to the strip
    fn pulse(&self, led: Led, color: Rgb);

    /// Current colors, indexed by [`Led::index`]
    fn colors(&self) -> [Rgb; LED_COUNT];
}

/// Audio output
#[async_trait]
pub trait Sound: Send + Sync {
    /// Start playing a file, stopping the current one
    async fn start(&self, file: &Path) -> Result<(), DeviceError>;

    /// Wait until the current file ended or was stopped
    async fn wait_until_done(&self);

    async fn stop(&self);

    fn sound_card(&self) -> String;

    fn has_input(&self) -> bool;
}

/// Tag reader
#[async_trait]
pub trait Rfid: Send + Sync {
    /// Write a formatted layout; resolves to whether the tag confirmed it
    ///
    /// The future never times out by itself; callers bound it and call
    /// [`Rfid::cancel_write`] when they give up.
    async fn write(
        &self,
        tech: TagTechnology,
        uid: &Uid,
        picture: u8,
        app: u8,
        data: &[u8],
    ) -> Result<bool, DeviceError>;

    fn cancel_write(&self);

    fn enable_polling(&self);

    fn disable_polling(&self);
}

/// Push button
pub trait Button: Send + Sync {
    fn is_pressed(&self) -> bool;
}

/// Capabilities of one robot
#[derive(Clone)]
pub struct Hardware {
    pub model: String,
    pub ears: Arc<dyn Ears>,
    pub leds: Arc<dyn Leds>,
    pub sound: Arc<dyn Sound>,
    pub rfid: Option<Arc<dyn Rfid>>,
    pub button: Option<Arc<dyn Button>>,
}
