//! Robot hardware through kernel character devices
//!
//! Ears and the CR14 reader have kernel drivers. The LED strip and the
//! button have none this daemon can use: LEDs are only logged and the
//! button is absent.

pub mod ears;
pub mod leds;
pub mod rfid;
pub mod sound;

use std::sync::Arc;

use tracing::{info, warn};

pub use ears::DeviceEars;
pub use leds::LogLeds;
pub use rfid::open_cr14;
pub use sound::ProcessSound;

use super::{Hardware, Rfid};
use crate::channels::{Clock, HardwareSender};
use crate::config::{HardwareConfig, RfidChip};
use crate::error::DeviceError;

/// Open the devices
///
/// A missing or broken tag reader is logged and left out; ears are required.
pub fn start(config: &HardwareConfig, events: HardwareSender, clock: Clock) -> Result<Hardware, DeviceError> {
    let ears = DeviceEars::open(&config.ear_devices, events.clone())?;

    let rfid = match (&config.rfid_device, config.rfid_chip) {
        (None, _) => None,
        (Some(path), RfidChip::Cr14) => match open_cr14(path, &config.tags, events, clock) {
            Ok(handle) => Some(Arc::new(handle) as Arc<dyn Rfid>),
            Err(e) => {
                warn!("No tag reader on {}: {}", path.display(), e);
                None
            }
        },
        (Some(path), RfidChip::St25r391x) => {
            warn!(
                "No character device framing for the ST25R391x ({}), tag reader disabled",
                path.display()
            );
            None
        }
    };

    let sound = ProcessSound::new(
        config.sound_player.clone(),
        config.sound_card.clone(),
        config.sound_input,
    )?;
    info!("Hardware model {}", config.model);

    Ok(Hardware {
        model: config.model.clone(),
        ears: Arc::new(ears),
        leds: Arc::new(LogLeds::new()),
        sound: Arc::new(sound),
        rfid,
        button: None,
    })
}
