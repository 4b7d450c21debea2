//! Simulated robot
//!
//! Runs the real drivers against in-memory hardware so the whole daemon
//! works on a development machine. [`SimControls`] exposes the hands that
//! move ears, press the button and lay tags on the reader.

pub mod button;
pub mod ears;
pub mod leds;
pub mod rfid;
pub mod sound;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

pub use button::{run_button, SimButton, SimButtonPin};
pub use ears::SimEars;
pub use leds::SimLeds;
pub use rfid::{spawn_sim_reader, SimTag, TagField};
pub use sound::SimSound;

use super::{Hardware, Rfid};
use crate::channels::{Clock, HardwareSender};
use crate::config::HardwareConfig;
use crate::error::DeviceError;

/// Handles on the simulated hardware
#[derive(Clone)]
pub struct SimControls {
    pub ears: Arc<SimEars>,
    pub leds: Arc<SimLeds>,
    pub sound: SimSound,
    pub button: SimButton,
    /// Absent when the simulated robot has no reader
    pub tags: Option<Arc<TagField>>,
}

/// Build the simulated robot and start its tasks
pub fn start(
    config: &HardwareConfig,
    events: HardwareSender,
    clock: Clock,
) -> Result<(Hardware, SimControls), DeviceError> {
    let sim = &config.simulation;
    info!(
        "Simulated hardware: tick={}ms sound={}ms rfid={}",
        sim.tick_ms, sim.sound_ms, sim.rfid
    );

    let ears = Arc::new(SimEars::new(config.ears, events.clone())?);
    tokio::spawn(ears.clone().run(Duration::from_millis(sim.tick_ms as u64)));

    let leds = Arc::new(SimLeds::new());
    let sound = SimSound::new(
        Duration::from_millis(sim.sound_ms as u64),
        &config.sound_card,
        config.sound_input,
    );

    let (button, pin) = SimButton::new();
    tokio::spawn(run_button(pin, false, config.button, events.clone(), clock));

    let (rfid, tags) = if sim.rfid {
        let field = Arc::new(TagField::new());
        let handle = spawn_sim_reader(
            config.rfid_chip,
            &config.tags,
            field.clone(),
            Duration::from_millis(sim.tag_poll_ms as u64),
            events,
            clock,
        );
        (Some(Arc::new(handle) as Arc<dyn Rfid>), Some(field))
    } else {
        (None, None)
    };

    let hardware = Hardware {
        model: config.model.clone(),
        ears: ears.clone(),
        leds: leds.clone(),
        sound: Arc::new(sound.clone()),
        rfid,
        button: Some(Arc::new(button.clone())),
    };
    let controls = SimControls {
        ears,
        leds,
        sound,
        button,
        tags,
    };
    Ok((hardware, controls))
}
