//! Simulated LED strip

use nabbit_core::traits::{Led, Rgb, LED_COUNT};
use parking_lot::Mutex;
use tracing::trace;

use crate::capabilities::Leds;

#[derive(Debug, Clone, Copy, Default)]
struct Strip {
    colors: [Rgb; LED_COUNT],
    pulsing: [bool; LED_COUNT],
}

/// LEDs kept in memory
#[derive(Debug, Default)]
pub struct SimLeds {
    strip: Mutex<Strip>,
}

impl SimLeds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if `led` was last set with [`Leds::pulse`]
    pub fn is_pulsing(&self, led: Led) -> bool {
        self.strip.lock().pulsing[led.index()]
    }
}

impl Leds for SimLeds {
    fn set(&self, led: Led, color: Rgb) {
        trace!("led {} = {:?}", led.as_str(), color);
        let mut strip = self.strip.lock();
        strip.colors[led.index()] = color;
        strip.pulsing[led.index()] = false;
    }

    fn pulse(&self, led: Led, color: Rgb) {
        trace!("led {} pulsing {:?}", led.as_str(), color);
        let mut strip = self.strip.lock();
        strip.colors[led.index()] = color;
        strip.pulsing[led.index()] = true;
    }

    fn colors(&self) -> [Rgb; LED_COUNT] {
        self.strip.lock().colors
    }
}
