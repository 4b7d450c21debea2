//! LEDs without a driver: colors are kept and logged

use nabbit_core::traits::{Led, Rgb, LED_COUNT};
use parking_lot::Mutex;
use tracing::debug;

use crate::capabilities::Leds;

#[derive(Debug, Default)]
pub struct LogLeds {
    colors: Mutex<[Rgb; LED_COUNT]>,
}

impl LogLeds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Leds for LogLeds {
    fn set(&self, led: Led, color: Rgb) {
        let mut colors = self.colors.lock();
        if colors[led.index()] != color {
            debug!("led {} = #{:02x}{:02x}{:02x}", led.as_str(), color.r, color.g, color.b);
            colors[led.index()] = color;
        }
    }

    fn pulse(&self, led: Led, color: Rgb) {
        debug!("led {} pulse #{:02x}{:02x}{:02x}", led.as_str(), color.r, color.g, color.b);
        self.colors.lock()[led.index()] = color;
    }

    fn colors(&self) -> [Rgb; LED_COUNT] {
        *self.colors.lock()
    }
}
