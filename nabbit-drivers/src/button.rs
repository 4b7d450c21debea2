//! Button edge source
//!
//! Waits for pin edges and reports press/release transitions. Glitches
//! that leave the level unchanged are swallowed.

use embedded_hal::digital::InputPin;
use embedded_hal_async::digital::Wait;

/// Push-button on an input pin
pub struct ButtonInput<P> {
    pin: P,
    active_low: bool,
    pressed: bool,
}

impl<P: InputPin + Wait> ButtonInput<P> {
    /// # Arguments
    /// - `pin`: input pin with edge interrupts
    /// - `active_low`: pressed reads low (pull-up wiring)
    pub fn new(pin: P, active_low: bool) -> Self {
        Self {
            pin,
            active_low,
            pressed: false,
        }
    }

    /// Last reported state
    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    /// Wait for the next press (`true`) or release (`false`)
    pub async fn next_edge(&mut self) -> Result<bool, P::Error> {
        loop {
            self.pin.wait_for_any_edge().await?;
            let pressed = self.pin.is_high()? != self.active_low;
            if pressed != self.pressed {
                self.pressed = pressed;
                return Ok(pressed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embassy_futures::block_on;
    use embedded_hal::digital::ErrorType;
    use std::collections::VecDeque;

    /// Pin whose level changes to the next scripted value on every edge
    struct ScriptedPin {
        levels: VecDeque<bool>,
        level: bool,
    }

    impl ScriptedPin {
        fn new(levels: &[bool]) -> Self {
            Self {
                levels: levels.iter().copied().collect(),
                level: true,
            }
        }
    }

    impl ErrorType for ScriptedPin {
        type Error = Infallible;
    }

    impl InputPin for ScriptedPin {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            Ok(self.level)
        }

        fn is_low(&mut self) -> Result<bool, Infallible> {
            Ok(!self.level)
        }
    }

    impl Wait for ScriptedPin {
        async fn wait_for_high(&mut self) -> Result<(), Infallible> {
            Ok(())
        }

        async fn wait_for_low(&mut self) -> Result<(), Infallible> {
            Ok(())
        }

        async fn wait_for_rising_edge(&mut self) -> Result<(), Infallible> {
            self.wait_for_any_edge().await
        }

        async fn wait_for_falling_edge(&mut self) -> Result<(), Infallible> {
            self.wait_for_any_edge().await
        }

        async fn wait_for_any_edge(&mut self) -> Result<(), Infallible> {
            if let Some(level) = self.levels.pop_front() {
                self.level = level;
            }
            Ok(())
        }
    }

    #[test]
    fn test_active_low_press_release() {
        let mut button = ButtonInput::new(ScriptedPin::new(&[false, true]), true);
        assert!(block_on(button.next_edge()).unwrap());
        assert!(button.is_pressed());
        assert!(!block_on(button.next_edge()).unwrap());
    }

    #[test]
    fn test_glitch_is_ignored() {
        // Level bounces back to released before settling pressed
        let mut button = ButtonInput::new(ScriptedPin::new(&[true, true, false]), true);
        assert!(block_on(button.next_edge()).unwrap());
    }
}
