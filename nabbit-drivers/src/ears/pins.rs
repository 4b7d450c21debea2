//! H-bridge ear motor on two output pins
//!
//! One pin drives the motor forward, the other backward. Both pins are
//! never high at the same time: the opposite pin is always pulled low
//! before the requested one goes high.

use embedded_hal::digital::OutputPin;
use nabbit_core::traits::{Direction, EarMotor, MotorError};

/// Ear motor driven through a forward and a backward pin
pub struct PinMotor<F, B> {
    forward: F,
    backward: B,
    running: Option<Direction>,
}

impl<F: OutputPin, B: OutputPin> PinMotor<F, B> {
    /// Create a motor with both pins low
    pub fn new(forward: F, backward: B) -> Result<Self, MotorError> {
        let mut motor = Self {
            forward,
            backward,
            running: None,
        };
        motor.stop()?;
        Ok(motor)
    }

    /// Give the pins back
    pub fn release(self) -> (F, B) {
        (self.forward, self.backward)
    }
}

impl<F: OutputPin, B: OutputPin> EarMotor for PinMotor<F, B> {
    fn run(&mut self, dir: Direction) -> Result<(), MotorError> {
        match dir {
            Direction::Forward => {
                self.backward.set_low().map_err(|_| MotorError::Output)?;
                self.forward.set_high().map_err(|_| MotorError::Output)?;
            }
            Direction::Backward => {
                self.forward.set_low().map_err(|_| MotorError::Output)?;
                self.backward.set_high().map_err(|_| MotorError::Output)?;
            }
        }
        self.running = Some(dir);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), MotorError> {
        self.running = None;
        self.forward.set_low().map_err(|_| MotorError::Output)?;
        self.backward.set_low().map_err(|_| MotorError::Output)?;
        Ok(())
    }

    fn running(&self) -> Option<Direction> {
        self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use core::convert::Infallible;
    use embedded_hal::digital::ErrorType;

    /// Both sides of an H-bridge; records a short if both go high
    #[derive(Default)]
    struct Bridge {
        levels: [Cell<bool>; 2],
        shorted: Cell<bool>,
    }

    struct BridgePin<'a> {
        bridge: &'a Bridge,
        side: usize,
    }

    impl ErrorType for BridgePin<'_> {
        type Error = Infallible;
    }

    impl OutputPin for BridgePin<'_> {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.bridge.levels[self.side].set(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.bridge.levels[self.side].set(true);
            if self.bridge.levels[1 - self.side].get() {
                self.bridge.shorted.set(true);
            }
            Ok(())
        }
    }

    fn motor(bridge: &Bridge) -> PinMotor<BridgePin<'_>, BridgePin<'_>> {
        PinMotor::new(BridgePin { bridge, side: 0 }, BridgePin { bridge, side: 1 }).unwrap()
    }

    #[test]
    fn test_starts_stopped() {
        let bridge = Bridge::default();
        bridge.levels[0].set(true);
        let motor = motor(&bridge);
        assert_eq!(motor.running(), None);
        assert!(!bridge.levels[0].get());
    }

    #[test]
    fn test_reversal_never_shorts() {
        let bridge = Bridge::default();
        let mut motor = motor(&bridge);
        motor.run(Direction::Forward).unwrap();
        assert!(bridge.levels[0].get());
        motor.run(Direction::Backward).unwrap();
        assert!(!bridge.levels[0].get());
        assert!(bridge.levels[1].get());
        motor.run(Direction::Forward).unwrap();
        assert!(!bridge.shorted.get());
        assert_eq!(motor.running(), Some(Direction::Forward));
    }

    #[test]
    fn test_stop_releases_both_pins() {
        let bridge = Bridge::default();
        let mut motor = motor(&bridge);
        motor.run(Direction::Backward).unwrap();
        motor.stop().unwrap();
        assert_eq!(motor.running(), None);
        assert!(!bridge.levels[0].get() && !bridge.levels[1].get());
    }
}
