//! Two-ear closed-loop controller
//!
//! Wraps one [`EarAxis`] per ear. The owner forwards encoder edges with
//! [`EncoderEars::on_edge`] and calls [`EncoderEars::poll`] every
//! [`EncoderEars::poll_interval_ms`] while a motor runs. A stalled ear is
//! marked broken and stopped; the other keeps going.

use heapless::Vec;
use nabbit_core::config::EarTiming;
use nabbit_core::ears::{AxisEvent, EarAxis, EarError, EarId, EarStatus};
use nabbit_core::traits::{Direction, EarMotor};

/// Event produced by one ear
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EarUpdate {
    pub ear: EarId,
    pub event: AxisEvent,
}

/// Left and right axis
pub struct EncoderEars<M: EarMotor> {
    axes: [EarAxis<M>; 2],
}

impl<M: EarMotor> EncoderEars<M> {
    pub fn new(left: M, right: M, timing: EarTiming) -> Self {
        Self {
            axes: [EarAxis::new(left, timing), EarAxis::new(right, timing)],
        }
    }

    pub fn axis(&self, ear: EarId) -> &EarAxis<M> {
        &self.axes[ear.index()]
    }

    pub fn axis_mut(&mut self, ear: EarId) -> &mut EarAxis<M> {
        &mut self.axes[ear.index()]
    }

    /// Absolute move of one ear
    pub fn go(&mut self, ear: EarId, position: u16, dir: Direction, now_ms: u64) -> Result<(), EarError> {
        self.axes[ear.index()].go(position, dir, now_ms)
    }

    /// Relative move of one ear
    pub fn move_by(&mut self, ear: EarId, delta: u8, dir: Direction, now_ms: u64) -> Result<(), EarError> {
        self.axes[ear.index()].step_by(delta, dir, now_ms)
    }

    /// Start notch detection on every ear whose position is unknown
    ///
    /// Returns `true` if at least one ear started spinning. A motor that
    /// fails to start is reported after the other one was started.
    pub fn start_detection(&mut self, now_ms: u64) -> Result<bool, EarError> {
        let mut started = false;
        let mut result = Ok(());
        for axis in self.axes.iter_mut() {
            if axis.position().is_some() || axis.is_detecting() {
                continue;
            }
            match axis.start_detection(now_ms) {
                Ok(()) => started = true,
                Err(e) => result = Err(e),
            }
        }
        result.map(|()| started)
    }

    /// Feed an encoder edge of one ear
    pub fn on_edge(&mut self, ear: EarId, now_ms: u64) -> Result<EarUpdate, EarError> {
        let event = self.axes[ear.index()].on_edge(now_ms)?;
        Ok(EarUpdate { ear, event })
    }

    /// Quiet-poll both ears
    pub fn poll(&mut self, now_ms: u64) -> Result<Vec<EarUpdate, 2>, EarError> {
        let mut updates = Vec::new();
        for ear in EarId::BOTH {
            if let Some(event) = self.axes[ear.index()].on_quiet(now_ms)? {
                let _ = updates.push(EarUpdate { ear, event });
            }
        }
        Ok(updates)
    }

    /// Stop both motors
    pub fn stop(&mut self) -> Result<(), EarError> {
        let left = self.axes[0].stop();
        let right = self.axes[1].stop();
        left.and(right)
    }

    /// Check if either motor runs
    pub fn is_running(&self) -> bool {
        self.axes.iter().any(|a| a.is_running())
    }

    /// Known positions, `None` for unknown or detecting ears
    pub fn positions(&self) -> (Option<u8>, Option<u8>) {
        (self.axes[0].position(), self.axes[1].position())
    }

    pub fn status(&self, ear: EarId) -> EarStatus {
        self.axes[ear.index()].status()
    }

    /// Interval at which [`poll`](Self::poll) must run while a motor is on
    pub fn poll_interval_ms(&self) -> u32 {
        self.axes[0].timing().quiet_poll_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nabbit_core::ears::STEPS;
    use nabbit_core::traits::MotorError;

    /// Motor with an attached encoder wheel of `STEPS` holes and one notch
    #[derive(Default)]
    struct WheelMotor {
        running: Option<Direction>,
        /// Slot under the sensor, 0..=STEPS; slot STEPS is the notch
        slot: u8,
        dead: bool,
    }

    impl EarMotor for WheelMotor {
        fn run(&mut self, dir: Direction) -> Result<(), MotorError> {
            self.running = Some(dir);
            Ok(())
        }

        fn stop(&mut self) -> Result<(), MotorError> {
            self.running = None;
            Ok(())
        }

        fn running(&self) -> Option<Direction> {
            self.running
        }
    }

    impl WheelMotor {
        /// Advance one slot; true if a hole passed the sensor
        fn turn(&mut self) -> bool {
            let step = match self.running {
                _ if self.dead => return false,
                None => return false,
                Some(Direction::Forward) => 1,
                Some(Direction::Backward) => STEPS,
            };
            self.slot = (self.slot + step) % (STEPS + 1);
            self.slot != STEPS
        }
    }

    /// Simulate 250 ms per slot, polling every 50 ms
    fn simulate(ears: &mut EncoderEars<WheelMotor>, mut now: u64) -> u64 {
        let mut next_slot = now + 250;
        while ears.is_running() && now < 60_000 {
            now += 50;
            if now >= next_slot {
                next_slot += 250;
                for ear in EarId::BOTH {
                    if ears.axis_mut(ear).motor_mut().turn() {
                        ears.on_edge(ear, now).unwrap();
                    }
                }
            }
            ears.poll(now).unwrap();
        }
        now
    }

    fn ears(left_slot: u8, right_slot: u8) -> EncoderEars<WheelMotor> {
        let left = WheelMotor { slot: left_slot, ..Default::default() };
        let right = WheelMotor { slot: right_slot, ..Default::default() };
        EncoderEars::new(left, right, EarTiming::default())
    }

    #[test]
    fn test_detection_then_go() {
        let mut ears = ears(3, 11);
        assert!(ears.start_detection(0).unwrap());
        let now = simulate(&mut ears, 0);
        let (left, right) = ears.positions();
        assert!(left.is_some() && right.is_some());

        ears.go(EarId::Left, 10, Direction::Forward, now).unwrap();
        ears.go(EarId::Right, 4, Direction::Backward, now).unwrap();
        simulate(&mut ears, now);
        assert_eq!(ears.positions(), (Some(10), Some(4)));
    }

    #[test]
    fn test_detection_survives_dead_motor() {
        let mut ears = ears(0, 0);
        ears.axis_mut(EarId::Right).motor_mut().dead = true;
        ears.start_detection(0).unwrap();
        simulate(&mut ears, 0);
        assert!(ears.positions().0.is_some());
        assert_eq!(ears.status(EarId::Right), EarStatus::Broken);
        assert!(!ears.is_running());
    }

    #[test]
    fn test_detection_skips_known_ears() {
        let mut ears = ears(0, 0);
        ears.start_detection(0).unwrap();
        let now = simulate(&mut ears, 0);
        assert!(!ears.start_detection(now).unwrap());
    }
}
