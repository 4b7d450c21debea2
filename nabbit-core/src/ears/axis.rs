//! Single ear axis controller
//!
//! Pure controller: the caller feeds encoder edges and quiet-poll ticks with
//! a millisecond timestamp, and the axis switches its motor. Targets at or
//! above [`STEPS`] ask for at least one extra revolution before stopping.

use super::detect::{NotchDetector, NotchFound};
use super::{wrap, EarStatus, STEPS};
use crate::config::EarTiming;
use crate::traits::{Direction, EarMotor, MotorError};

/// Errors returned by axis commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EarError {
    /// The motor was marked broken
    Broken,
    /// Position is unknown; run detection first
    PositionUnknown,
    /// Detection is in progress
    Detecting,
    /// Motor output failure
    Motor(MotorError),
}

impl From<MotorError> for EarError {
    fn from(e: MotorError) -> Self {
        EarError::Motor(e)
    }
}

impl core::fmt::Display for EarError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EarError::Broken => f.write_str("ear is broken"),
            EarError::PositionUnknown => f.write_str("ear position is unknown"),
            EarError::Detecting => f.write_str("ear detection in progress"),
            EarError::Motor(e) => write!(f, "{}", e),
        }
    }
}

/// What an edge or poll did to the axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AxisEvent {
    /// Edge inside the debounce window
    Bounce,
    /// Position advanced, still running
    Stepped,
    /// Target reached, motor stopped
    Arrived,
    /// Edge while the motor was off: someone turned the ear
    HandMoved,
    /// Notch located during detection
    NotchFound,
    /// Detection finished; position is known again
    Detected,
    /// No edge within the stall timeout; motor stopped and marked broken
    Stalled,
}

/// Closed-loop controller for one ear
pub struct EarAxis<M: EarMotor> {
    motor: M,
    timing: EarTiming,
    /// Counted position; `None` when unknown
    position: Option<u8>,
    /// Absolute target, `>= STEPS` while extra turns remain
    target: Option<u16>,
    detector: Option<NotchDetector>,
    last_edge_ms: Option<u64>,
    run_started_ms: u64,
    broken: bool,
}

impl<M: EarMotor> EarAxis<M> {
    /// Create an axis with unknown position
    pub fn new(motor: M, timing: EarTiming) -> Self {
        Self {
            motor,
            timing,
            position: None,
            target: None,
            detector: None,
            last_edge_ms: None,
            run_started_ms: 0,
            broken: false,
        }
    }

    /// Current position, `None` when unknown or while detecting
    pub fn position(&self) -> Option<u8> {
        if self.detector.is_some() {
            None
        } else {
            self.position
        }
    }

    /// Position the axis is heading to (or resting at)
    pub fn target(&self) -> Option<u8> {
        self.target.map(|t| wrap(t as i32))
    }

    /// Check if the motor is on
    pub fn is_running(&self) -> bool {
        self.motor.running().is_some()
    }

    /// Check if detection is in progress
    pub fn is_detecting(&self) -> bool {
        self.detector.is_some()
    }

    /// Check if the axis was marked broken
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Diagnostic status
    pub fn status(&self) -> EarStatus {
        match (self.broken, self.position()) {
            (true, _) => EarStatus::Broken,
            (false, None) => EarStatus::Unknown,
            (false, Some(pos)) => EarStatus::At(pos),
        }
    }

    /// Motor driven by this axis
    pub fn motor(&self) -> &M {
        &self.motor
    }

    pub fn motor_mut(&mut self) -> &mut M {
        &mut self.motor
    }

    /// Timing parameters
    pub fn timing(&self) -> &EarTiming {
        &self.timing
    }

    /// Forget the position, e.g. after the device reported a manual move
    pub fn invalidate(&mut self) {
        self.position = None;
        self.target = None;
    }

    /// Go to an absolute position
    ///
    /// Returns without moving when already at `position` (and no extra turn
    /// was requested).
    ///
    /// # Arguments
    /// * `position` - target hole; values `>= STEPS` add a revolution each
    /// * `dir` - direction of travel
    /// * `now_ms` - current time, for stall detection
    pub fn go(&mut self, position: u16, dir: Direction, now_ms: u64) -> Result<(), EarError> {
        if self.broken {
            return Err(EarError::Broken);
        }
        if self.detector.is_some() {
            return Err(EarError::Detecting);
        }
        let current = self.position.ok_or(EarError::PositionUnknown)?;

        let mut target = position;
        if current as u16 == target % STEPS as u16 {
            if target >= STEPS as u16 {
                target -= STEPS as u16;
            } else {
                self.target = Some(target);
                return Ok(());
            }
        }
        self.target = Some(target);
        self.start(dir, now_ms)
    }

    /// Move relative to the current target
    ///
    /// Forward adds `delta` holes, backward subtracts them.
    pub fn step_by(&mut self, delta: u8, dir: Direction, now_ms: u64) -> Result<(), EarError> {
        let base = match (self.target, self.position) {
            (Some(t), _) => wrap(t as i32),
            (None, Some(p)) => p,
            (None, None) => return Err(EarError::PositionUnknown),
        };
        let dest = wrap(base as i32 + dir.step() as i32 * delta as i32);
        self.go(dest as u16, dir, now_ms)
    }

    /// Spin forward until the notch is found
    ///
    /// A broken axis is retried: detection is the only way to clear the
    /// broken flag.
    pub fn start_detection(&mut self, now_ms: u64) -> Result<(), EarError> {
        self.broken = false;
        self.position = Some(0);
        self.target = None;
        self.detector = Some(NotchDetector::new(now_ms, self.timing.notch_gap_ms));
        self.start(Direction::Forward, now_ms)
    }

    /// Stop the motor, keeping the counted position
    pub fn stop(&mut self) -> Result<(), EarError> {
        self.motor.stop()?;
        if let Some(pos) = self.position {
            self.target = Some(pos as u16);
        }
        Ok(())
    }

    /// Feed one rising encoder edge
    pub fn on_edge(&mut self, now_ms: u64) -> Result<AxisEvent, EarError> {
        if let Some(last) = self.last_edge_ms {
            if now_ms.saturating_sub(last) < self.timing.debounce_ms as u64 {
                return Ok(AxisEvent::Bounce);
            }
        }
        self.last_edge_ms = Some(now_ms);

        let dir = match self.motor.running() {
            Some(dir) => dir,
            None => {
                self.invalidate();
                return Ok(AxisEvent::HandMoved);
            }
        };
        let pos = wrap(self.position.unwrap_or(0) as i32 + dir.step() as i32);
        self.position = Some(pos);

        if let Some(det) = self.detector.as_mut() {
            if det.found().is_none() {
                if det.on_edge(now_ms).is_some() {
                    self.target = Some(wrap(pos as i32 + 1) as u16);
                    return Ok(AxisEvent::NotchFound);
                }
                return Ok(AxisEvent::Stepped);
            }
            det.on_edge(now_ms);
        }
        self.advance(pos)
    }

    /// Feed a quiet-poll tick (no edge since the previous call)
    pub fn on_quiet(&mut self, now_ms: u64) -> Result<Option<AxisEvent>, EarError> {
        if !self.is_running() {
            return Ok(None);
        }
        let since = self.last_edge_ms.unwrap_or(self.run_started_ms).max(self.run_started_ms);
        if now_ms.saturating_sub(since) > self.timing.stall_timeout_ms as u64 {
            self.motor.stop()?;
            self.broken = true;
            self.detector = None;
            self.invalidate();
            return Ok(Some(AxisEvent::Stalled));
        }
        if let Some(det) = self.detector.as_mut() {
            if det.on_quiet(now_ms) == Some(NotchFound::Inside) {
                let pos = self.position.unwrap_or(0);
                self.target = Some(wrap(pos as i32 + 1) as u16);
                return Ok(Some(AxisEvent::NotchFound));
            }
        }
        Ok(None)
    }

    fn start(&mut self, dir: Direction, now_ms: u64) -> Result<(), EarError> {
        self.run_started_ms = now_ms;
        self.motor.run(dir)?;
        Ok(())
    }

    fn advance(&mut self, pos: u8) -> Result<AxisEvent, EarError> {
        let Some(target) = self.target else {
            return Ok(AxisEvent::Stepped);
        };
        if pos as u16 == target {
            self.motor.stop()?;
            if let Some(det) = self.detector.take() {
                let overrun = det.overrun();
                self.position = Some(overrun);
                self.target = Some(overrun as u16);
                return Ok(AxisEvent::Detected);
            }
            return Ok(AxisEvent::Arrived);
        }
        if pos as u16 == target % STEPS as u16 && target >= STEPS as u16 {
            self.target = Some(target - STEPS as u16);
        }
        Ok(AxisEvent::Stepped)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Motor that records its state and counts direction reversals
    #[derive(Default)]
    pub(crate) struct FakeMotor {
        pub running: Option<Direction>,
        pub starts: u32,
    }

    impl EarMotor for FakeMotor {
        fn run(&mut self, dir: Direction) -> Result<(), MotorError> {
            self.running = Some(dir);
            self.starts += 1;
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

    fn axis_at(pos: u8) -> EarAxis<FakeMotor> {
        let mut axis = EarAxis::new(FakeMotor::default(), EarTiming::default());
        axis.position = Some(pos);
        axis.target = Some(pos as u16);
        axis
    }

    /// Feed evenly spaced edges until the motor stops
    fn run_to_stop(axis: &mut EarAxis<FakeMotor>, mut now: u64) -> u64 {
        for _ in 0..200 {
            if !axis.is_running() {
                break;
            }
            now += 100;
            axis.on_edge(now).unwrap();
        }
        now
    }

    #[test]
    fn test_go_already_there_is_noop() {
        let mut axis = axis_at(5);
        axis.go(5, Direction::Forward, 0).unwrap();
        assert!(!axis.is_running());
        assert_eq!(axis.motor.starts, 0);
    }

    #[test]
    fn test_go_extra_turn() {
        let mut axis = axis_at(5);
        axis.go(5 + STEPS as u16, Direction::Forward, 0).unwrap();
        assert!(axis.is_running());

        let mut edges = 0;
        let mut now = 0;
        while axis.is_running() && edges < 100 {
            now += 100;
            axis.on_edge(now).unwrap();
            edges += 1;
        }
        assert_eq!(edges, STEPS as u32);
        assert_eq!(axis.position(), Some(5));
    }

    #[test]
    fn test_go_backward() {
        let mut axis = axis_at(2);
        axis.go(15, Direction::Backward, 0).unwrap();
        assert_eq!(axis.motor.running, Some(Direction::Backward));
        run_to_stop(&mut axis, 0);
        assert_eq!(axis.position(), Some(15));
    }

    #[test]
    fn test_go_unknown_position() {
        let mut axis = EarAxis::new(FakeMotor::default(), EarTiming::default());
        assert_eq!(axis.go(3, Direction::Forward, 0), Err(EarError::PositionUnknown));
        assert_eq!(axis.status(), EarStatus::Unknown);
    }

    #[test]
    fn test_step_by_relative_to_target() {
        let mut axis = axis_at(3);
        axis.step_by(4, Direction::Forward, 0).unwrap();
        assert_eq!(axis.target(), Some(7));
        run_to_stop(&mut axis, 0);
        axis.step_by(10, Direction::Backward, 10_000).unwrap();
        assert_eq!(axis.target(), Some(14));
    }

    #[test]
    fn test_bounce_ignored() {
        let mut axis = axis_at(0);
        axis.go(3, Direction::Forward, 0).unwrap();
        assert_eq!(axis.on_edge(100).unwrap(), AxisEvent::Stepped);
        assert_eq!(axis.on_edge(105).unwrap(), AxisEvent::Bounce);
        assert_eq!(axis.position(), Some(1));
    }

    #[test]
    fn test_edge_while_stopped_is_hand_move() {
        let mut axis = axis_at(4);
        assert_eq!(axis.on_edge(1000).unwrap(), AxisEvent::HandMoved);
        assert_eq!(axis.position(), None);
    }

    #[test]
    fn test_detection_passing_notch() {
        let mut axis = EarAxis::new(FakeMotor::default(), EarTiming::default());
        axis.start_detection(0).unwrap();
        assert_eq!(axis.position(), None);
        assert_eq!(axis.on_edge(150).unwrap(), AxisEvent::Stepped);
        assert_eq!(axis.on_edge(300).unwrap(), AxisEvent::Stepped);
        // Missing hole: double spacing
        assert_eq!(axis.on_edge(750).unwrap(), AxisEvent::NotchFound);
        assert_eq!(axis.on_edge(900).unwrap(), AxisEvent::Detected);
        assert!(!axis.is_running());
        assert_eq!(axis.position(), Some(1));
    }

    #[test]
    fn test_detection_inside_notch() {
        let mut axis = EarAxis::new(FakeMotor::default(), EarTiming::default());
        axis.start_detection(0).unwrap();
        assert_eq!(axis.on_edge(150).unwrap(), AxisEvent::Stepped);
        assert_eq!(axis.on_quiet(450).unwrap(), None);
        assert_eq!(axis.on_quiet(600).unwrap(), Some(AxisEvent::NotchFound));
        assert_eq!(axis.on_edge(700).unwrap(), AxisEvent::Detected);
        assert_eq!(axis.position(), Some(0));
    }

    #[test]
    fn test_stalled_motor_is_broken() {
        let mut axis = EarAxis::new(FakeMotor::default(), EarTiming::default());
        axis.start_detection(0).unwrap();
        assert_eq!(axis.on_quiet(1000).unwrap(), Some(AxisEvent::NotchFound));
        assert_eq!(axis.on_quiet(2500).unwrap(), Some(AxisEvent::Stalled));
        assert!(axis.is_broken());
        assert!(!axis.is_running());
        assert_eq!(axis.status(), EarStatus::Broken);
        assert_eq!(axis.go(3, Direction::Forward, 3000), Err(EarError::Broken));
    }

    proptest! {
        #[test]
        fn test_go_reaches_target(
            start in 0u8..STEPS,
            target in 0u16..(2 * STEPS as u16),
            backward in any::<bool>(),
        ) {
            let dir = if backward { Direction::Backward } else { Direction::Forward };
            let mut axis = axis_at(start);
            axis.go(target, dir, 0).unwrap();
            run_to_stop(&mut axis, 0);
            prop_assert!(!axis.is_running());
            prop_assert_eq!(axis.position(), Some((target % STEPS as u16) as u8));
        }
    }
}
