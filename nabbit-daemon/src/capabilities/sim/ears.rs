//! Simulated ears
//!
//! The real closed-loop controller ([`EncoderEars`] over [`PinMotor`]s)
//! drives two virtual encoder wheels. Motor pins are atomics the wheels read
//! back, so the direction a wheel turns is whatever the H-bridge says.
//!
//! Time is virtual: every tick advances the controller clock by
//! [`VIRTUAL_TICK_MS`], whatever the wall-clock tick length, and a running
//! wheel moves one slot every [`SLOT_TICKS`] ticks.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use embedded_hal::digital::{ErrorType, OutputPin};
use nabbit_core::config::EarTiming;
use nabbit_core::ears::{AxisEvent, EarError, EarId, EarStatus, STEPS};
use nabbit_core::traits::Direction;
use nabbit_drivers::ears::{EncoderEars, PinMotor};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::capabilities::Ears;
use crate::channels::{HardwareEvent, HardwareSender};
use crate::error::DeviceError;

/// Controller time added by one tick
pub const VIRTUAL_TICK_MS: u64 = 50;

/// Ticks per wheel slot
pub const SLOT_TICKS: u64 = 5;

/// Slots the wheels start at
const START_SLOTS: [u8; 2] = [3, 11];

/// Output pin stored in an atomic
#[derive(Debug, Clone, Default)]
pub struct SimPin(Arc<AtomicBool>);

impl SimPin {
    pub fn is_high(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.store(true, Ordering::Relaxed);
        Ok(())
    }
}

type SimMotor = PinMotor<SimPin, SimPin>;

/// Encoder wheel of `STEPS` holes plus the notch slot
#[derive(Debug)]
struct Wheel {
    forward: SimPin,
    backward: SimPin,
    /// Slot under the sensor, 0..=STEPS; slot STEPS is the notch
    slot: u8,
    jammed: bool,
}

impl Wheel {
    /// Wheel at `slot` and the motor whose pins it reads
    fn with_motor(slot: u8) -> Result<(SimMotor, Self), EarError> {
        let (forward, backward) = (SimPin::default(), SimPin::default());
        let motor = PinMotor::new(forward.clone(), backward.clone())?;
        let wheel = Self {
            forward,
            backward,
            slot,
            jammed: false,
        };
        Ok((motor, wheel))
    }

    /// Advance one slot as the motor says; true if a hole passed the sensor
    fn turn(&mut self) -> bool {
        if self.jammed {
            return false;
        }
        let step = match (self.forward.is_high(), self.backward.is_high()) {
            (true, false) => 1,
            (false, true) => STEPS,
            _ => return false,
        };
        self.advance(step)
    }

    fn advance(&mut self, step: u8) -> bool {
        self.slot = (self.slot + step) % (STEPS + 1);
        self.slot != STEPS
    }
}

struct Inner {
    ears: EncoderEars<SimMotor>,
    wheels: [Wheel; 2],
    now_ms: u64,
    ticks: u64,
}

/// Two simulated ears
pub struct SimEars {
    inner: Mutex<Inner>,
    /// Signalled whenever both motors stopped
    settled: Notify,
    events: HardwareSender,
}

impl SimEars {
    pub fn new(timing: EarTiming, events: HardwareSender) -> Result<Self, DeviceError> {
        let (left, left_wheel) = Wheel::with_motor(START_SLOTS[0])?;
        let (right, right_wheel) = Wheel::with_motor(START_SLOTS[1])?;
        Ok(Self {
            inner: Mutex::new(Inner {
                ears: EncoderEars::new(left, right, timing),
                wheels: [left_wheel, right_wheel],
                now_ms: 0,
                ticks: 0,
            }),
            settled: Notify::new(),
            events,
        })
    }

    /// Advance the wheels forever, one tick per `tick`
    pub async fn run(self: Arc<Self>, tick: Duration) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick();
        }
    }

    /// One virtual tick
    pub fn tick(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let was_running = inner.ears.is_running();
        inner.now_ms += VIRTUAL_TICK_MS;
        inner.ticks += 1;
        let now = inner.now_ms;

        if inner.ticks % SLOT_TICKS == 0 {
            for ear in EarId::BOTH {
                if !inner.wheels[ear.index()].turn() {
                    continue;
                }
                match inner.ears.on_edge(ear, now) {
                    Ok(update) => debug!("{} ear: {:?}", ear.as_str(), update.event),
                    Err(e) => warn!("{} ear: {}", ear.as_str(), e),
                }
            }
        }
        match inner.ears.poll(now) {
            Ok(updates) => {
                for update in updates {
                    if update.event == AxisEvent::Stalled {
                        warn!("{} ear stalled, marked broken", update.ear.as_str());
                    }
                }
            }
            Err(e) => warn!("ear poll failed: {}", e),
        }
        let stopped = was_running && !inner.ears.is_running();
        drop(guard);
        if stopped {
            self.settled.notify_waiters();
        }
    }

    /// Turn a stopped ear by hand by `slots` slots
    pub fn turn_ear(&self, ear: EarId, slots: u8) {
        let mut moved = false;
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            for _ in 0..slots {
                // Hands are slower than motors
                inner.now_ms += VIRTUAL_TICK_MS;
                if !inner.wheels[ear.index()].advance(1) {
                    continue;
                }
                if let Ok(update) = inner.ears.on_edge(ear, inner.now_ms) {
                    moved |= update.event == AxisEvent::HandMoved;
                }
            }
        }
        if moved {
            let _ = self.events.send(HardwareEvent::EarMoved(ear));
        }
    }

    /// Block (or free) a wheel, as if the ear hit something
    pub fn jam_ear(&self, ear: EarId, jammed: bool) {
        self.inner.lock().wheels[ear.index()].jammed = jammed;
    }

    fn is_running(&self) -> bool {
        self.inner.lock().ears.is_running()
    }

    fn with_ears<T>(&self, f: impl FnOnce(&mut EncoderEars<SimMotor>, u64) -> Result<T, EarError>) -> Result<T, DeviceError> {
        let mut inner = self.inner.lock();
        let now = inner.now_ms;
        Ok(f(&mut inner.ears, now)?)
    }
}

#[async_trait]
impl Ears for SimEars {
    async fn go(&self, ear: EarId, position: u8, dir: Direction) -> Result<(), DeviceError> {
        self.with_ears(|ears, now| ears.go(ear, position as u16, dir, now))
    }

    async fn move_by(&self, ear: EarId, delta: u8, dir: Direction) -> Result<(), DeviceError> {
        self.with_ears(|ears, now| ears.move_by(ear, delta, dir, now))
    }

    async fn wait_while_running(&self) {
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }

    async fn detect_positions(&self) -> (Option<u8>, Option<u8>) {
        match self.with_ears(|ears, now| ears.start_detection(now)) {
            Ok(true) => self.wait_while_running().await,
            Ok(false) => {}
            Err(e) => warn!("Cannot start ear detection: {}", e),
        }
        self.positions().await
    }

    async fn positions(&self) -> (Option<u8>, Option<u8>) {
        self.inner.lock().ears.positions()
    }

    fn status(&self, ear: EarId) -> EarStatus {
        self.inner.lock().ears.status(ear)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::hardware_channel;

    fn spawn_ears() -> (Arc<SimEars>, crate::channels::HardwareReceiver) {
        let (tx, rx) = hardware_channel();
        let ears = Arc::new(SimEars::new(EarTiming::default(), tx).unwrap());
        tokio::spawn(ears.clone().run(Duration::from_millis(1)));
        (ears, rx)
    }

    #[tokio::test]
    async fn test_detect_then_go() {
        let (ears, _rx) = spawn_ears();
        assert_eq!(ears.positions().await, (None, None));
        let (left, right) = ears.detect_positions().await;
        assert!(left.is_some() && right.is_some());

        ears.go(EarId::Left, 10, Direction::Forward).await.unwrap();
        ears.go(EarId::Right, 4, Direction::Backward).await.unwrap();
        ears.wait_while_running().await;
        assert_eq!(ears.positions().await, (Some(10), Some(4)));
        assert_eq!(ears.status(EarId::Left), EarStatus::At(10));
    }

    #[tokio::test]
    async fn test_go_needs_a_known_position() {
        let (ears, _rx) = spawn_ears();
        let err = ears.go(EarId::Left, 3, Direction::Forward).await.unwrap_err();
        assert!(matches!(err, DeviceError::Ear(EarError::PositionUnknown)));
    }

    #[tokio::test]
    async fn test_hand_move_is_reported() {
        let (ears, mut rx) = spawn_ears();
        ears.detect_positions().await;
        ears.turn_ear(EarId::Right, 3);
        assert_eq!(rx.recv().await, Some(HardwareEvent::EarMoved(EarId::Right)));
        assert_eq!(ears.positions().await.1, None);
        assert_eq!(ears.status(EarId::Right), EarStatus::Unknown);
    }

    #[tokio::test]
    async fn test_jammed_ear_is_broken() {
        let (ears, _rx) = spawn_ears();
        ears.jam_ear(EarId::Left, true);
        let (left, right) = ears.detect_positions().await;
        assert_eq!(left, None);
        assert!(right.is_some());
        assert_eq!(ears.status(EarId::Left), EarStatus::Broken);
    }
}
