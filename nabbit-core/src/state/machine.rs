//! State machine definition
//!
//! LED ambience, ear rest position and queue draining are all a function of
//! the current state.

use super::events::Event;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Robot states, as broadcast to every client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum RobotState {
    /// LEDs off, ears parked; only wakeup and direct requests are serviced
    Asleep,
    /// Queue empty or about to drain; info animations run
    #[default]
    Idle,
    /// One connection owns the robot and bypasses the queue
    Interactive,
    /// A queued request is being played
    Playing,
}

impl RobotState {
    /// Wire name of the state
    pub const fn as_str(&self) -> &'static str {
        match self {
            RobotState::Asleep => "asleep",
            RobotState::Idle => "idle",
            RobotState::Interactive => "interactive",
            RobotState::Playing => "playing",
        }
    }

    /// Check if the drain worker may pop the next queued item
    pub fn can_drain(&self) -> bool {
        matches!(self, RobotState::Idle | RobotState::Playing)
    }

    /// Check if requests that would otherwise be queued run immediately
    ///
    /// While asleep, self-tests and tag writes are serviced directly.
    pub fn runs_direct(&self) -> bool {
        matches!(self, RobotState::Asleep)
    }

    /// Process an event and return the next state
    ///
    /// This is the core state transition logic.
    pub fn transition(self, event: Event) -> Self {
        use Event::*;
        use RobotState::*;

        match (self, event) {
            // Idle transitions
            (Idle, BeginPlayback) => Playing,
            (Idle, EnterInteractive) => Interactive,
            (Idle, Sleep) => Asleep,

            // Playing transitions
            (Playing, BeginPlayback) => Playing,
            (Playing, QueueDrained) => Idle,
            (Playing, EnterInteractive) => Interactive,
            (Playing, Sleep) => Asleep,

            // Interactive transitions
            (Interactive, ExitInteractive) => Idle,

            // Asleep transitions
            (Asleep, Wakeup) => Idle,

            // Default: stay in current state
            _ => self,
        }
    }
}

impl core::fmt::Display for RobotState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_round_trip() {
        let state = RobotState::Idle.transition(Event::BeginPlayback);
        assert_eq!(state, RobotState::Playing);
        assert_eq!(state.transition(Event::QueueDrained), RobotState::Idle);
    }

    #[test]
    fn test_interactive_only_exits_explicitly() {
        let state = RobotState::Idle.transition(Event::EnterInteractive);
        assert_eq!(state, RobotState::Interactive);

        for event in [Event::BeginPlayback, Event::QueueDrained, Event::Sleep, Event::Wakeup] {
            assert_eq!(state.transition(event), RobotState::Interactive);
        }
        assert_eq!(state.transition(Event::ExitInteractive), RobotState::Idle);
    }

    #[test]
    fn test_sleep_and_wakeup() {
        for state in [RobotState::Idle, RobotState::Playing] {
            assert_eq!(state.transition(Event::Sleep), RobotState::Asleep);
        }
        let asleep = RobotState::Asleep;
        assert_eq!(asleep.transition(Event::BeginPlayback), RobotState::Asleep);
        assert_eq!(asleep.transition(Event::Wakeup), RobotState::Idle);
    }

    #[test]
    fn test_wakeup_is_noop_when_awake() {
        for state in [RobotState::Idle, RobotState::Playing, RobotState::Interactive] {
            assert_eq!(state.transition(Event::Wakeup), state);
        }
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(RobotState::Asleep.as_str(), "asleep");
        assert_eq!(RobotState::Interactive.as_str(), "interactive");
        assert!(RobotState::Playing.can_drain());
        assert!(!RobotState::Interactive.can_drain());
    }
}
