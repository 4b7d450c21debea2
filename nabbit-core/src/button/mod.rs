//! Button click sequence recognition
//!
//! The button reports raw down/up edges. Gestures are recognized by a
//! small sequence machine with one pending timer:
//!
//! ```text
//! (0) -down-> (1) -timer-> hold
//!              |
//!              -up-> (2) -timer-> click
//!                     |
//!                     -down-> (3) -timer-> click_and_hold
//!                              |
//!                              -up-> (4) -timer-> double_click
//!                                     |
//!                                     -down-> (5) -timer-> click_and_hold
//!                                              |
//!                                              -up-> triple_click
//! ```
//!
//! Any timer firing returns the machine to (0).

use heapless::Vec;

use crate::config::ButtonTiming;

/// Gesture or raw edge reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ButtonEvent {
    Down,
    Up,
    Click,
    DoubleClick,
    TripleClick,
    Hold,
    ClickAndHold,
}

impl ButtonEvent {
    /// Wire name
    pub const fn as_str(self) -> &'static str {
        match self {
            ButtonEvent::Down => "down",
            ButtonEvent::Up => "up",
            ButtonEvent::Click => "click",
            ButtonEvent::DoubleClick => "double_click",
            ButtonEvent::TripleClick => "triple_click",
            ButtonEvent::Hold => "hold",
            ButtonEvent::ClickAndHold => "click_and_hold",
        }
    }
}

/// Events produced by one edge: the raw edge, then possibly a gesture
pub type EdgeEvents = Vec<ButtonEvent, 2>;

/// Click sequence state machine
#[derive(Debug, Clone)]
pub struct ButtonMachine {
    timing: ButtonTiming,
    sequence: u8,
    pressed: bool,
    timer: Option<(u64, ButtonEvent)>,
}

impl ButtonMachine {
    /// Create a machine with the button released
    pub fn new(timing: ButtonTiming) -> Self {
        Self {
            timing,
            sequence: 0,
            pressed: false,
            timer: None,
        }
    }

    /// Instant at which [`Self::on_timer`] should be called, if any
    pub fn deadline(&self) -> Option<u64> {
        self.timer.map(|(at, _)| at)
    }

    /// Feed a raw edge
    ///
    /// Repeated edges in the same direction are ignored.
    pub fn on_edge(&mut self, down: bool, now_ms: u64) -> EdgeEvents {
        let mut out = EdgeEvents::new();
        if down == self.pressed {
            return out;
        }
        self.timer = None;
        self.pressed = down;

        if down {
            let _ = out.push(ButtonEvent::Down);
            match self.sequence {
                0 => self.arm(1, now_ms, self.timing.hold_ms, ButtonEvent::Hold),
                2 => self.arm(3, now_ms, self.timing.click_and_hold_ms, ButtonEvent::ClickAndHold),
                4 => self.arm(5, now_ms, self.timing.triple_click_ms, ButtonEvent::ClickAndHold),
                _ => {}
            }
        } else {
            let _ = out.push(ButtonEvent::Up);
            match self.sequence {
                1 => self.arm(2, now_ms, self.timing.double_click_ms, ButtonEvent::Click),
                3 => self.arm(4, now_ms, self.timing.triple_click_ms, ButtonEvent::DoubleClick),
                5 => {
                    self.sequence = 0;
                    let _ = out.push(ButtonEvent::TripleClick);
                }
                _ => {}
            }
        }
        out
    }

    /// Fire the pending timer if its deadline has passed
    pub fn on_timer(&mut self, now_ms: u64) -> Option<ButtonEvent> {
        let (at, event) = self.timer?;
        if now_ms < at {
            return None;
        }
        self.timer = None;
        self.sequence = 0;
        Some(event)
    }

    fn arm(&mut self, sequence: u8, now_ms: u64, after_ms: u32, event: ButtonEvent) {
        self.sequence = sequence;
        self.timer = Some((now_ms + after_ms as u64, event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> ButtonMachine {
        ButtonMachine::new(ButtonTiming::default())
    }

    #[test]
    fn test_single_click() {
        let mut m = machine();
        assert_eq!(m.on_edge(true, 0).as_slice(), &[ButtonEvent::Down]);
        assert_eq!(m.on_edge(false, 80).as_slice(), &[ButtonEvent::Up]);
        assert_eq!(m.deadline(), Some(230));
        assert_eq!(m.on_timer(200), None);
        assert_eq!(m.on_timer(230), Some(ButtonEvent::Click));
        assert_eq!(m.deadline(), None);
    }

    #[test]
    fn test_hold() {
        let mut m = machine();
        m.on_edge(true, 0);
        assert_eq!(m.on_timer(2000), Some(ButtonEvent::Hold));
        // Release after hold does not start a click
        assert_eq!(m.on_edge(false, 2500).as_slice(), &[ButtonEvent::Up]);
        assert_eq!(m.deadline(), None);
    }

    #[test]
    fn test_double_click() {
        let mut m = machine();
        m.on_edge(true, 0);
        m.on_edge(false, 50);
        m.on_edge(true, 100);
        m.on_edge(false, 150);
        assert_eq!(m.on_timer(300), Some(ButtonEvent::DoubleClick));
    }

    #[test]
    fn test_triple_click() {
        let mut m = machine();
        for (i, t) in [0u64, 50, 100, 150, 200].iter().enumerate() {
            m.on_edge(i % 2 == 0, *t);
        }
        assert_eq!(
            m.on_edge(false, 250).as_slice(),
            &[ButtonEvent::Up, ButtonEvent::TripleClick]
        );
        assert_eq!(m.deadline(), None);
    }

    #[test]
    fn test_click_and_hold() {
        let mut m = machine();
        m.on_edge(true, 0);
        m.on_edge(false, 50);
        m.on_edge(true, 100);
        assert_eq!(m.on_timer(2100), Some(ButtonEvent::ClickAndHold));
    }

    #[test]
    fn test_repeated_edge_ignored() {
        let mut m = machine();
        m.on_edge(true, 0);
        assert!(m.on_edge(true, 10).is_empty());
    }
}
