//! Notch detection
//!
//! While detecting, the motor turns forward and every edge is timestamped.
//! Holes are evenly spaced except at the notch, so a gap longer than
//! `notch_gap_ms` between two edges means the notch was just passed. A gap
//! that is still open when the quiet poll fires means the arm is sitting in
//! the notch right now.

/// Outcome of feeding the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NotchFound {
    /// The edge just seen is the first hole after the notch
    Passed,
    /// The arm is inside the notch; the next edge is hole 0
    Inside,
}

/// Tracks edge timing for one ear during detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotchDetector {
    last_rising_ms: u64,
    notch_gap_ms: u32,
    found: Option<NotchFound>,
}

impl NotchDetector {
    /// Start timing from `now_ms`, when the motor was switched on
    pub fn new(now_ms: u64, notch_gap_ms: u32) -> Self {
        Self {
            last_rising_ms: now_ms,
            notch_gap_ms,
            found: None,
        }
    }

    /// Record an encoder edge
    pub fn on_edge(&mut self, now_ms: u64) -> Option<NotchFound> {
        let gap = now_ms.saturating_sub(self.last_rising_ms);
        self.last_rising_ms = now_ms;
        if self.found.is_none() && gap > self.notch_gap_ms as u64 {
            self.found = Some(NotchFound::Passed);
            return self.found;
        }
        None
    }

    /// Check the open gap when no edge arrived during a poll interval
    pub fn on_quiet(&mut self, now_ms: u64) -> Option<NotchFound> {
        if self.found.is_none() && self.quiet_for(now_ms) > self.notch_gap_ms as u64 {
            self.found = Some(NotchFound::Inside);
            return self.found;
        }
        None
    }

    /// Time since the last edge
    pub fn quiet_for(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_rising_ms)
    }

    /// Notch observation, if any
    pub fn found(&self) -> Option<NotchFound> {
        self.found
    }

    /// Position the arm will report once stopped on the hole after the notch
    pub fn overrun(&self) -> u8 {
        match self.found {
            Some(NotchFound::Passed) => 1,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_edges_do_not_trigger() {
        let mut det = NotchDetector::new(0, 400);
        for t in (150..1500).step_by(150) {
            assert_eq!(det.on_edge(t), None);
        }
        assert_eq!(det.found(), None);
    }

    #[test]
    fn test_gap_between_edges_is_notch() {
        let mut det = NotchDetector::new(0, 400);
        assert_eq!(det.on_edge(150), None);
        assert_eq!(det.on_edge(600), Some(NotchFound::Passed));
        assert_eq!(det.overrun(), 1);
        // Only reported once
        assert_eq!(det.on_edge(1100), None);
    }

    #[test]
    fn test_quiet_gap_is_inside_notch() {
        let mut det = NotchDetector::new(0, 400);
        assert_eq!(det.on_edge(150), None);
        assert_eq!(det.on_quiet(450), None);
        assert_eq!(det.on_quiet(600), Some(NotchFound::Inside));
        assert_eq!(det.overrun(), 0);
    }
}
