//! Events that trigger state transitions

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// A queued command, message or self-test starts playing
    BeginPlayback,
    /// The queue went empty after playback
    QueueDrained,
    /// A connection became the interactive owner
    EnterInteractive,
    /// The interactive owner released the robot (mode idle or disconnect)
    ExitInteractive,
    /// A queued sleep request was serviced
    Sleep,
    /// A wakeup packet arrived while asleep
    Wakeup,
}
