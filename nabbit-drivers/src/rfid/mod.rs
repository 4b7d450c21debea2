//! Contactless tag readers
//!
//! Both readers are pure state machines: the owner feeds decoded device
//! frames and timer expiries, and executes the returned [`ReaderOutput`]s
//! (send a command, report a tag, resolve a pending write). Each reader
//! exposes the next instant it wants to be woken at with `deadline()`.
//!
//! - [`cr14`]: the CR14 character device (`/dev/rfid0`), ST25TB tags only
//! - [`st25`]: the ST25R391x NFC reader (`/dev/nfc0`), with one operation
//!   state machine per tag family

pub mod cr14;
pub mod st25;

use heapless::Vec;
use nabbit_core::tag::TagSnapshot;

pub use cr14::{Cr14Command, Cr14Frame, Cr14FrameParser, Cr14Reader};
pub use st25::{NfcMessage, NfcReader, NfcRequest, TagFamily};

/// Reader state shared by both chips
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReaderState {
    Disabled,
    /// Looking for a tag, nothing present
    PollingOnce,
    /// A tag is present; waiting for it to go away
    PollingRepeat,
    /// Re-selecting a tag before a write
    Selecting,
    Reading,
    Writing,
}

/// Action requested by a reader state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderOutput<C> {
    /// Send a command to the device
    Send(C),
    /// Report a detection or removal
    Tag(TagSnapshot),
    /// Resolve the pending write
    WriteDone(bool),
}

/// Outputs of a single step
pub type Outputs<C> = Vec<ReaderOutput<C>, 4>;

fn push<C>(outputs: &mut Outputs<C>, output: ReaderOutput<C>) {
    // At most four outputs per step: removal, detection, write, command
    let _ = outputs.push(output);
}
