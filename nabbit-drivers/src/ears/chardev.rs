//! Kernel ear driver byte protocol
//!
//! Commands written to `/dev/earN`:
//!
//! | Bytes | Meaning |
//! |---|---|
//! | `?` | report the position without moving |
//! | `!` | report the position, detecting it first if unknown |
//! | `>` pos / `<` pos | go to `pos` forward / backward |
//! | `+` delta / `-` delta | move by `delta` forward / backward |
//! | `.` | block until the motor stopped |
//!
//! The device answers with single bytes: `m` when the ear was moved by
//! hand, `0xFF` when the position is unknown, otherwise the position.
//! End of file means the ear is broken.

use heapless::Vec;
use nabbit_core::traits::Direction;

/// Command to the ear device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EarCommand {
    Query,
    Detect,
    Go { position: u8, dir: Direction },
    Move { delta: u8, dir: Direction },
    Sync,
}

impl EarCommand {
    /// Wire bytes
    pub fn encode(&self) -> Vec<u8, 2> {
        let mut out = Vec::new();
        let (op, arg) = match *self {
            EarCommand::Query => (b'?', None),
            EarCommand::Detect => (b'!', None),
            EarCommand::Go { position, dir: Direction::Forward } => (b'>', Some(position)),
            EarCommand::Go { position, dir: Direction::Backward } => (b'<', Some(position)),
            EarCommand::Move { delta, dir: Direction::Forward } => (b'+', Some(delta)),
            EarCommand::Move { delta, dir: Direction::Backward } => (b'-', Some(delta)),
            EarCommand::Sync => (b'.', None),
        };
        let _ = out.push(op);
        if let Some(arg) = arg {
            let _ = out.push(arg);
        }
        out
    }
}

/// Byte reported by the ear device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EarReport {
    /// Ear turned by hand
    Moved,
    /// Position unknown
    Unknown,
    Position(u8),
}

impl EarReport {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            b'm' => EarReport::Moved,
            0xFF => EarReport::Unknown,
            pos => EarReport::Position(pos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_commands() {
        assert_eq!(EarCommand::Query.encode().as_slice(), b"?");
        assert_eq!(EarCommand::Detect.encode().as_slice(), b"!");
        assert_eq!(EarCommand::Sync.encode().as_slice(), b".");
        assert_eq!(
            EarCommand::Go { position: 20, dir: Direction::Forward }.encode().as_slice(),
            &[b'>', 20]
        );
        assert_eq!(
            EarCommand::Move { delta: 3, dir: Direction::Backward }.encode().as_slice(),
            &[b'-', 3]
        );
    }

    #[test]
    fn test_reports() {
        assert_eq!(EarReport::from_byte(b'm'), EarReport::Moved);
        assert_eq!(EarReport::from_byte(0xFF), EarReport::Unknown);
        assert_eq!(EarReport::from_byte(16), EarReport::Position(16));
    }
}
