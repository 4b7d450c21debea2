//! CR14 reader on `/dev/rfid0`
//!
//! Commands written to the device:
//!
//! - `p`: poll once, `P`: poll repeatedly, `i`: go idle
//! - `R` uid(8, LE) count blocks...: read blocks
//! - `W` uid(8, LE) count blocks... data: write blocks
//!
//! Frames read back:
//!
//! - `u` uid(8, LE): a tag answered the inventory
//! - `R` count data(count * 4): blocks read
//! - `W` count data(count * 4): blocks written, read back by the driver
//!
//! The reader only handles ST25TB memories. Removal is inferred when no UID
//! arrives within the removal window while polling repeatedly.

use core::fmt;

use heapless::Vec;
use nabbit_core::tag::layout::{BLOCK_SIZE, READ_BLOCKS, READ_LEN};
use nabbit_core::tag::{
    decode_blocks, encode_write, is_compatible, TagLayoutError, TagSnapshot, TagTechnology, Uid, WritePlan,
};

use super::{push, Outputs, ReaderOutput, ReaderState};

/// UID length on the wire
pub const UID_LEN: usize = 8;

/// Largest block count in a frame
pub const MAX_FRAME_BLOCKS: usize = READ_BLOCKS.len();

/// Largest command: `W`, uid, count, 9 block indices, 36 data bytes
pub const MAX_COMMAND_LEN: usize = 1 + UID_LEN + 1 + 9 + 36;

/// Block payload of a read or write frame
pub type BlockData = Vec<u8, READ_LEN>;

/// Command sent to the reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cr14Command {
    PollOnce,
    PollRepeat,
    Idle,
    Read { uid_le: [u8; UID_LEN] },
    Write { uid_le: [u8; UID_LEN], plan: WritePlan },
}

impl Cr14Command {
    /// Wire bytes
    pub fn encode(&self) -> Vec<u8, MAX_COMMAND_LEN> {
        let mut out = Vec::new();
        match self {
            Cr14Command::PollOnce => {
                let _ = out.push(b'p');
            }
            Cr14Command::PollRepeat => {
                let _ = out.push(b'P');
            }
            Cr14Command::Idle => {
                let _ = out.push(b'i');
            }
            Cr14Command::Read { uid_le } => {
                let _ = out.push(b'R');
                let _ = out.extend_from_slice(uid_le);
                let _ = out.push(READ_BLOCKS.len() as u8);
                let _ = out.extend_from_slice(&READ_BLOCKS);
            }
            Cr14Command::Write { uid_le, plan } => {
                let _ = out.push(b'W');
                let _ = out.extend_from_slice(uid_le);
                let _ = out.push(plan.blocks.len() as u8);
                let _ = out.extend_from_slice(&plan.blocks);
                let _ = out.extend_from_slice(&plan.bytes);
            }
        }
        out
    }
}

/// Frame received from the reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cr14Frame {
    Uid([u8; UID_LEN]),
    Read(BlockData),
    Written(BlockData),
}

/// Errors in the reader byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Cr14Error {
    /// Header byte other than `u`, `R` or `W`
    UnknownHeader(u8),
    /// Block count larger than any command asks for
    TooManyBlocks(u8),
}

impl fmt::Display for Cr14Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cr14Error::UnknownHeader(b) => write!(f, "unexpected packet from rfid reader, header={:#04x}", b),
            Cr14Error::TooManyBlocks(n) => write!(f, "rfid reader sent {} blocks", n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    WaitingForHeader,
    ReadingUid,
    /// Got `R` or `W`, waiting for the block count
    WaitingForCount { written: bool },
    ReadingBlocks { written: bool, len: usize },
}

/// Splits the reader byte stream into frames
#[derive(Debug, Clone)]
pub struct Cr14FrameParser {
    state: ParseState,
    buffer: BlockData,
}

impl Default for Cr14FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Cr14FrameParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::WaitingForHeader,
            buffer: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.state = ParseState::WaitingForHeader;
        self.buffer.clear();
    }

    /// Feed a single byte
    ///
    /// Returns `Ok(Some(frame))` when a frame is complete, `Ok(None)` when
    /// more bytes are needed. After an error the parser waits for the next
    /// header.
    pub fn feed(&mut self, byte: u8) -> Result<Option<Cr14Frame>, Cr14Error> {
        match self.state {
            ParseState::WaitingForHeader => {
                self.buffer.clear();
                self.state = match byte {
                    b'u' => ParseState::ReadingUid,
                    b'R' => ParseState::WaitingForCount { written: false },
                    b'W' => ParseState::WaitingForCount { written: true },
                    other => return Err(Cr14Error::UnknownHeader(other)),
                };
                Ok(None)
            }
            ParseState::ReadingUid => {
                let _ = self.buffer.push(byte);
                if self.buffer.len() < UID_LEN {
                    return Ok(None);
                }
                let mut uid = [0u8; UID_LEN];
                uid.copy_from_slice(&self.buffer);
                self.reset();
                Ok(Some(Cr14Frame::Uid(uid)))
            }
            ParseState::WaitingForCount { written } => {
                if byte as usize > MAX_FRAME_BLOCKS {
                    self.reset();
                    return Err(Cr14Error::TooManyBlocks(byte));
                }
                let len = byte as usize * BLOCK_SIZE;
                if len == 0 {
                    self.reset();
                    return Ok(Some(Self::blocks_frame(written, Vec::new())));
                }
                self.state = ParseState::ReadingBlocks { written, len };
                Ok(None)
            }
            ParseState::ReadingBlocks { written, len } => {
                let _ = self.buffer.push(byte);
                if self.buffer.len() < len {
                    return Ok(None);
                }
                let data = core::mem::take(&mut self.buffer);
                self.reset();
                Ok(Some(Self::blocks_frame(written, data)))
            }
        }
    }

    /// Feed bytes until a frame completes
    ///
    /// Returns the frame (or error) and the number of bytes consumed.
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> (Option<Result<Cr14Frame, Cr14Error>>, usize) {
        for (i, &byte) in bytes.iter().enumerate() {
            match self.feed(byte) {
                Ok(None) => {}
                Ok(Some(frame)) => return (Some(Ok(frame)), i + 1),
                Err(e) => return (Some(Err(e)), i + 1),
            }
        }
        (None, bytes.len())
    }

    fn blocks_frame(written: bool, data: BlockData) -> Cr14Frame {
        if written {
            Cr14Frame::Written(data)
        } else {
            Cr14Frame::Read(data)
        }
    }
}

/// Tag polling and read/write protocol of the CR14
#[derive(Debug, Clone)]
pub struct Cr14Reader {
    state: ReaderState,
    current: Option<TagSnapshot>,
    /// Removal timer
    deadline: Option<u64>,
    removal_window_ms: u32,
    pending_write: Option<(Uid, WritePlan)>,
}

impl Cr14Reader {
    pub fn new(removal_window_ms: u32) -> Self {
        Self {
            state: ReaderState::Disabled,
            current: None,
            deadline: None,
            removal_window_ms,
            pending_write: None,
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Tag currently on the reader
    pub fn current(&self) -> Option<&TagSnapshot> {
        self.current.as_ref()
    }

    /// Next instant [`on_timer`](Self::on_timer) must run at
    pub fn deadline(&self) -> Option<u64> {
        self.deadline
    }

    /// Start looking for tags
    pub fn enable_polling(&mut self) -> Outputs<Cr14Command> {
        let mut out = Outputs::new();
        if self.state == ReaderState::Disabled {
            self.state = ReaderState::PollingOnce;
            push(&mut out, ReaderOutput::Send(Cr14Command::PollOnce));
        }
        out
    }

    pub fn disable_polling(&mut self) -> Outputs<Cr14Command> {
        let mut out = Outputs::new();
        if self.state != ReaderState::Disabled {
            self.state = ReaderState::Disabled;
            self.deadline = None;
            push(&mut out, ReaderOutput::Send(Cr14Command::Idle));
        }
        out
    }

    /// Handle a frame from the device
    pub fn on_frame(&mut self, frame: Cr14Frame, now_ms: u64) -> Outputs<Cr14Command> {
        let mut out = Outputs::new();
        match frame {
            Cr14Frame::Uid(uid_le) => self.on_uid(uid_le, now_ms, &mut out),
            Cr14Frame::Read(data) if self.state == ReaderState::Reading => {
                self.on_read(&data, now_ms, &mut out)
            }
            Cr14Frame::Written(data) if self.state == ReaderState::Writing => {
                let written = match self.pending_write.take() {
                    Some((uid, plan)) if plan.bytes.as_slice() == data.as_slice() => {
                        // No new detection: the tag is still on the reader
                        if let Some(tag) = self.current.as_mut().filter(|t| t.uid == uid) {
                            tag.apply(plan.contents());
                        }
                        true
                    }
                    _ => false,
                };
                self.poll_repeat(now_ms, &mut out);
                push(&mut out, ReaderOutput::WriteDone(written));
            }
            _ => {}
        }
        out
    }

    /// Handle the removal timer
    pub fn on_timer(&mut self, now_ms: u64) -> Outputs<Cr14Command> {
        let mut out = Outputs::new();
        match self.deadline {
            Some(deadline) if now_ms >= deadline => {}
            _ => return out,
        }
        self.deadline = None;
        if let Some(tag) = self.current.take() {
            push(&mut out, ReaderOutput::Tag(tag.removed()));
        }
        if self.state != ReaderState::Disabled {
            self.state = ReaderState::PollingOnce;
            push(&mut out, ReaderOutput::Send(Cr14Command::PollOnce));
        }
        out
    }

    /// Write a formatted layout to the tag with `uid`
    ///
    /// Pre-empts polling. The write resolves with
    /// [`ReaderOutput::WriteDone`] once the reader sent the data back.
    pub fn start_write(
        &mut self,
        uid: &Uid,
        picture: u8,
        app: u8,
        data: &[u8],
    ) -> Result<Outputs<Cr14Command>, TagLayoutError> {
        let plan = encode_write(picture, app, data)?;
        let uid_le = Self::wire_uid(uid)?;
        self.state = ReaderState::Writing;
        self.deadline = None;
        self.pending_write = Some((uid.clone(), plan.clone()));
        let mut out = Outputs::new();
        push(&mut out, ReaderOutput::Send(Cr14Command::Write { uid_le, plan }));
        Ok(out)
    }

    /// Abandon a pending write, e.g. on timeout, and resume polling
    pub fn cancel_write(&mut self) -> Outputs<Cr14Command> {
        let mut out = Outputs::new();
        if self.state == ReaderState::Writing {
            self.pending_write = None;
            self.state = ReaderState::PollingOnce;
            push(&mut out, ReaderOutput::Send(Cr14Command::PollOnce));
        }
        out
    }

    fn on_uid(&mut self, uid_le: [u8; UID_LEN], now_ms: u64, out: &mut Outputs<Cr14Command>) {
        if !matches!(self.state, ReaderState::PollingOnce | ReaderState::PollingRepeat) {
            return;
        }
        self.deadline = None;
        let uid = Uid::from_le(&uid_le);
        if let Some(current) = self.current.take() {
            if current.uid == uid {
                self.current = Some(current);
                self.arm(now_ms);
                return;
            }
            push(out, ReaderOutput::Tag(current.removed()));
        }

        let tag = TagSnapshot::unreadable(TagTechnology::St25tb, uid);
        if is_compatible(&tag.uid) {
            self.current = Some(tag);
            self.state = ReaderState::Reading;
            push(out, ReaderOutput::Send(Cr14Command::Read { uid_le }));
            self.arm(now_ms);
        } else {
            push(out, ReaderOutput::Tag(tag.clone()));
            self.current = Some(tag);
            self.poll_repeat(now_ms, out);
        }
    }

    fn on_read(&mut self, data: &[u8], now_ms: u64, out: &mut Outputs<Cr14Command>) {
        self.deadline = None;
        if let Some(tag) = self.current.as_mut() {
            if let Ok(decoded) = decode_blocks(data) {
                tag.apply(decoded);
            }
            push(out, ReaderOutput::Tag(tag.clone()));
        }
        self.poll_repeat(now_ms, out);
    }

    fn poll_repeat(&mut self, now_ms: u64, out: &mut Outputs<Cr14Command>) {
        self.state = ReaderState::PollingRepeat;
        push(out, ReaderOutput::Send(Cr14Command::PollRepeat));
        self.arm(now_ms);
    }

    fn arm(&mut self, now_ms: u64) {
        self.deadline = Some(now_ms + self.removal_window_ms as u64);
    }

    fn wire_uid(uid: &Uid) -> Result<[u8; UID_LEN], TagLayoutError> {
        let le = uid.to_le();
        if le.len() != UID_LEN {
            return Err(TagLayoutError::InvalidUid);
        }
        let mut out = [0u8; UID_LEN];
        out.copy_from_slice(&le);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nabbit_core::tag::TagFlags;

    /// SRI512 UID, little-endian as on the wire
    const UID_LE: [u8; UID_LEN] = [0x08, 0x07, 0x06, 0x05, 0x04, 0x1A, 0x02, 0xD0];

    fn formatted_read() -> BlockData {
        let mut data = BlockData::new();
        // Signature block reversed: app 5, picture 3, 'b', 'N'
        data.extend_from_slice(&[5, 3, b'b', b'N']).unwrap();
        data.extend_from_slice(b"hi\xff\xff").unwrap();
        while data.len() < READ_LEN - BLOCK_SIZE {
            data.push(0xFF).unwrap();
        }
        data.extend_from_slice(&[0xFF; 4]).unwrap();
        data
    }

    fn detected(reader: &mut Cr14Reader) -> TagSnapshot {
        reader.enable_polling();
        let out = reader.on_frame(Cr14Frame::Uid(UID_LE), 0);
        assert_eq!(out[0], ReaderOutput::Send(Cr14Command::Read { uid_le: UID_LE }));
        assert_eq!(reader.state(), ReaderState::Reading);
        let out = reader.on_frame(Cr14Frame::Read(formatted_read()), 10);
        match &out[0] {
            ReaderOutput::Tag(tag) => tag.clone(),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parser_frames() {
        let mut parser = Cr14FrameParser::new();
        let mut stream = std::vec![b'u'];
        stream.extend_from_slice(&UID_LE);
        stream.extend_from_slice(&[b'W', 1, 1, 2, 3, 4]);

        let (frame, used) = parser.feed_bytes(&stream);
        assert_eq!(frame, Some(Ok(Cr14Frame::Uid(UID_LE))));
        let (frame, _) = parser.feed_bytes(&stream[used..]);
        let Some(Ok(Cr14Frame::Written(data))) = frame else {
            panic!("expected write frame");
        };
        assert_eq!(data.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_parser_errors() {
        let mut parser = Cr14FrameParser::new();
        assert_eq!(parser.feed(b'x'), Err(Cr14Error::UnknownHeader(b'x')));
        assert_eq!(parser.feed(b'R'), Ok(None));
        assert_eq!(parser.feed(200), Err(Cr14Error::TooManyBlocks(200)));
        assert_eq!(parser.feed(b'u'), Ok(None));
    }

    #[test]
    fn test_read_command_bytes() {
        let bytes = Cr14Command::Read { uid_le: UID_LE }.encode();
        assert_eq!(bytes[0], b'R');
        assert_eq!(&bytes[1..9], &UID_LE);
        assert_eq!(bytes[9], 10);
        assert_eq!(&bytes[10..], &READ_BLOCKS);
    }

    #[test]
    fn test_detect_formatted_tag() {
        let mut reader = Cr14Reader::new(1000);
        let tag = detected(&mut reader);
        assert_eq!(tag.picture, Some(3));
        assert_eq!(tag.app, Some(5));
        assert!(tag.flags.contains(TagFlags::FORMATTED));
        assert_eq!(tag.data_text(), Some(&b"hi"[..]));
        assert_eq!(reader.state(), ReaderState::PollingRepeat);
        assert_eq!(reader.deadline(), Some(1010));
    }

    #[test]
    fn test_same_uid_rearms_timer() {
        let mut reader = Cr14Reader::new(1000);
        detected(&mut reader);
        let out = reader.on_frame(Cr14Frame::Uid(UID_LE), 500);
        assert!(out.is_empty());
        assert_eq!(reader.deadline(), Some(1500));
        assert!(reader.on_timer(1200).is_empty());
    }

    #[test]
    fn test_removal_after_window() {
        let mut reader = Cr14Reader::new(1000);
        detected(&mut reader);
        let out = reader.on_timer(1010);
        let ReaderOutput::Tag(tag) = &out[0] else {
            panic!("expected removal");
        };
        assert!(tag.flags.contains(TagFlags::REMOVED));
        assert_eq!(tag.app, Some(5));
        assert_eq!(out[1], ReaderOutput::Send(Cr14Command::PollOnce));
        assert_eq!(reader.state(), ReaderState::PollingOnce);
    }

    #[test]
    fn test_other_tag_replaces_current() {
        let mut reader = Cr14Reader::new(1000);
        detected(&mut reader);
        let mut other = UID_LE;
        other[0] = 0x99;
        let out = reader.on_frame(Cr14Frame::Uid(other), 100);
        assert!(matches!(&out[0], ReaderOutput::Tag(t) if t.flags.contains(TagFlags::REMOVED)));
        assert_eq!(out[1], ReaderOutput::Send(Cr14Command::Read { uid_le: other }));
    }

    #[test]
    fn test_incompatible_tag_reported_once() {
        let mut reader = Cr14Reader::new(1000);
        reader.enable_polling();
        let foreign = [1, 2, 3, 4, 5, 6, 7, 8];
        let out = reader.on_frame(Cr14Frame::Uid(foreign), 0);
        assert!(matches!(&out[0], ReaderOutput::Tag(t) if t.flags == TagFlags::UNKNOWN_PICC));
        assert_eq!(out[1], ReaderOutput::Send(Cr14Command::PollRepeat));
        assert_eq!(reader.state(), ReaderState::PollingRepeat);

        // Still there: no second event, no read
        assert!(reader.on_frame(Cr14Frame::Uid(foreign), 400).is_empty());

        let out = reader.on_timer(1400);
        assert!(matches!(&out[0], ReaderOutput::Tag(t) if t.flags.contains(TagFlags::REMOVED)));
    }

    #[test]
    fn test_write_verified() {
        let mut reader = Cr14Reader::new(1000);
        detected(&mut reader);
        let uid = Uid::from_le(&UID_LE);
        let out = reader.start_write(&uid, 1, 9, b"paris").unwrap();
        let ReaderOutput::Send(Cr14Command::Write { plan, .. }) = &out[0] else {
            panic!("expected write command");
        };
        assert_eq!(reader.deadline(), None);

        let echoed = BlockData::from_slice(&plan.bytes).unwrap();
        let out = reader.on_frame(Cr14Frame::Written(echoed), 50);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], ReaderOutput::Send(Cr14Command::PollRepeat));
        assert_eq!(out[1], ReaderOutput::WriteDone(true));

        // Removal reports the written content, not the one read before
        let out = reader.on_timer(1050);
        let ReaderOutput::Tag(tag) = &out[0] else {
            panic!("expected removal");
        };
        assert!(tag.flags.contains(TagFlags::REMOVED));
        assert_eq!(tag.picture, Some(1));
        assert_eq!(tag.app, Some(9));
    }

    #[test]
    fn test_write_mismatch_fails() {
        let mut reader = Cr14Reader::new(1000);
        let uid = Uid::from_le(&UID_LE);
        reader.start_write(&uid, 1, 9, b"paris").unwrap();
        let out = reader.on_frame(Cr14Frame::Written(BlockData::from_slice(&[0; 8]).unwrap()), 0);
        assert_eq!(out[1], ReaderOutput::WriteDone(false));
    }

    #[test]
    fn test_write_needs_eight_byte_uid() {
        let mut reader = Cr14Reader::new(1000);
        let uid = Uid::from_be(&[1, 2, 3, 4]);
        assert_eq!(reader.start_write(&uid, 1, 1, b"").unwrap_err(), TagLayoutError::InvalidUid);
    }
}
