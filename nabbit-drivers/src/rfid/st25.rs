//! ST25R391x NFC reader on `/dev/nfc0`
//!
//! The reader discovers tags of any technology and selects the first one it
//! finds. What happens next depends on the tag family picked at discovery:
//! ST25TB memories are read block by block (and can be written), other
//! families are only reported with [`TagFlags::UNKNOWN_PICC`].
//!
//! Message framing on the character device is handled by the owner; this
//! module works on decoded [`NfcMessage`]s and produces [`NfcRequest`]s.

use heapless::Vec;
use nabbit_core::tag::layout::{BLOCK_SIZE, READ_BLOCKS, READ_LEN};
use nabbit_core::tag::{
    decode_blocks, encode_write, is_compatible, TagFlags, TagLayoutError, TagSnapshot, TagTechnology, Uid,
    WritePlan,
};

use super::{push, Outputs, ReaderOutput, ReaderState};

/// ST25TB read block command
pub const ST25TB_READ_BLOCK: u8 = 0x08;
/// ST25TB write block command
pub const ST25TB_WRITE_BLOCK: u8 = 0x09;

/// Bytes received for a block read: data and CRC
const READ_RX_LEN: usize = BLOCK_SIZE + 2;

/// Tag identifier as the reader transmits it
pub type NativeId = Vec<u8, 10>;

/// Transceive payload
pub type Frame = Vec<u8, 8>;

/// Message received from the reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NfcMessage {
    /// Discovery or selection found a tag
    SelectedTag { tech: TagTechnology, native_id: NativeId },
    /// The reader acknowledged an idle request
    IdleAck,
    /// Answer to a transceive request
    Transceived { error: bool, data: Frame },
}

/// Request sent to the reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NfcRequest {
    /// Discover and select tags of any technology
    Discover,
    Idle,
    Select { tech: TagTechnology, native_id: NativeId },
    Transceive { data: Frame, tx_only: bool },
}

/// Tag family, selected from the technology at discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TagFamily {
    St25tb,
    Unsupported,
}

impl TagFamily {
    pub fn of(tech: TagTechnology) -> Self {
        match tech {
            TagTechnology::St25tb => TagFamily::St25tb,
            _ => TagFamily::Unsupported,
        }
    }

    /// UID (most significant byte first) from the native id
    pub fn uid(self, native_id: &[u8]) -> Uid {
        match self {
            TagFamily::St25tb => Uid::from_le(native_id),
            TagFamily::Unsupported => Uid::from_be(native_id),
        }
    }

    /// Native id from the UID
    pub fn native_id(self, uid: &Uid) -> NativeId {
        let mut id = NativeId::new();
        let _ = id.extend_from_slice(uid.as_bytes());
        if self == TagFamily::St25tb {
            id.reverse();
        }
        id
    }
}

/// Next step of a tag operation
#[derive(Debug, Clone, PartialEq, Eq)]
enum OpStep {
    Send(NfcRequest),
    /// Send after the tag had time to program the block
    SendAfter(NfcRequest, u32),
    ReadDone(Option<Vec<u8, READ_LEN>>),
    WriteDone(bool),
}

/// Reads [`READ_BLOCKS`] from an ST25TB, system block last
#[derive(Debug, Clone)]
struct ReadSt25 {
    next: usize,
    data: Vec<u8, READ_LEN>,
}

impl ReadSt25 {
    fn new() -> (Self, NfcRequest) {
        (Self { next: 0, data: Vec::new() }, read_block(READ_BLOCKS[0]))
    }

    fn on_frame(&mut self, error: bool, rx: &[u8]) -> OpStep {
        if error || rx.len() != READ_RX_LEN {
            return OpStep::ReadDone(None);
        }
        let _ = self.data.extend_from_slice(&rx[..BLOCK_SIZE]);
        self.next += 1;
        match READ_BLOCKS.get(self.next) {
            Some(&block) => OpStep::Send(read_block(block)),
            None => OpStep::ReadDone(Some(core::mem::take(&mut self.data))),
        }
    }
}

/// Writes a plan to an ST25TB, then reads the system block to check the
/// tag is still there; the tag does not acknowledge writes.
#[derive(Debug, Clone)]
struct WriteSt25 {
    plan: WritePlan,
    next: usize,
    delay_ms: u32,
}

impl WriteSt25 {
    fn new(plan: WritePlan, delay_ms: u32) -> (Self, NfcRequest) {
        let op = Self { plan, next: 0, delay_ms };
        let first = op.request();
        (op, first)
    }

    fn request(&self) -> NfcRequest {
        match self.plan.blocks.get(self.next) {
            Some(&block) => {
                let mut data = Frame::new();
                let _ = data.push(ST25TB_WRITE_BLOCK);
                let _ = data.push(block);
                let _ = data.extend_from_slice(self.plan.block_bytes(self.next));
                NfcRequest::Transceive { data, tx_only: true }
            }
            None => read_block(0xFF),
        }
    }

    fn on_frame(&mut self, error: bool, rx: &[u8]) -> OpStep {
        let finished = self.next >= self.plan.blocks.len();
        if error {
            return OpStep::WriteDone(false);
        }
        if finished {
            return OpStep::WriteDone(rx.len() == READ_RX_LEN);
        }
        if !rx.is_empty() {
            return OpStep::WriteDone(false);
        }
        self.next += 1;
        OpStep::SendAfter(self.request(), self.delay_ms)
    }
}

fn read_block(block: u8) -> NfcRequest {
    let mut data = Frame::new();
    let _ = data.push(ST25TB_READ_BLOCK);
    let _ = data.push(block);
    NfcRequest::Transceive { data, tx_only: false }
}

#[derive(Debug, Clone)]
enum Operation {
    Read(ReadSt25),
    Write(WriteSt25),
}

/// Polling, selection and per-family operations of the NFC reader
#[derive(Debug, Clone)]
pub struct NfcReader {
    state: ReaderState,
    current: Option<TagSnapshot>,
    operation: Option<Operation>,
    /// Write waiting for its tag to be selected
    pending_write: Option<WritePlan>,
    removal_deadline: Option<u64>,
    delayed: Option<(u64, NfcRequest)>,
    removal_window_ms: u32,
    block_write_delay_ms: u32,
}

impl NfcReader {
    pub fn new(removal_window_ms: u32, block_write_delay_ms: u32) -> Self {
        Self {
            state: ReaderState::Disabled,
            current: None,
            operation: None,
            pending_write: None,
            removal_deadline: None,
            delayed: None,
            removal_window_ms,
            block_write_delay_ms,
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn current(&self) -> Option<&TagSnapshot> {
        self.current.as_ref()
    }

    /// Next instant [`on_timer`](Self::on_timer) must run at
    pub fn deadline(&self) -> Option<u64> {
        match (self.removal_deadline, self.delayed.as_ref().map(|(at, _)| *at)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn enable_polling(&mut self) -> Outputs<NfcRequest> {
        let mut out = Outputs::new();
        if self.state == ReaderState::Disabled {
            self.state = ReaderState::PollingOnce;
            push(&mut out, ReaderOutput::Send(NfcRequest::Discover));
        }
        out
    }

    pub fn disable_polling(&mut self) -> Outputs<NfcRequest> {
        let mut out = Outputs::new();
        if self.state != ReaderState::Disabled {
            self.operation = None;
            self.state = ReaderState::Disabled;
            self.removal_deadline = None;
            push(&mut out, ReaderOutput::Send(NfcRequest::Idle));
        }
        out
    }

    /// Handle a message from the device
    pub fn on_message(&mut self, message: NfcMessage, now_ms: u64) -> Outputs<NfcRequest> {
        let mut out = Outputs::new();
        match message {
            NfcMessage::SelectedTag { tech, native_id } => self.on_selected(tech, &native_id, now_ms, &mut out),
            NfcMessage::IdleAck => match self.state {
                ReaderState::PollingOnce | ReaderState::PollingRepeat => {
                    push(&mut out, ReaderOutput::Send(NfcRequest::Discover));
                }
                ReaderState::Selecting => {
                    if let Some(request) = self.select_request() {
                        push(&mut out, ReaderOutput::Send(request));
                    }
                }
                ReaderState::Disabled => {}
                _ => {
                    // Idle ack in the middle of an operation
                    self.operation = None;
                    self.state = ReaderState::PollingOnce;
                    push(&mut out, ReaderOutput::Send(NfcRequest::Discover));
                }
            },
            NfcMessage::Transceived { error, data } => self.on_transceived(error, &data, now_ms, &mut out),
        }
        out
    }

    /// Handle timers: delayed block writes and tag removal
    pub fn on_timer(&mut self, now_ms: u64) -> Outputs<NfcRequest> {
        let mut out = Outputs::new();
        if let Some((at, _)) = &self.delayed {
            if now_ms >= *at {
                if let Some((_, request)) = self.delayed.take() {
                    push(&mut out, ReaderOutput::Send(request));
                }
            }
        }
        match self.removal_deadline {
            Some(deadline) if now_ms >= deadline => {}
            _ => return out,
        }
        self.removal_deadline = None;
        if let Some(tag) = self.current.take() {
            push(&mut out, ReaderOutput::Tag(tag.removed()));
        }
        if !matches!(self.state, ReaderState::Disabled | ReaderState::PollingOnce) {
            self.state = ReaderState::PollingOnce;
            push(&mut out, ReaderOutput::Send(NfcRequest::Discover));
        }
        out
    }

    /// Select the tag with `uid` and write a formatted layout to it
    ///
    /// Only ST25TB tags can be written; other technologies are refused with
    /// [`TagLayoutError::InvalidUid`].
    pub fn start_write(
        &mut self,
        tech: TagTechnology,
        uid: &Uid,
        picture: u8,
        app: u8,
        data: &[u8],
    ) -> Result<Outputs<NfcRequest>, TagLayoutError> {
        if TagFamily::of(tech) != TagFamily::St25tb {
            return Err(TagLayoutError::InvalidUid);
        }
        let plan = encode_write(picture, app, data)?;
        self.removal_deadline = None;
        self.operation = None;
        self.pending_write = Some(plan);
        self.current = Some(TagSnapshot::unreadable(tech, uid.clone()));
        self.state = ReaderState::Selecting;
        let mut out = Outputs::new();
        if let Some(request) = self.select_request() {
            push(&mut out, ReaderOutput::Send(request));
        }
        Ok(out)
    }

    /// Abandon a pending write and go back to discovery
    pub fn cancel_write(&mut self) -> Outputs<NfcRequest> {
        let mut out = Outputs::new();
        if self.pending_write.take().is_some() || matches!(self.operation, Some(Operation::Write(_))) {
            self.delayed = None;
            self.to_polling_once(&mut out);
        }
        out
    }

    fn select_request(&self) -> Option<NfcRequest> {
        let tag = self.current.as_ref()?;
        Some(NfcRequest::Select {
            tech: tag.tech,
            native_id: TagFamily::of(tag.tech).native_id(&tag.uid),
        })
    }

    fn on_selected(&mut self, tech: TagTechnology, native_id: &[u8], now_ms: u64, out: &mut Outputs<NfcRequest>) {
        let family = TagFamily::of(tech);
        let uid = family.uid(native_id);

        if self.state == ReaderState::Selecting {
            let selected = self.current.as_ref().is_some_and(|t| t.tech == tech && t.uid == uid);
            if let (true, Some(plan)) = (selected, self.pending_write.take()) {
                let (op, first) = WriteSt25::new(plan, self.block_write_delay_ms);
                self.operation = Some(Operation::Write(op));
                self.state = ReaderState::Writing;
                push(out, ReaderOutput::Send(first));
            }
            return;
        }
        if !matches!(self.state, ReaderState::PollingOnce | ReaderState::PollingRepeat) {
            return;
        }
        if uid.is_empty() {
            self.to_polling_repeat(now_ms, out);
            return;
        }

        self.removal_deadline = None;
        if let Some(current) = self.current.take() {
            if current.uid == uid && current.tech == tech {
                self.current = Some(current);
                self.to_polling_repeat(now_ms, out);
                return;
            }
            push(out, ReaderOutput::Tag(current.removed()));
        }

        let tag = TagSnapshot::unreadable(tech, uid);
        if family == TagFamily::St25tb && is_compatible(&tag.uid) {
            self.current = Some(tag);
            let (op, first) = ReadSt25::new();
            self.operation = Some(Operation::Read(op));
            self.state = ReaderState::Reading;
            push(out, ReaderOutput::Send(first));
        } else {
            push(out, ReaderOutput::Tag(tag.clone()));
            self.current = Some(tag);
            self.to_polling_repeat(now_ms, out);
        }
    }

    fn on_transceived(&mut self, error: bool, rx: &[u8], now_ms: u64, out: &mut Outputs<NfcRequest>) {
        let step = match self.operation.as_mut() {
            Some(Operation::Read(op)) => op.on_frame(error, rx),
            Some(Operation::Write(op)) => op.on_frame(error, rx),
            None => return,
        };
        match step {
            OpStep::Send(request) => push(out, ReaderOutput::Send(request)),
            OpStep::SendAfter(request, delay_ms) => {
                self.delayed = Some((now_ms + delay_ms as u64, request));
            }
            OpStep::ReadDone(data) => {
                if let Some(tag) = self.current.as_mut() {
                    match data.as_deref().map(decode_blocks) {
                        Some(Ok(decoded)) => tag.apply(decoded),
                        // I/O problem, maybe removed; the timer will tell
                        _ => tag.flags = TagFlags::UNKNOWN_PICC,
                    }
                    push(out, ReaderOutput::Tag(tag.clone()));
                }
                self.to_polling_repeat(now_ms, out);
            }
            OpStep::WriteDone(ok) => {
                if let (true, Some(Operation::Write(op))) = (ok, self.operation.as_ref()) {
                    if let Some(tag) = self.current.as_mut() {
                        tag.apply(op.plan.contents());
                    }
                }
                self.to_polling_once(out);
                push(out, ReaderOutput::WriteDone(ok));
            }
        }
    }

    /// Tag present: idle, then rediscover to learn when it leaves
    fn to_polling_repeat(&mut self, now_ms: u64, out: &mut Outputs<NfcRequest>) {
        self.operation = None;
        self.state = ReaderState::PollingRepeat;
        self.removal_deadline = Some(now_ms + self.removal_window_ms as u64);
        push(out, ReaderOutput::Send(NfcRequest::Idle));
    }

    fn to_polling_once(&mut self, out: &mut Outputs<NfcRequest>) {
        self.operation = None;
        self.state = ReaderState::PollingOnce;
        push(out, ReaderOutput::Send(NfcRequest::Idle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UID_BE: [u8; 8] = [0xD0, 0x02, 0x1A, 0x04, 0x05, 0x06, 0x07, 0x08];

    fn native() -> NativeId {
        let mut id = NativeId::from_slice(&UID_BE).unwrap();
        id.reverse();
        id
    }

    fn block_rx(bytes: [u8; 4]) -> NfcMessage {
        let mut data = Frame::from_slice(&bytes).unwrap();
        data.extend_from_slice(&[0xAA, 0xBB]).unwrap();
        NfcMessage::Transceived { error: false, data }
    }

    fn selected() -> NfcMessage {
        NfcMessage::SelectedTag {
            tech: TagTechnology::St25tb,
            native_id: native(),
        }
    }

    /// Answer every read of a blank tag and return the reported snapshot
    fn read_blank_tag(reader: &mut NfcReader) -> TagSnapshot {
        reader.enable_polling();
        let mut out = reader.on_message(selected(), 0);
        for _ in 0..READ_BLOCKS.len() {
            assert!(matches!(out[0], ReaderOutput::Send(NfcRequest::Transceive { .. })));
            out = reader.on_message(block_rx([0xFF; 4]), 1);
        }
        match &out[0] {
            ReaderOutput::Tag(tag) => tag.clone(),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_family_uid_order() {
        let uid = TagFamily::St25tb.uid(&native());
        assert_eq!(uid.as_bytes(), &UID_BE);
        assert_eq!(TagFamily::St25tb.native_id(&uid), native());
        assert_eq!(TagFamily::of(TagTechnology::Iso14443A), TagFamily::Unsupported);
    }

    #[test]
    fn test_read_blank_st25tb() {
        let mut reader = NfcReader::new(1500, 7);
        let tag = read_blank_tag(&mut reader);
        assert!(tag.flags.contains(TagFlags::CLEAR));
        assert_eq!(tag.uid.as_bytes(), &UID_BE);
        assert_eq!(reader.state(), ReaderState::PollingRepeat);
        assert_eq!(reader.deadline(), Some(1501));
    }

    #[test]
    fn test_read_error_reports_unknown() {
        let mut reader = NfcReader::new(1500, 7);
        reader.enable_polling();
        reader.on_message(selected(), 0);
        let out = reader.on_message(NfcMessage::Transceived { error: true, data: Frame::new() }, 5);
        assert!(matches!(&out[0], ReaderOutput::Tag(t) if t.flags == TagFlags::UNKNOWN_PICC));
        assert_eq!(out[1], ReaderOutput::Send(NfcRequest::Idle));
    }

    #[test]
    fn test_idle_ack_restarts_discovery() {
        let mut reader = NfcReader::new(1500, 7);
        read_blank_tag(&mut reader);
        let out = reader.on_message(NfcMessage::IdleAck, 2);
        assert_eq!(out[0], ReaderOutput::Send(NfcRequest::Discover));
        // Same tag again only rearms the removal timer
        let out = reader.on_message(selected(), 1000);
        assert_eq!(out.len(), 1);
        assert_eq!(reader.deadline(), Some(2500));
    }

    #[test]
    fn test_removal() {
        let mut reader = NfcReader::new(1500, 7);
        read_blank_tag(&mut reader);
        let out = reader.on_timer(1501);
        assert!(matches!(&out[0], ReaderOutput::Tag(t) if t.flags.contains(TagFlags::REMOVED)));
        assert_eq!(out[1], ReaderOutput::Send(NfcRequest::Discover));
        assert!(reader.current().is_none());
    }

    #[test]
    fn test_unsupported_family_reported() {
        let mut reader = NfcReader::new(1500, 7);
        reader.enable_polling();
        let out = reader.on_message(
            NfcMessage::SelectedTag {
                tech: TagTechnology::Iso14443A,
                native_id: NativeId::from_slice(&[4, 3, 2, 1]).unwrap(),
            },
            0,
        );
        let ReaderOutput::Tag(tag) = &out[0] else {
            panic!("expected tag");
        };
        assert_eq!(tag.tech, TagTechnology::Iso14443A);
        assert_eq!(tag.uid.as_bytes(), &[4, 3, 2, 1]);
        assert_eq!(tag.flags, TagFlags::UNKNOWN_PICC);
    }

    #[test]
    fn test_write_selects_then_writes_blocks() {
        let mut reader = NfcReader::new(1500, 7);
        read_blank_tag(&mut reader);
        let uid = Uid::from_be(&UID_BE);
        let out = reader.start_write(TagTechnology::St25tb, &uid, 2, 8, b"").unwrap();
        assert_eq!(
            out[0],
            ReaderOutput::Send(NfcRequest::Select { tech: TagTechnology::St25tb, native_id: native() })
        );
        assert_eq!(reader.state(), ReaderState::Selecting);

        // Signature block then one blank block
        let out = reader.on_message(selected(), 10);
        let ReaderOutput::Send(NfcRequest::Transceive { data, tx_only: true }) = &out[0] else {
            panic!("expected first block write");
        };
        assert_eq!(data.as_slice(), &[ST25TB_WRITE_BLOCK, 7, 8, 2, b'b', b'N']);

        let tx_done = NfcMessage::Transceived { error: false, data: Frame::new() };
        assert!(reader.on_message(tx_done.clone(), 11).is_empty());
        assert_eq!(reader.deadline(), Some(18));
        let out = reader.on_timer(18);
        let ReaderOutput::Send(NfcRequest::Transceive { data, .. }) = &out[0] else {
            panic!("expected second block write");
        };
        assert_eq!(data[1], 8);

        reader.on_message(tx_done, 19);
        let out = reader.on_timer(26);
        assert_eq!(out[0], ReaderOutput::Send(read_block(0xFF)));

        let out = reader.on_message(block_rx([0xFF; 4]), 30);
        assert_eq!(out[0], ReaderOutput::Send(NfcRequest::Idle));
        assert_eq!(out[1], ReaderOutput::WriteDone(true));
        assert_eq!(reader.state(), ReaderState::PollingOnce);

        let tag = reader.current().unwrap();
        assert_eq!((tag.picture, tag.app), (Some(2), Some(8)));
        assert!(tag.flags.contains(TagFlags::FORMATTED));
    }

    #[test]
    fn test_write_error_fails() {
        let mut reader = NfcReader::new(1500, 7);
        let uid = Uid::from_be(&UID_BE);
        reader.start_write(TagTechnology::St25tb, &uid, 2, 8, b"x").unwrap();
        reader.on_message(selected(), 0);
        let out = reader.on_message(NfcMessage::Transceived { error: true, data: Frame::new() }, 1);
        assert_eq!(out[1], ReaderOutput::WriteDone(false));
    }

    #[test]
    fn test_write_rejects_other_families() {
        let mut reader = NfcReader::new(1500, 7);
        let uid = Uid::from_be(&[1, 2, 3, 4]);
        assert!(reader.start_write(TagTechnology::Iso14443A, &uid, 0, 0, b"").is_err());
    }
}
