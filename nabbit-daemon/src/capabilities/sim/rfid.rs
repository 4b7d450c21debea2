//! Simulated tag field and readers
//!
//! A [`TagField`] holds at most one tag. The simulated CR14 interprets the
//! command bytes the driver writes and answers with the same bytes the
//! kernel driver would; the simulated ST25R391x answers decoded requests.
//! Both answer inventories every `poll` period while a tag lies on the
//! field, which is what drives removal detection in the reader machines.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use nabbit_core::config::TagTiming;
use nabbit_core::tag::layout::{BLOCK_SIZE, FIRST_USER_BLOCK, READ_BLOCKS};
use nabbit_core::tag::{encode_write, TagLayoutError, TagTechnology, Uid};
use nabbit_drivers::rfid::st25::{Frame, ST25TB_READ_BLOCK, ST25TB_WRITE_BLOCK};
use nabbit_drivers::rfid::{Cr14Command, Cr14Reader, NfcMessage, NfcReader, NfcRequest, TagFamily};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::capabilities::rfid::{spawn_reader, ChipLink, Cr14Pump, RfidHandle};
use crate::channels::{Clock, HardwareSender};
use crate::config::RfidChip;
use crate::error::DeviceError;

type Block = [u8; BLOCK_SIZE];

const BLANK: Block = [0xFF; BLOCK_SIZE];
const SYSTEM_BLOCK: u8 = 255;

/// A tag that can be laid on the simulated reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimTag {
    pub tech: TagTechnology,
    pub uid: Uid,
    blocks: BTreeMap<u8, Block>,
    locked: bool,
}

impl SimTag {
    /// Blank ST25TB
    pub fn blank(uid: Uid) -> Self {
        Self {
            tech: TagTechnology::St25tb,
            uid,
            blocks: BTreeMap::new(),
            locked: false,
        }
    }

    /// ST25TB already formatted with `picture`, `app` and `data`
    pub fn formatted(uid: Uid, picture: u8, app: u8, data: &[u8]) -> Result<Self, TagLayoutError> {
        let mut tag = Self::blank(uid);
        let plan = encode_write(picture, app, data)?;
        for (i, &block) in plan.blocks.iter().enumerate() {
            let mut bytes = BLANK;
            bytes.copy_from_slice(plan.block_bytes(i));
            tag.blocks.insert(block, bytes);
        }
        Ok(tag)
    }

    /// Tag of another technology; readable only as an identifier
    pub fn foreign(tech: TagTechnology, uid: Uid) -> Self {
        Self {
            tech,
            ..Self::blank(uid)
        }
    }

    /// Same tag with its lock bits set
    pub fn locked(self) -> Self {
        Self { locked: true, ..self }
    }

    /// Wire content of one block
    pub fn block(&self, block: u8) -> Block {
        if block == SYSTEM_BLOCK {
            return if self.locked { [0; BLOCK_SIZE] } else { BLANK };
        }
        self.blocks.get(&block).copied().unwrap_or(BLANK)
    }

    /// User blocks then the system block, as a detection reads them
    pub fn read_all(&self) -> Vec<u8> {
        READ_BLOCKS.iter().flat_map(|&b| self.block(b)).collect()
    }

    fn write_block(&mut self, block: u8, bytes: Block) -> bool {
        if self.locked || block < FIRST_USER_BLOCK || block == SYSTEM_BLOCK {
            return false;
        }
        self.blocks.insert(block, bytes);
        true
    }

    fn is_st25tb(&self) -> bool {
        self.tech == TagTechnology::St25tb
    }
}

/// What lies on the reader
#[derive(Debug, Default)]
pub struct TagField {
    tag: Mutex<Option<SimTag>>,
}

impl TagField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn place(&self, tag: SimTag) {
        debug!("Tag {} placed", tag.uid);
        *self.tag.lock() = Some(tag);
    }

    pub fn remove(&self) -> Option<SimTag> {
        self.tag.lock().take()
    }

    /// Copy of the tag on the field
    pub fn tag(&self) -> Option<SimTag> {
        self.tag.lock().clone()
    }

    fn with_tag<T>(&self, f: impl FnOnce(&mut SimTag) -> T) -> Option<T> {
        self.tag.lock().as_mut().map(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollMode {
    Off,
    Once,
    Repeat,
}

/// Simulated CR14 character device
struct Cr14Device {
    field: Arc<TagField>,
    mode: Mutex<PollMode>,
    /// Bytes the device "writes back"
    out: mpsc::UnboundedSender<Vec<u8>>,
}

impl Cr14Device {
    fn execute(&self, bytes: &[u8]) -> Result<(), DeviceError> {
        trace!("cr14 <- {:02x?}", bytes);
        match bytes.split_first() {
            Some((&b'p', _)) => *self.mode.lock() = PollMode::Once,
            Some((&b'P', _)) => *self.mode.lock() = PollMode::Repeat,
            Some((&b'i', _)) => *self.mode.lock() = PollMode::Off,
            Some((&op @ (b'R' | b'W'), rest)) => {
                let (uid_le, rest) = split(rest, 8)?;
                let (count, rest) = split(rest, 1)?;
                let (blocks, data) = split(rest, count[0] as usize)?;
                let answer = self.field.with_tag(|tag| {
                    if !tag.is_st25tb() || tag.uid.to_le().as_slice() != uid_le {
                        return None;
                    }
                    if op == b'W' {
                        for (block, bytes) in blocks.iter().zip(data.chunks_exact(BLOCK_SIZE)) {
                            let mut b = BLANK;
                            b.copy_from_slice(bytes);
                            tag.write_block(*block, b);
                        }
                    }
                    let mut answer = vec![op, count[0]];
                    answer.extend(blocks.iter().flat_map(|&b| tag.block(b)));
                    Some(answer)
                });
                // No answer when the tag left: the driver's removal timer runs
                if let Some(answer) = answer.flatten() {
                    self.reply(answer)?;
                }
            }
            _ => {
                return Err(DeviceError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "unknown cr14 command",
                )))
            }
        }
        Ok(())
    }

    /// Answer the current inventory, if any
    fn inventory(&self) -> Result<(), DeviceError> {
        let mut mode = self.mode.lock();
        if *mode == PollMode::Off {
            return Ok(());
        }
        let Some(tag) = self.field.tag().filter(SimTag::is_st25tb) else {
            return Ok(());
        };
        let uid_le = tag.uid.to_le();
        if uid_le.len() != 8 {
            return Ok(());
        }
        if *mode == PollMode::Once {
            *mode = PollMode::Off;
        }
        drop(mode);
        let mut answer = vec![b'u'];
        answer.extend_from_slice(&uid_le);
        self.reply(answer)
    }

    fn reply(&self, bytes: Vec<u8>) -> Result<(), DeviceError> {
        self.out.send(bytes).map_err(|_| DeviceError::Closed)
    }
}

fn split(bytes: &[u8], at: usize) -> Result<(&[u8], &[u8]), DeviceError> {
    if bytes.len() < at {
        return Err(DeviceError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "truncated cr14 command",
        )));
    }
    Ok(bytes.split_at(at))
}

struct SimCr14Link(Arc<Cr14Device>);

impl ChipLink<Cr14Command> for SimCr14Link {
    fn send(&mut self, request: Cr14Command) -> Result<(), DeviceError> {
        self.0.execute(&request.encode())
    }
}

/// Simulated ST25R391x reader
struct NfcDevice {
    field: Arc<TagField>,
    discovering: Mutex<bool>,
    replies: mpsc::UnboundedSender<NfcMessage>,
}

impl NfcDevice {
    fn execute(&self, request: NfcRequest) -> Result<(), DeviceError> {
        trace!("nfc <- {:?}", request);
        match request {
            NfcRequest::Discover => *self.discovering.lock() = true,
            NfcRequest::Idle => {
                *self.discovering.lock() = false;
                self.reply(NfcMessage::IdleAck)?;
            }
            NfcRequest::Select { tech, native_id } => {
                let present = self
                    .field
                    .tag()
                    .is_some_and(|tag| tag.tech == tech && TagFamily::of(tech).native_id(&tag.uid) == native_id);
                if present {
                    self.reply(NfcMessage::SelectedTag { tech, native_id })?;
                }
            }
            NfcRequest::Transceive { data, .. } => {
                let answer = self.field.with_tag(|tag| transceive(tag, &data)).flatten();
                let message = match answer {
                    Some(data) => NfcMessage::Transceived { error: false, data },
                    None => NfcMessage::Transceived {
                        error: true,
                        data: Frame::new(),
                    },
                };
                self.reply(message)?;
            }
        }
        Ok(())
    }

    fn inventory(&self) -> Result<(), DeviceError> {
        let mut discovering = self.discovering.lock();
        if !*discovering {
            return Ok(());
        }
        let Some(tag) = self.field.tag() else {
            return Ok(());
        };
        *discovering = false;
        drop(discovering);
        self.reply(NfcMessage::SelectedTag {
            tech: tag.tech,
            native_id: TagFamily::of(tag.tech).native_id(&tag.uid),
        })
    }

    fn reply(&self, message: NfcMessage) -> Result<(), DeviceError> {
        self.replies.send(message).map_err(|_| DeviceError::Closed)
    }
}

/// ST25TB block commands; `None` is a transmission error
fn transceive(tag: &mut SimTag, data: &[u8]) -> Option<Frame> {
    if !tag.is_st25tb() {
        return None;
    }
    match data {
        [ST25TB_READ_BLOCK, block] => {
            let mut rx = Frame::new();
            rx.extend_from_slice(&tag.block(*block)).ok()?;
            // CRC, unchecked by the reader machine
            rx.extend_from_slice(&[0, 0]).ok()?;
            Some(rx)
        }
        [ST25TB_WRITE_BLOCK, block, bytes @ ..] if bytes.len() == BLOCK_SIZE => {
            let mut b = BLANK;
            b.copy_from_slice(bytes);
            tag.write_block(*block, b).then(Frame::new)
        }
        _ => None,
    }
}

struct SimNfcLink(Arc<NfcDevice>);

impl ChipLink<NfcRequest> for SimNfcLink {
    fn send(&mut self, request: NfcRequest) -> Result<(), DeviceError> {
        self.0.execute(request)
    }
}

/// Spawn a simulated reader of `chip` over `field` and its driver task
pub fn spawn_sim_reader(
    chip: RfidChip,
    timing: &TagTiming,
    field: Arc<TagField>,
    poll: Duration,
    events: HardwareSender,
    clock: Clock,
) -> RfidHandle {
    match chip {
        RfidChip::Cr14 => {
            let (out, mut bytes) = mpsc::unbounded_channel::<Vec<u8>>();
            let (frames, replies) = mpsc::unbounded_channel();
            let device = Arc::new(Cr14Device {
                field,
                mode: Mutex::new(PollMode::Off),
                out,
            });
            tokio::spawn(async move {
                let mut pump = Cr14Pump::new(frames);
                while let Some(chunk) = bytes.recv().await {
                    if !pump.feed(&chunk) {
                        break;
                    }
                }
            });
            let poller = device.clone();
            tokio::spawn(run_inventory(poll, move || poller.inventory()));
            let reader = Cr14Reader::new(timing.removal_window_ms);
            spawn_reader(reader, SimCr14Link(device), replies, events, clock)
        }
        RfidChip::St25r391x => {
            let (tx, replies) = mpsc::unbounded_channel();
            let device = Arc::new(NfcDevice {
                field,
                discovering: Mutex::new(false),
                replies: tx,
            });
            let poller = device.clone();
            tokio::spawn(run_inventory(poll, move || poller.inventory()));
            let reader = NfcReader::new(timing.nfc_removal_window_ms, timing.block_write_delay_ms);
            spawn_reader(reader, SimNfcLink(device), replies, events, clock)
        }
    }
}

/// Run `inventory` every `period` until the driver side is gone
async fn run_inventory(period: Duration, inventory: impl Fn() -> Result<(), DeviceError>) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        if inventory().is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Rfid;
    use crate::channels::{hardware_channel, HardwareEvent, HardwareReceiver};
    use nabbit_core::tag::{TagFlags, TagSnapshot};

    const UID: &str = "d0:02:1a:04:05:06:07:08";

    fn timing() -> TagTiming {
        TagTiming {
            removal_window_ms: 150,
            nfc_removal_window_ms: 150,
            block_write_delay_ms: 1,
            write_timeout_ms: 1000,
        }
    }

    fn reader(chip: RfidChip) -> (RfidHandle, Arc<TagField>, HardwareReceiver) {
        let (tx, rx) = hardware_channel();
        let field = Arc::new(TagField::new());
        let handle = spawn_sim_reader(
            chip,
            &timing(),
            field.clone(),
            Duration::from_millis(10),
            tx,
            Clock::new(),
        );
        (handle, field, rx)
    }

    async fn next_tag(rx: &mut HardwareReceiver) -> TagSnapshot {
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        match event {
            Ok(Some(HardwareEvent::Tag(tag))) => tag,
            other => panic!("expected a tag event, got {:?}", other),
        }
    }

    #[test]
    fn test_formatted_tag_reads_back() {
        let uid = Uid::parse(UID).unwrap();
        let tag = SimTag::formatted(uid, 3, 5, b"hi").unwrap();
        let decoded = nabbit_core::tag::decode_blocks(&tag.read_all()).unwrap();
        assert_eq!(decoded.picture, Some(3));
        assert_eq!(decoded.app, Some(5));
        assert!(!decoded.flags.contains(TagFlags::READONLY));
        let locked = nabbit_core::tag::decode_blocks(&tag.locked().read_all()).unwrap();
        assert!(locked.flags.contains(TagFlags::READONLY));
    }

    async fn detect_write_remove(chip: RfidChip) {
        let (handle, field, mut rx) = reader(chip);
        let uid = Uid::parse(UID).unwrap();
        field.place(SimTag::formatted(uid.clone(), 3, 5, b"hi").unwrap());

        let tag = next_tag(&mut rx).await;
        assert_eq!(tag.uid, uid);
        assert_eq!((tag.picture, tag.app), (Some(3), Some(5)));
        assert_eq!(tag.data_text(), Some(&b"hi"[..]));

        let ok = handle.write(TagTechnology::St25tb, &uid, 7, 9, b"new").await.unwrap();
        assert!(ok);
        let written = field.tag().unwrap();
        let decoded = nabbit_core::tag::decode_blocks(&written.read_all()).unwrap();
        assert_eq!((decoded.picture, decoded.app), (Some(7), Some(9)));

        field.remove();
        loop {
            let tag = next_tag(&mut rx).await;
            if tag.flags == TagFlags::REMOVED {
                assert_eq!(tag.uid, uid);
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_cr14_detect_write_remove() {
        detect_write_remove(RfidChip::Cr14).await;
    }

    #[tokio::test]
    async fn test_nfc_detect_write_remove() {
        detect_write_remove(RfidChip::St25r391x).await;
    }

    #[tokio::test]
    async fn test_cr14_locked_tag_write_fails() {
        let (handle, field, mut rx) = reader(RfidChip::Cr14);
        let uid = Uid::parse(UID).unwrap();
        field.place(SimTag::blank(uid.clone()).locked());
        next_tag(&mut rx).await;
        let ok = handle.write(TagTechnology::St25tb, &uid, 1, 2, b"").await.unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_nfc_foreign_tag_is_reported_unknown() {
        let (_handle, field, mut rx) = reader(RfidChip::St25r391x);
        let uid = Uid::parse("04:a2:3b:11").unwrap();
        field.place(SimTag::foreign(TagTechnology::Iso14443AT4T, uid.clone()));
        let tag = next_tag(&mut rx).await;
        assert_eq!(tag.uid, uid);
        assert_eq!(tag.flags, TagFlags::UNKNOWN_PICC);
    }

    #[tokio::test]
    async fn test_cr14_refuses_other_technologies() {
        let (handle, _field, _rx) = reader(RfidChip::Cr14);
        let uid = Uid::parse("04:a2:3b:11").unwrap();
        let err = handle
            .write(TagTechnology::Iso14443AT4T, &uid, 1, 2, b"")
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Tag(TagLayoutError::InvalidUid)));
    }
}
