//! Tag reader driver task
//!
//! Both reader chips are pure state machines from `nabbit-drivers`. One
//! task per reader owns the machine and runs it against a [`ChipLink`]
//! (requests out), a reply channel (answers in) and the machine's own
//! deadline. The daemon talks to the task through [`RfidHandle`].

use async_trait::async_trait;
use nabbit_core::tag::{TagLayoutError, TagTechnology, Uid};
use nabbit_drivers::rfid::{
    Cr14Command, Cr14Frame, Cr14FrameParser, Cr14Reader, NfcMessage, NfcReader, NfcRequest, Outputs, ReaderOutput,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::Rfid;
use crate::channels::{Clock, HardwareEvent, HardwareSender};
use crate::error::DeviceError;

/// Reader state machine driven by [`run_reader`]
pub trait ReaderChip: Send + 'static {
    type Request: Send + std::fmt::Debug + 'static;
    type Reply: Send + 'static;

    fn enable_polling(&mut self) -> Outputs<Self::Request>;
    fn disable_polling(&mut self) -> Outputs<Self::Request>;
    fn on_reply(&mut self, reply: Self::Reply, now_ms: u64) -> Outputs<Self::Request>;
    fn on_timer(&mut self, now_ms: u64) -> Outputs<Self::Request>;
    fn deadline(&self) -> Option<u64>;
    fn start_write(
        &mut self,
        tech: TagTechnology,
        uid: &Uid,
        picture: u8,
        app: u8,
        data: &[u8],
    ) -> Result<Outputs<Self::Request>, TagLayoutError>;
    fn cancel_write(&mut self) -> Outputs<Self::Request>;
}

impl ReaderChip for Cr14Reader {
    type Request = Cr14Command;
    type Reply = Cr14Frame;

    fn enable_polling(&mut self) -> Outputs<Cr14Command> {
        Cr14Reader::enable_polling(self)
    }

    fn disable_polling(&mut self) -> Outputs<Cr14Command> {
        Cr14Reader::disable_polling(self)
    }

    fn on_reply(&mut self, reply: Cr14Frame, now_ms: u64) -> Outputs<Cr14Command> {
        self.on_frame(reply, now_ms)
    }

    fn on_timer(&mut self, now_ms: u64) -> Outputs<Cr14Command> {
        Cr14Reader::on_timer(self, now_ms)
    }

    fn deadline(&self) -> Option<u64> {
        Cr14Reader::deadline(self)
    }

    fn start_write(
        &mut self,
        tech: TagTechnology,
        uid: &Uid,
        picture: u8,
        app: u8,
        data: &[u8],
    ) -> Result<Outputs<Cr14Command>, TagLayoutError> {
        // The CR14 only speaks to ST25TB memories
        if tech != TagTechnology::St25tb {
            return Err(TagLayoutError::InvalidUid);
        }
        Cr14Reader::start_write(self, uid, picture, app, data)
    }

    fn cancel_write(&mut self) -> Outputs<Cr14Command> {
        Cr14Reader::cancel_write(self)
    }
}

impl ReaderChip for NfcReader {
    type Request = NfcRequest;
    type Reply = NfcMessage;

    fn enable_polling(&mut self) -> Outputs<NfcRequest> {
        NfcReader::enable_polling(self)
    }

    fn disable_polling(&mut self) -> Outputs<NfcRequest> {
        NfcReader::disable_polling(self)
    }

    fn on_reply(&mut self, reply: NfcMessage, now_ms: u64) -> Outputs<NfcRequest> {
        self.on_message(reply, now_ms)
    }

    fn on_timer(&mut self, now_ms: u64) -> Outputs<NfcRequest> {
        NfcReader::on_timer(self, now_ms)
    }

    fn deadline(&self) -> Option<u64> {
        NfcReader::deadline(self)
    }

    fn start_write(
        &mut self,
        tech: TagTechnology,
        uid: &Uid,
        picture: u8,
        app: u8,
        data: &[u8],
    ) -> Result<Outputs<NfcRequest>, TagLayoutError> {
        NfcReader::start_write(self, tech, uid, picture, app, data)
    }

    fn cancel_write(&mut self) -> Outputs<NfcRequest> {
        NfcReader::cancel_write(self)
    }
}

/// Where reader requests go
pub trait ChipLink<R>: Send + 'static {
    fn send(&mut self, request: R) -> Result<(), DeviceError>;
}

/// Cuts the CR14 byte stream into frames for the driver task
#[derive(Debug)]
pub struct Cr14Pump {
    parser: Cr14FrameParser,
    frames: mpsc::UnboundedSender<Cr14Frame>,
}

impl Cr14Pump {
    pub fn new(frames: mpsc::UnboundedSender<Cr14Frame>) -> Self {
        Self {
            parser: Cr14FrameParser::new(),
            frames,
        }
    }

    /// Feed bytes read from the device; false once the driver task is gone
    pub fn feed(&mut self, mut bytes: &[u8]) -> bool {
        while !bytes.is_empty() {
            let (frame, used) = self.parser.feed_bytes(bytes);
            bytes = &bytes[used..];
            match frame {
                Some(Ok(frame)) => {
                    if self.frames.send(frame).is_err() {
                        return false;
                    }
                }
                Some(Err(e)) => warn!("{}", e),
                None => {}
            }
        }
        true
    }
}

#[derive(Debug)]
enum RfidCommand {
    Write {
        tech: TagTechnology,
        uid: Uid,
        picture: u8,
        app: u8,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<bool, DeviceError>>,
    },
    CancelWrite,
    EnablePolling,
    DisablePolling,
}

/// Daemon side of a reader task
#[derive(Debug, Clone)]
pub struct RfidHandle {
    commands: mpsc::UnboundedSender<RfidCommand>,
}

#[async_trait]
impl Rfid for RfidHandle {
    async fn write(
        &self,
        tech: TagTechnology,
        uid: &Uid,
        picture: u8,
        app: u8,
        data: &[u8],
    ) -> Result<bool, DeviceError> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(RfidCommand::Write {
                tech,
                uid: uid.clone(),
                picture,
                app,
                data: data.to_vec(),
                reply,
            })
            .map_err(|_| DeviceError::Closed)?;
        done.await.map_err(|_| DeviceError::Closed)?
    }

    fn cancel_write(&self) {
        let _ = self.commands.send(RfidCommand::CancelWrite);
    }

    fn enable_polling(&self) {
        let _ = self.commands.send(RfidCommand::EnablePolling);
    }

    fn disable_polling(&self) {
        let _ = self.commands.send(RfidCommand::DisablePolling);
    }
}

/// Spawn the driver task of a reader and start polling
pub fn spawn_reader<C, L>(
    chip: C,
    link: L,
    replies: mpsc::UnboundedReceiver<C::Reply>,
    events: HardwareSender,
    clock: Clock,
) -> RfidHandle
where
    C: ReaderChip,
    L: ChipLink<C::Request>,
{
    let (commands, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_reader(chip, link, replies, rx, events, clock));
    RfidHandle { commands }
}

struct Driver<C: ReaderChip, L> {
    chip: C,
    link: L,
    events: HardwareSender,
    pending: Option<oneshot::Sender<Result<bool, DeviceError>>>,
}

impl<C: ReaderChip, L: ChipLink<C::Request>> Driver<C, L> {
    fn apply(&mut self, outputs: Outputs<C::Request>) {
        for output in outputs {
            match output {
                ReaderOutput::Send(request) => {
                    debug!("rfid -> {:?}", request);
                    if let Err(e) = self.link.send(request) {
                        warn!("Cannot send request to rfid reader: {}", e);
                    }
                }
                ReaderOutput::Tag(tag) => {
                    info!("Tag {} {}", tag.uid, tag.flags.support().as_str());
                    let _ = self.events.send(HardwareEvent::Tag(tag));
                }
                ReaderOutput::WriteDone(ok) => {
                    if let Some(reply) = self.pending.take() {
                        let _ = reply.send(Ok(ok));
                    }
                }
            }
        }
    }

    fn on_command(&mut self, command: RfidCommand) {
        match command {
            RfidCommand::Write {
                tech,
                uid,
                picture,
                app,
                data,
                reply,
            } => {
                if self.pending.is_some() {
                    let _ = reply.send(Err(DeviceError::Busy));
                    return;
                }
                match self.chip.start_write(tech, &uid, picture, app, &data) {
                    Ok(outputs) => {
                        self.pending = Some(reply);
                        self.apply(outputs);
                    }
                    // Tag the reader cannot write, or content that does not fit
                    Err(e) => {
                        warn!("Refusing to write {} tag {}: {}", tech.as_str(), uid, e);
                        let _ = reply.send(Ok(false));
                    }
                }
            }
            RfidCommand::CancelWrite => {
                self.pending = None;
                let outputs = self.chip.cancel_write();
                self.apply(outputs);
            }
            RfidCommand::EnablePolling => {
                let outputs = self.chip.enable_polling();
                self.apply(outputs);
            }
            RfidCommand::DisablePolling => {
                let outputs = self.chip.disable_polling();
                self.apply(outputs);
            }
        }
    }
}

async fn run_reader<C, L>(
    chip: C,
    link: L,
    mut replies: mpsc::UnboundedReceiver<C::Reply>,
    mut commands: mpsc::UnboundedReceiver<RfidCommand>,
    events: HardwareSender,
    clock: Clock,
) where
    C: ReaderChip,
    L: ChipLink<C::Request>,
{
    let mut driver = Driver {
        chip,
        link,
        events,
        pending: None,
    };
    let outputs = driver.chip.enable_polling();
    driver.apply(outputs);

    loop {
        let deadline = driver.chip.deadline();
        let timer = async move {
            match deadline {
                Some(ms) => tokio::time::sleep_until(clock.instant_of(ms)).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => driver.on_command(command),
                None => break,
            },
            reply = replies.recv() => match reply {
                Some(reply) => {
                    let outputs = driver.chip.on_reply(reply, clock.now_ms());
                    driver.apply(outputs);
                }
                None => {
                    warn!("rfid reader closed");
                    break;
                }
            },
            _ = timer => {
                let outputs = driver.chip.on_timer(clock.now_ms());
                driver.apply(outputs);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UID_LE: [u8; 8] = [0x08, 0x07, 0x06, 0x05, 0x04, 0x1A, 0x02, 0xD0];

    #[derive(Default)]
    struct Sent(Vec<Cr14Command>);

    impl ChipLink<Cr14Command> for Sent {
        fn send(&mut self, request: Cr14Command) -> Result<(), DeviceError> {
            self.0.push(request);
            Ok(())
        }
    }

    fn driver() -> Driver<Cr14Reader, Sent> {
        let (events, _) = crate::channels::hardware_channel();
        Driver {
            chip: Cr14Reader::new(1000),
            link: Sent::default(),
            events,
            pending: None,
        }
    }

    fn write(tech: TagTechnology) -> (RfidCommand, oneshot::Receiver<Result<bool, DeviceError>>) {
        let (reply, done) = oneshot::channel();
        let command = RfidCommand::Write {
            tech,
            uid: Uid::from_le(&UID_LE),
            picture: 1,
            app: 2,
            data: b"paris".to_vec(),
            reply,
        };
        (command, done)
    }

    #[test]
    fn test_unwritable_tag_resolves_as_failed_write() {
        let mut driver = driver();
        let (command, mut done) = write(TagTechnology::Iso14443A);
        driver.on_command(command);
        assert!(matches!(done.try_recv(), Ok(Ok(false))));
        assert!(driver.pending.is_none());
        assert!(driver.link.0.is_empty());
    }

    #[test]
    fn test_second_write_rejected_while_first_pending() {
        let mut driver = driver();
        let (first, mut first_done) = write(TagTechnology::St25tb);
        driver.on_command(first);
        assert!(matches!(driver.link.0[0], Cr14Command::Write { .. }));

        let (second, mut second_done) = write(TagTechnology::St25tb);
        driver.on_command(second);
        assert!(matches!(second_done.try_recv(), Ok(Err(DeviceError::Busy))));

        // The first write still gets its answer
        assert!(first_done.try_recv().is_err());
        let Cr14Command::Write { plan, .. } = driver.link.0[0].clone() else {
            unreachable!();
        };
        let echoed = nabbit_drivers::rfid::cr14::BlockData::from_slice(&plan.bytes).unwrap();
        let outputs = driver.chip.on_reply(Cr14Frame::Written(echoed), 10);
        driver.apply(outputs);
        assert!(matches!(first_done.try_recv(), Ok(Ok(true))));
    }
}
