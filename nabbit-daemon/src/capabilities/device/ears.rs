//! Ears on the kernel ear driver (`/dev/ear0`, `/dev/ear1`)
//!
//! Commands are written with blocking I/O on the blocking pool. One reader
//! thread per ear turns the bytes the driver sends back into answers and
//! manual-move events.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nabbit_core::ears::{EarId, EarStatus, STEPS};
use nabbit_core::traits::Direction;
use nabbit_drivers::ears::{EarCommand, EarReport};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::capabilities::Ears;
use crate::channels::{HardwareEvent, HardwareSender};
use crate::error::DeviceError;

/// Longest wait for a position answer; a detection takes a few turns
const ANSWER_TIMEOUT: Duration = Duration::from_secs(20);

struct EarDevice {
    ear: EarId,
    file: Arc<File>,
    /// Answers from the reader thread; locked for a whole command
    answers: tokio::sync::Mutex<mpsc::UnboundedReceiver<Option<u8>>>,
    broken: Arc<AtomicBool>,
    /// Last position reported or commanded
    known: Arc<Mutex<Option<u8>>>,
}

impl EarDevice {
    fn open(ear: EarId, path: &Path, events: HardwareSender) -> Result<Self, DeviceError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut reader = file.try_clone()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let broken = Arc::new(AtomicBool::new(false));
        let known = Arc::new(Mutex::new(None));

        let thread_broken = broken.clone();
        let thread_known = known.clone();
        std::thread::Builder::new()
            .name(format!("ear-{}", ear.as_str()))
            .spawn(move || {
                let mut byte = [0u8; 1];
                loop {
                    match reader.read(&mut byte) {
                        Ok(0) => {
                            warn!("{} ear device closed, ear is broken", ear.as_str());
                            thread_broken.store(true, Ordering::Relaxed);
                            break;
                        }
                        Ok(_) => match EarReport::from_byte(byte[0]) {
                            EarReport::Moved => {
                                *thread_known.lock() = None;
                                let _ = events.send(HardwareEvent::EarMoved(ear));
                            }
                            EarReport::Unknown => {
                                *thread_known.lock() = None;
                                let _ = tx.send(None);
                            }
                            EarReport::Position(pos) => {
                                *thread_known.lock() = Some(pos);
                                let _ = tx.send(Some(pos));
                            }
                        },
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            warn!("{} ear read failed: {}", ear.as_str(), e);
                            thread_broken.store(true, Ordering::Relaxed);
                            break;
                        }
                    }
                }
            })?;

        info!("{} ear on {}", ear.as_str(), path.display());
        Ok(Self {
            ear,
            file: Arc::new(file),
            answers: tokio::sync::Mutex::new(rx),
            broken,
            known,
        })
    }

    async fn write(&self, command: EarCommand) -> Result<(), DeviceError> {
        if self.broken.load(Ordering::Relaxed) {
            return Err(DeviceError::Unavailable("broken ear"));
        }
        debug!("{} ear <- {:?}", self.ear.as_str(), command);
        let bytes = command.encode();
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || (&*file).write_all(&bytes))
            .await
            .map_err(|e| DeviceError::Io(std::io::Error::other(e)))??;
        Ok(())
    }

    /// Send a command and wait for the position it reports
    async fn ask(&self, command: EarCommand) -> Option<u8> {
        let mut answers = self.answers.lock().await;
        while answers.try_recv().is_ok() {}
        if let Err(e) = self.write(command).await {
            warn!("{} ear: {}", self.ear.as_str(), e);
            return None;
        }
        match tokio::time::timeout(ANSWER_TIMEOUT, answers.recv()).await {
            Ok(Some(pos)) => pos,
            Ok(None) => None,
            Err(_) => {
                warn!("{} ear did not answer", self.ear.as_str());
                None
            }
        }
    }

    async fn command(&self, command: EarCommand, known: Option<u8>) -> Result<(), DeviceError> {
        let _guard = self.answers.lock().await;
        self.write(command).await?;
        *self.known.lock() = known;
        Ok(())
    }

    fn status(&self) -> EarStatus {
        if self.broken.load(Ordering::Relaxed) {
            return EarStatus::Broken;
        }
        match *self.known.lock() {
            Some(pos) => EarStatus::At(pos),
            None => EarStatus::Unknown,
        }
    }
}

/// Both ear devices
pub struct DeviceEars {
    ears: [EarDevice; 2],
}

impl DeviceEars {
    pub fn open(paths: &[impl AsRef<Path>], events: HardwareSender) -> Result<Self, DeviceError> {
        let [left, right] = paths else {
            return Err(DeviceError::Unavailable("two ear devices"));
        };
        Ok(Self {
            ears: [
                EarDevice::open(EarId::Left, left.as_ref(), events.clone())?,
                EarDevice::open(EarId::Right, right.as_ref(), events)?,
            ],
        })
    }

    fn device(&self, ear: EarId) -> &EarDevice {
        &self.ears[ear.index()]
    }
}

#[async_trait]
impl Ears for DeviceEars {
    async fn go(&self, ear: EarId, position: u8, dir: Direction) -> Result<(), DeviceError> {
        self.device(ear)
            .command(EarCommand::Go { position, dir }, Some(position % STEPS))
            .await
    }

    async fn move_by(&self, ear: EarId, delta: u8, dir: Direction) -> Result<(), DeviceError> {
        self.device(ear).command(EarCommand::Move { delta, dir }, None).await
    }

    async fn wait_while_running(&self) {
        for device in &self.ears {
            let known = *device.known.lock();
            if let Err(e) = device.command(EarCommand::Sync, known).await {
                debug!("{} ear sync: {}", device.ear.as_str(), e);
            }
        }
    }

    async fn detect_positions(&self) -> (Option<u8>, Option<u8>) {
        let (left, right) = tokio::join!(
            self.ears[0].ask(EarCommand::Detect),
            self.ears[1].ask(EarCommand::Detect)
        );
        (left, right)
    }

    async fn positions(&self) -> (Option<u8>, Option<u8>) {
        let (left, right) = tokio::join!(
            self.ears[0].ask(EarCommand::Query),
            self.ears[1].ask(EarCommand::Query)
        );
        (left, right)
    }

    fn status(&self, ear: EarId) -> EarStatus {
        self.device(ear).status()
    }
}
