//! CR14 reader on its character device (`/dev/rfid0`)

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::mpsc as std_mpsc;

use nabbit_core::config::TagTiming;
use nabbit_drivers::rfid::{Cr14Command, Cr14Reader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::capabilities::rfid::{spawn_reader, ChipLink, Cr14Pump, RfidHandle};
use crate::channels::{Clock, HardwareSender};
use crate::error::DeviceError;

/// Commands go to a writer thread so the driver task never blocks
struct Cr14Link {
    writer: std_mpsc::Sender<Vec<u8>>,
}

impl ChipLink<Cr14Command> for Cr14Link {
    fn send(&mut self, request: Cr14Command) -> Result<(), DeviceError> {
        self.writer
            .send(request.encode().to_vec())
            .map_err(|_| DeviceError::Closed)
    }
}

/// Open the device and start its threads and driver task
pub fn open_cr14(
    path: &Path,
    timing: &TagTiming,
    events: HardwareSender,
    clock: Clock,
) -> Result<RfidHandle, DeviceError> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let mut reader = file.try_clone()?;
    let (writer, commands) = std_mpsc::channel::<Vec<u8>>();
    let (frames, replies) = mpsc::unbounded_channel();

    std::thread::Builder::new().name("rfid-tx".into()).spawn(move || {
        for bytes in commands {
            if let Err(e) = file.write_all(&bytes) {
                warn!("rfid write failed: {}", e);
            }
        }
    })?;

    std::thread::Builder::new().name("rfid-rx".into()).spawn(move || {
        let mut pump = Cr14Pump::new(frames);
        let mut buf = [0u8; 64];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    warn!("rfid device closed");
                    break;
                }
                Ok(n) => {
                    if !pump.feed(&buf[..n]) {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("rfid read failed: {}", e);
                    break;
                }
            }
        }
    })?;

    info!("CR14 reader on {}", path.display());
    let reader = Cr14Reader::new(timing.removal_window_ms);
    Ok(spawn_reader(reader, Cr14Link { writer }, replies, events, clock))
}
