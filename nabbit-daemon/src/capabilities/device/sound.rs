//! Sound through an external player process
//!
//! Each file is handed to the configured player command (`mpg123 -q` by
//! default). Stopping kills the process.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::capabilities::Sound;
use crate::error::DeviceError;

pub struct ProcessSound {
    player: Vec<String>,
    card: String,
    input: bool,
    child: Mutex<Option<Child>>,
}

impl ProcessSound {
    pub fn new(player: Vec<String>, card: String, input: bool) -> Result<Self, DeviceError> {
        if player.is_empty() {
            return Err(DeviceError::Unavailable("sound player command"));
        }
        Ok(Self {
            player,
            card,
            input,
            child: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Sound for ProcessSound {
    async fn start(&self, file: &Path) -> Result<(), DeviceError> {
        let mut child = self.child.lock().await;
        if let Some(mut old) = child.take() {
            let _ = old.kill().await;
        }
        debug!("Playing {}", file.display());
        let spawned = Command::new(&self.player[0])
            .args(&self.player[1..])
            .arg(file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        *child = Some(spawned);
        Ok(())
    }

    async fn wait_until_done(&self) {
        // Poll so that stop() can take the lock in between
        loop {
            {
                let mut child = self.child.lock().await;
                match child.as_mut().map(Child::try_wait) {
                    None => return,
                    Some(Ok(Some(status))) => {
                        if !status.success() {
                            warn!("Sound player exited with {}", status);
                        }
                        *child = None;
                        return;
                    }
                    Some(Ok(None)) => {}
                    Some(Err(e)) => {
                        warn!("Cannot wait for sound player: {}", e);
                        *child = None;
                        return;
                    }
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }

    async fn stop(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
    }

    fn sound_card(&self) -> String {
        self.card.clone()
    }

    fn has_input(&self) -> bool {
        self.input
    }
}
