//! Simulated audio output
//!
//! Every file "plays" for the same configured time. Started files are
//! recorded so tests can check what was played and in which order.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::capabilities::Sound;
use crate::error::DeviceError;

#[derive(Debug, Default)]
struct Playback {
    /// Bumped on every start and stop; a timer only ends its own playback
    generation: u64,
    current: Option<PathBuf>,
    history: Vec<PathBuf>,
}

#[derive(Debug)]
struct Shared {
    playback: Mutex<Playback>,
    done: Notify,
}

impl Shared {
    fn finish(&self, generation: u64) {
        let mut playback = self.playback.lock();
        if playback.generation != generation {
            return;
        }
        playback.current = None;
        drop(playback);
        self.done.notify_waiters();
    }
}

/// Sound output that only keeps time
#[derive(Debug, Clone)]
pub struct SimSound {
    shared: Arc<Shared>,
    duration: Duration,
    card: String,
    input: bool,
}

impl SimSound {
    pub fn new(duration: Duration, card: &str, input: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                playback: Mutex::new(Playback::default()),
                done: Notify::new(),
            }),
            duration,
            card: card.to_string(),
            input,
        }
    }

    /// Files started so far, oldest first
    pub fn history(&self) -> Vec<PathBuf> {
        self.shared.playback.lock().history.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playback.lock().current.is_some()
    }
}

#[async_trait]
impl Sound for SimSound {
    async fn start(&self, file: &Path) -> Result<(), DeviceError> {
        debug!("Playing {}", file.display());
        let generation = {
            let mut playback = self.shared.playback.lock();
            playback.generation += 1;
            playback.current = Some(file.to_path_buf());
            playback.history.push(file.to_path_buf());
            playback.generation
        };
        let shared = self.shared.clone();
        let duration = self.duration;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            shared.finish(generation);
        });
        Ok(())
    }

    async fn wait_until_done(&self) {
        loop {
            let notified = self.shared.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_playing() {
                return;
            }
            notified.await;
        }
    }

    async fn stop(&self) {
        let generation = self.shared.playback.lock().generation;
        self.shared.finish(generation);
    }

    fn sound_card(&self) -> String {
        self.card.clone()
    }

    fn has_input(&self) -> bool {
        self.input
    }
}
