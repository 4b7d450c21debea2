//! Choreography player
//!
//! Runs one choreography at a time on a background task, feeding the
//! actions decoded by [`Interpreter`] to the LEDs, ears and sound. Waits
//! follow a virtual clock: each record is due `wait` units after the
//! previous one, not after the previous action finished.
//!
//! A reference is one of:
//! - `urn:x-chor:streaming[;N]`, the endless streaming loop
//! - `data:application/x-nabaztag-mtl-choreography;base64,...`, an inline program
//! - anything else, a `choreographies` resource

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use nabbit_core::choreography::{
    palette, parse_streaming_ref, taichi_random, Action, Dialect, Interpreter, Registers,
    DATA_MTL_SCHEME, MIDI_LIST, PALETTES, STREAMING_PROGRAMS,
};
use nabbit_core::ears::EarId;
use nabbit_core::traits::{Direction, Rgb};
use parking_lot::{Mutex, RwLock};
use rand::seq::IndexedRandom;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::capabilities::{Ears, Leds, Sound};
use crate::resources::{ResourceLocator, CHOREOGRAPHIES, SOUNDS};

/// Positions the streaming loop picks from when it moves the ears
const STREAMING_EAR_POSITIONS: [u8; 4] = [0, 5, 10, 14];

struct Running {
    reference: String,
    token: CancellationToken,
    done: watch::Receiver<bool>,
}

impl Running {
    fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    async fn finished(mut done: watch::Receiver<bool>) {
        // An error means the task is gone, which is as done as it gets
        let _ = done.wait_for(|done| *done).await;
    }
}

pub struct ChoreographyPlayer {
    stage: Arc<Stage>,
    current: Mutex<Option<Running>>,
}

impl ChoreographyPlayer {
    pub fn new(
        ears: Arc<dyn Ears>,
        leds: Arc<dyn Leds>,
        sound: Arc<dyn Sound>,
        locator: Arc<RwLock<ResourceLocator>>,
    ) -> Self {
        let random = taichi_random(rand::rng().random());
        Self {
            stage: Arc::new(Stage {
                ears,
                leds,
                sound,
                locator,
                registers: Mutex::new(Registers::new(random)),
            }),
            current: Mutex::new(None),
        }
    }

    /// Start playing `reference`
    ///
    /// Does nothing if the same reference is still playing; any other
    /// choreography is stopped first.
    pub async fn start(&self, reference: &str) {
        let previous = {
            let mut current = self.current.lock();
            if current
                .as_ref()
                .is_some_and(|running| running.reference == reference && !running.is_done())
            {
                return;
            }
            current.take()
        };
        if let Some(previous) = previous {
            previous.token.cancel();
            Running::finished(previous.done).await;
        }

        let token = CancellationToken::new();
        let (done_tx, done) = watch::channel(false);
        let stage = self.stage.clone();
        let task_token = token.clone();
        let task_reference = reference.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = task_token.cancelled() => {}
                _ = stage.play(&task_reference) => {}
            }
            let _ = done_tx.send(true);
        });

        *self.current.lock() = Some(Running {
            reference: reference.to_string(),
            token,
            done,
        });
    }

    /// Abort the current choreography and turn the LEDs off
    ///
    /// Without a current choreography, this does nothing.
    pub async fn stop(&self) {
        let running = self.current.lock().take();
        if let Some(running) = running {
            running.token.cancel();
            Running::finished(running.done).await;
            self.stage.leds.set_all(Rgb::OFF);
        }
    }

    /// Wait until the current choreography ends by itself or is stopped
    pub async fn wait_until_done(&self) {
        let done = self.current.lock().as_ref().map(|running| running.done.clone());
        if let Some(done) = done {
            Running::finished(done).await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.current.lock().as_ref().is_some_and(|running| !running.is_done())
    }
}

/// What a choreography plays on
struct Stage {
    ears: Arc<dyn Ears>,
    leds: Arc<dyn Leds>,
    sound: Arc<dyn Sound>,
    locator: Arc<RwLock<ResourceLocator>>,
    /// Persist across programs of this player
    registers: Mutex<Registers>,
}

/// Registers copied out of the stage, stored back when dropped
///
/// A stopped program is dropped mid-await; its register changes still stick.
struct Persisted<'a> {
    into: &'a Mutex<Registers>,
    value: Registers,
}

impl<'a> Persisted<'a> {
    fn load(into: &'a Mutex<Registers>) -> Self {
        let value = *into.lock();
        Self { into, value }
    }
}

impl Drop for Persisted<'_> {
    fn drop(&mut self) {
        *self.into.lock() = self.value;
    }
}

impl Stage {
    async fn play(&self, reference: &str) {
        if let Some(palette) = parse_streaming_ref(reference) {
            self.play_streaming(palette).await;
            return;
        }
        let program = match reference.strip_prefix(DATA_MTL_SCHEME) {
            Some(inline) => decode_inline(inline),
            None => self.locator.read().read(CHOREOGRAPHIES, reference),
        };
        match program {
            Some(program) => self.play_binary(&program, Dialect::Mtl, 0).await,
            None => warn!("Choreography {} not found", short(reference)),
        }
    }

    async fn play_binary(&self, program: &[u8], dialect: Dialect, timescale_ms: u32) {
        let mut registers = Persisted::load(&self.registers);
        let mut interpreter = Interpreter::new(program, dialect, timescale_ms, &mut registers.value);
        let mut due = Instant::now();
        loop {
            let step = interpreter.next_step();
            due += Duration::from_millis(step.wait_ms as u64);
            tokio::time::sleep_until(due).await;
            match step.action {
                Ok(action) => self.apply(action).await,
                Err(halt) => {
                    if !halt.is_normal() {
                        debug!("Choreography stopped: {:?}", halt);
                    }
                    break;
                }
            }
        }
    }

    async fn apply(&self, action: Action) {
        match action {
            Action::Nop => {}
            Action::SetLed(led, color) => self.leds.set(led, color),
            Action::SetAll(color) => self.leds.set_all(color),
            Action::GoEar { ear, position, dir } => {
                if let Err(e) = self.ears.go(ear, position, dir).await {
                    debug!("{} ear: {}", ear.as_str(), e);
                }
            }
            Action::MoveEar { ear, delta, dir } => {
                if let Err(e) = self.ears.move_by(ear, delta, dir).await {
                    debug!("{} ear: {}", ear.as_str(), e);
                }
            }
            Action::RandomMidi => {
                let note = MIDI_LIST.choose(&mut rand::rng()).copied();
                let path = note.and_then(|note| self.locator.read().find(SOUNDS, note));
                if let Some(path) = path {
                    if let Err(e) = self.sound.start(&path).await {
                        warn!("Cannot play {}: {}", path.display(), e);
                    }
                }
            }
            Action::AwaitIdle => {
                self.ears.wait_while_running().await;
                self.sound.wait_until_done().await;
            }
        }
    }

    /// Endless loop of random streaming programs
    async fn play_streaming(&self, palette_index: Option<usize>) {
        let mut ear_chance: Option<u32> = None;
        loop {
            match ear_chance {
                None => {
                    let (left, right) = if rand::rng().random_bool(0.5) { (0, 10) } else { (10, 0) };
                    self.go_ears(left, right).await;
                    ear_chance = Some(0);
                }
                Some(chance) => {
                    let moved = {
                        let mut rng = rand::rng();
                        (rng.random_range(0..=chance) == 0).then(|| {
                            (
                                STREAMING_EAR_POSITIONS[rng.random_range(0..STREAMING_EAR_POSITIONS.len())],
                                STREAMING_EAR_POSITIONS[rng.random_range(0..STREAMING_EAR_POSITIONS.len())],
                            )
                        })
                    };
                    if let Some((left, right)) = moved {
                        self.go_ears(left, right).await;
                        ear_chance = Some((chance + 1) % 4);
                    }
                }
            }

            let program = self.locator.read().read(CHOREOGRAPHIES, STREAMING_PROGRAMS);
            let Some(program) = program.filter(|p| !p.is_empty()) else {
                warn!("No streaming choreography in {}", STREAMING_PROGRAMS);
                return;
            };

            let (tempo, loops) = {
                let mut rng = rand::rng();
                let colors = match palette_index {
                    Some(index) => *palette::palette(index),
                    None => PALETTES[rng.random_range(0..PALETTES.len())],
                };
                let picks = [
                    rng.random_range(0..=7),
                    rng.random_range(0..=7),
                    rng.random_range(0..=7),
                ];
                let mut registers = self.registers.lock();
                registers.palette = colors;
                registers.streaming_colors = picks;
                (160 + rng.random_range(0..=90u32), 3 + rng.random_range(0..=17u32))
            };
            for _ in 0..loops {
                self.play_binary(&program, Dialect::Streaming, tempo).await;
            }
        }
    }

    async fn go_ears(&self, left: u8, right: u8) {
        for (ear, position) in [(EarId::Left, left), (EarId::Right, right)] {
            if let Err(e) = self.ears.go(ear, position, Direction::Forward).await {
                debug!("{} ear: {}", ear.as_str(), e);
            }
        }
    }
}

/// Decode the part of a data URI after the media type
fn decode_inline(inline: &str) -> Option<Vec<u8>> {
    let Some(payload) = inline.strip_prefix(";base64,") else {
        warn!("Inline choreography is not base64");
        return None;
    };
    match base64::engine::general_purpose::STANDARD.decode(payload.trim()) {
        Ok(program) => Some(program),
        Err(e) => {
            warn!("Invalid inline choreography: {}", e);
            None
        }
    }
}

/// Inline programs make long log lines
fn short(reference: &str) -> &str {
    match reference.char_indices().nth(80) {
        Some((at, _)) => &reference[..at],
        None => reference,
    }
}
