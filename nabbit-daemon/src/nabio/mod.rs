//! Hardware facade
//!
//! Robot-level actions composed from the capabilities: sequences and
//! messages, info animations, ear moves, self-tests and the feedback shown
//! around tag operations. The facade owns the cancel flag that interrupts a
//! sequence. The daemon is its only caller.

pub mod cancel;
pub mod player;

use std::sync::Arc;
use std::time::Duration;

use nabbit_core::ears::EarId;
use nabbit_core::traits::{Direction, Led, Rgb, LED_COUNT};
use nabbit_protocol::{Animation, GestaltHardware, SequenceItem};
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use cancel::CancelFlag;
pub use player::ChoreographyPlayer;

use crate::capabilities::{Hardware, Rfid};
use crate::resources::{ResourceLocator, SOUNDS};

/// Played after a cancel with feedback
const ABORT_SOUNDS: &str = "nabd/abort/*.mp3";

/// Played when a tag is laid on the reader
const RFID_DETECTED_SOUND: &str = "rfid/nfc.wav";

const RFID_AWAITING_COLOR: Rgb = Rgb::new(0, 0, 255);

/// Colors cycled by the LED self-test
const TEST_COLORS: [Rgb; 3] = [Rgb::new(255, 0, 0), Rgb::new(0, 255, 0), Rgb::new(0, 0, 255)];

const TEST_FRAME: Duration = Duration::from_millis(200);

/// Positions the ear self-test visits
const TEST_EAR_POSITIONS: [(u8, u8); 2] = [(8, 4), (0, 0)];

pub struct NabIo {
    hardware: Hardware,
    locator: Arc<RwLock<ResourceLocator>>,
    player: ChoreographyPlayer,
    cancel: CancelFlag,
}

impl NabIo {
    pub fn new(hardware: Hardware, locator: ResourceLocator) -> Self {
        let locator = Arc::new(RwLock::new(locator));
        let player = ChoreographyPlayer::new(
            hardware.ears.clone(),
            hardware.leds.clone(),
            hardware.sound.clone(),
            locator.clone(),
        );
        Self {
            hardware,
            locator,
            player,
            cancel: CancelFlag::new(),
        }
    }

    pub fn hardware(&self) -> &Hardware {
        &self.hardware
    }

    pub fn rfid(&self) -> Option<&Arc<dyn Rfid>> {
        self.hardware.rfid.as_ref()
    }

    /// Swap the resource roots and locale
    pub fn set_locator(&self, locator: ResourceLocator) {
        *self.locator.write() = locator;
    }

    pub fn locator(&self) -> ResourceLocator {
        self.locator.read().clone()
    }

    /// Set every LED, indexed by [`Led::index`]
    pub fn set_leds(&self, colors: [Rgb; LED_COUNT]) {
        for led in Led::ALL {
            self.hardware.leds.set(led, colors[led.index()]);
        }
    }

    pub fn pulse(&self, led: Led, color: Rgb) {
        self.hardware.leds.pulse(led, color);
    }

    /// Move both ears forward and wait until they are there
    ///
    /// Unknown positions are detected first.
    pub async fn move_ears(&self, left: u8, right: u8) {
        let ears = &self.hardware.ears;
        let (known_left, known_right) = ears.positions().await;
        if known_left.is_none() || known_right.is_none() {
            ears.detect_positions().await;
        }
        for (ear, position) in [(EarId::Left, left), (EarId::Right, right)] {
            if let Err(e) = ears.go(ear, position, Direction::Forward).await {
                warn!("Cannot move {} ear: {}", ear.as_str(), e);
            }
        }
        ears.wait_while_running().await;
    }

    /// Move the ears with every LED lit in `color`
    pub async fn move_ears_with_leds(&self, color: Rgb, left: u8, right: u8) {
        self.hardware.leds.set_all(color);
        self.move_ears(left, right).await;
        self.hardware.leds.set_all(Rgb::OFF);
    }

    pub async fn detect_ears_positions(&self) -> (Option<u8>, Option<u8>) {
        self.hardware.ears.detect_positions().await
    }

    /// Loop an info animation for at most `loop_ms`
    ///
    /// Returns `true` if `wake` was notified, which ends the animation at
    /// once.
    pub async fn play_info(&self, animation: &Animation, loop_ms: u32, wake: &Notify) -> bool {
        let deadline = Instant::now() + Duration::from_millis(loop_ms as u64);
        if animation.colors.is_empty() {
            return tokio::time::timeout_at(deadline, wake.notified()).await.is_ok();
        }
        let frame = frame_length(animation.tempo);
        let frames = async {
            loop {
                for colors in &animation.colors {
                    self.set_leds(*colors);
                    if tokio::time::timeout(frame, wake.notified()).await.is_ok() {
                        return;
                    }
                }
            }
        };
        tokio::time::timeout_at(deadline, frames).await.is_ok()
    }

    /// Play a command sequence
    pub async fn play_sequence(&self, sequence: &[SequenceItem]) {
        self.cancel.reset();
        self.play_items(sequence).await;
    }

    /// Play a message: signature, body, then the signature again
    pub async fn play_message(&self, signature: Option<&SequenceItem>, body: &[SequenceItem]) {
        self.cancel.reset();
        let items = signature.into_iter().chain(body).chain(signature);
        for item in items {
            if self.cancel.is_raised() {
                break;
            }
            self.play_item(item).await;
        }
    }

    async fn play_items(&self, items: &[SequenceItem]) {
        for item in items {
            if self.cancel.is_raised() {
                break;
            }
            self.play_item(item).await;
        }
    }

    /// Audio and choreography of one item
    ///
    /// With audio, the choreography is stopped when the last file ends.
    /// Without, the choreography runs to its end.
    async fn play_item(&self, item: &SequenceItem) {
        if let Some(choreography) = &item.choreography {
            self.player.start(choreography).await;
        }
        if item.audio.is_empty() {
            if item.choreography.is_some() {
                tokio::select! {
                    _ = self.player.wait_until_done() => {}
                    _ = self.cancel.raised() => {}
                }
                self.player.stop().await;
            }
            return;
        }

        let sound = &self.hardware.sound;
        for audio in &item.audio {
            if self.cancel.is_raised() {
                break;
            }
            let path = self.locator.read().find(SOUNDS, audio);
            let Some(path) = path else {
                warn!("Sound {} not found", audio);
                continue;
            };
            if let Err(e) = sound.start(&path).await {
                warn!("Cannot play {}: {}", path.display(), e);
                continue;
            }
            tokio::select! {
                _ = sound.wait_until_done() => {}
                _ = self.cancel.raised() => {}
            }
        }
        if item.choreography.is_some() {
            self.player.stop().await;
        }
    }

    /// Abort the sequence being played
    pub async fn cancel(&self, feedback: bool) {
        info!("Canceling playback");
        self.cancel.raise();
        self.hardware.sound.stop().await;
        self.player.stop().await;
        if feedback {
            self.play_and_wait(ABORT_SOUNDS).await;
        }
    }

    async fn play_and_wait(&self, name: &str) {
        let path = self.locator.read().find(SOUNDS, name);
        let Some(path) = path else {
            debug!("No {} sound", name);
            return;
        };
        match self.hardware.sound.start(&path).await {
            Ok(()) => self.hardware.sound.wait_until_done().await,
            Err(e) => warn!("Cannot play {}: {}", path.display(), e),
        }
    }

    pub fn gestalt(&self) -> GestaltHardware {
        let sound = &self.hardware.sound;
        let ears = &self.hardware.ears;
        GestaltHardware {
            model: self.hardware.model.clone(),
            sound_card: sound.sound_card(),
            sound_input: sound.has_input(),
            rfid: self.hardware.rfid.is_some(),
            left_ear_status: ears.status(EarId::Left).to_string(),
            right_ear_status: ears.status(EarId::Right).to_string(),
        }
    }

    /// Run a hardware self-test, `ears` or `leds`
    pub async fn test(&self, name: &str) -> bool {
        let passed = match name {
            "ears" => self.test_ears().await,
            "leds" => self.test_leds().await,
            _ => {
                warn!("Unknown hardware test {}", name);
                return false;
            }
        };
        info!("Hardware test {}: {}", name, if passed { "passed" } else { "failed" });
        passed
    }

    async fn test_ears(&self) -> bool {
        let ears = &self.hardware.ears;
        let (left, right) = ears.detect_positions().await;
        if left.is_none() || right.is_none() {
            return false;
        }
        for (left, right) in TEST_EAR_POSITIONS {
            self.move_ears(left, right).await;
            if ears.positions().await != (Some(left), Some(right)) {
                return false;
            }
        }
        true
    }

    async fn test_leds(&self) -> bool {
        let leds = &self.hardware.leds;
        let mut passed = true;
        for color in TEST_COLORS {
            leds.set_all(color);
            tokio::time::sleep(TEST_FRAME).await;
            passed &= leds.colors() == [color; LED_COUNT];
        }
        leds.set_all(Rgb::OFF);
        passed
    }

    pub async fn rfid_detected_feedback(&self) {
        let path = self.locator.read().find(SOUNDS, RFID_DETECTED_SOUND);
        if let Some(path) = path {
            if let Err(e) = self.hardware.sound.start(&path).await {
                warn!("Cannot play {}: {}", path.display(), e);
            }
        }
    }

    pub fn rfid_awaiting_feedback(&self) {
        self.hardware.leds.pulse(Led::Nose, RFID_AWAITING_COLOR);
    }

    pub fn rfid_done_feedback(&self) {
        self.hardware.leds.set(Led::Nose, Rgb::OFF);
    }

    /// Boot progress on the LEDs; step 0 is the shutdown pattern
    pub fn boot_leds(&self, step: u8) {
        let lit: &[Led] = match step {
            1 | 2 => &[Led::Left],
            3 => &[Led::Left, Led::Center],
            4 => &[Led::Left, Led::Center, Led::Right],
            _ => &[],
        };
        let mut colors = [Rgb::FUCHSIA; LED_COUNT];
        for led in lit {
            colors[led.index()] = Rgb::WHITE;
        }
        self.set_leds(colors);
    }
}

/// Info frames last `tempo` hundredths of a second
fn frame_length(tempo: f64) -> Duration {
    let secs = tempo * 0.01;
    if secs.is_finite() && secs > 0.01 {
        Duration::from_secs_f64(secs.min(3600.0))
    } else {
        Duration::from_millis(10)
    }
}
