//! Daemon configuration
//!
//! Read from a TOML file (default `/etc/nabbit/nabbitd.toml`). Every section
//! and field is optional; missing ones take the defaults below.
//!
//! ```toml
//! [server]
//! port = 10543
//!
//! [hardware]
//! backend = "device"
//! rfid_chip = "cr14"
//!
//! [resources]
//! roots = ["/opt/nabbit"]
//! locale = "fr_FR"
//!
//! [system]
//! halt_command = ["/sbin/halt"]
//! ```

pub mod loader;

use std::net::SocketAddr;
use std::path::PathBuf;

use nabbit_core::config::{ButtonTiming, EarTiming, TagTiming};
use nabbit_core::ears::STEPS;
use serde::{Deserialize, Serialize};

pub use loader::{load, load_or_default, ConfigError, DEFAULT_CONFIG_PATH};

/// Complete daemon configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub hardware: HardwareConfig,
    pub resources: ResourcesConfig,
    pub daemon: BehaviorConfig,
    pub system: SystemConfig,
}

impl DaemonConfig {
    /// Check values serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hardware.ear_devices.len() != 2 {
            return Err(ConfigError::Invalid("hardware.ear_devices needs exactly two paths".into()));
        }
        if self.hardware.simulation.tick_ms == 0 {
            return Err(ConfigError::Invalid("hardware.simulation.tick_ms must be positive".into()));
        }
        for (name, pos) in [
            ("daemon.sleep_ear_position", self.daemon.sleep_ear_position),
            ("daemon.init_ear_position", self.daemon.init_ear_position),
        ] {
            if pos >= STEPS {
                return Err(ConfigError::Invalid(format!("{} must be below {}", name, STEPS)));
            }
        }
        Ok(())
    }
}

/// `[server]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: nabbit_protocol::PORT_NUMBER,
        }
    }
}

impl ServerConfig {
    /// Socket address to listen on
    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid server address {}:{}", self.host, self.port)))
    }
}

/// Hardware backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Simulated ears, LEDs, sound, tag reader and button
    #[default]
    Virtual,
    /// Character devices and external player
    Device,
}

/// Tag reader chip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RfidChip {
    #[default]
    Cr14,
    St25r391x,
}

/// `[hardware]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HardwareConfig {
    pub backend: Backend,
    /// Model name reported by gestalt
    pub model: String,
    /// Left then right ear devices
    pub ear_devices: Vec<PathBuf>,
    /// CR14 device; no reader when absent
    pub rfid_device: Option<PathBuf>,
    pub rfid_chip: RfidChip,
    /// Player command, the file path is appended
    pub sound_player: Vec<String>,
    pub sound_card: String,
    pub sound_input: bool,
    pub ears: EarTiming,
    pub button: ButtonTiming,
    pub tags: TagTiming,
    pub simulation: SimulationConfig,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Virtual,
            model: "2019_TAGTAG".into(),
            ear_devices: vec!["/dev/ear0".into(), "/dev/ear1".into()],
            rfid_device: Some("/dev/rfid0".into()),
            rfid_chip: RfidChip::Cr14,
            sound_player: vec!["mpg123".into(), "-q".into()],
            sound_card: "tagtagtagsound".into(),
            sound_input: true,
            ears: EarTiming::default(),
            button: ButtonTiming::default(),
            tags: TagTiming::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

/// `[hardware.simulation]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Wall-clock length of one 50 ms tick of the simulated encoder wheel
    pub tick_ms: u32,
    /// Playback length of every simulated sound
    pub sound_ms: u32,
    /// Interval at which the simulated reader answers inventories
    pub tag_poll_ms: u32,
    /// Fit the simulated robot with a tag reader
    pub rfid: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            sound_ms: 1000,
            tag_poll_ms: 200,
            rfid: true,
        }
    }
}

/// `[resources]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourcesConfig {
    /// Directories holding `sounds/` and `choreographies/` trees
    pub roots: Vec<PathBuf>,
    /// Locale subdirectory searched first, e.g. `fr_FR`
    pub locale: Option<String>,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            roots: vec!["/opt/nabbit/resources".into()],
            locale: None,
        }
    }
}

/// `[daemon]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BehaviorConfig {
    /// Longest an info animation plays before the next one
    pub info_loop_ms: u32,
    /// Quiet time after a hand-moved ear before positions are detected
    pub ear_debounce_ms: u32,
    pub sleep_ear_position: u8,
    /// Rest position until a client sends `ears`
    pub init_ear_position: u8,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            info_loop_ms: 10_000,
            ear_debounce_ms: 500,
            sleep_ear_position: 10,
            init_ear_position: 0,
        }
    }
}

/// `[system]`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SystemConfig {
    /// Run on `shutdown` and triple click; the daemon just exits when unset
    pub halt_command: Option<Vec<String>>,
    pub reboot_command: Option<Vec<String>>,
}
