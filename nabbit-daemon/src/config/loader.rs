//! Configuration file loading
//!
//! A missing file gives the defaults; an unreadable or invalid one is an
//! error, so a typo never silently resets the robot's settings.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use super::DaemonConfig;

/// Default configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/nabbit/nabbitd.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

/// Load and validate a configuration file
pub fn load(path: &Path) -> Result<DaemonConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: DaemonConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    debug!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Like [`load`], with the defaults when the file does not exist
pub fn load_or_default(path: &Path) -> Result<DaemonConfig, ConfigError> {
    match load(path) {
        Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            info!("No configuration at {}, using defaults", path.display());
            Ok(DaemonConfig::default())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Backend, RfidChip};
    use std::io::Write;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.server.port, 10543);
        assert_eq!(config.daemon.sleep_ear_position, 10);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let file = write_config(
            r#"
            [hardware]
            backend = "device"
            rfid_chip = "st25r391x"

            [hardware.ears]
            stall_timeout_ms = 3000

            [resources]
            locale = "fr_FR"
            "#,
        );
        let config = load(file.path()).unwrap();
        assert_eq!(config.hardware.backend, Backend::Device);
        assert_eq!(config.hardware.rfid_chip, RfidChip::St25r391x);
        assert_eq!(config.hardware.ears.stall_timeout_ms, 3000);
        assert_eq!(config.hardware.ears.debounce_ms, 20);
        assert_eq!(config.resources.locale.as_deref(), Some("fr_FR"));
        assert_eq!(config.server.port, 10543);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let file = write_config("[server]\nprot = 1\n");
        assert!(matches!(load(file.path()), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_invalid_value_is_rejected() {
        let file = write_config("[daemon]\nsleep_ear_position = 17\n");
        assert!(matches!(load_or_default(file.path()), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_server_addr() {
        let file = write_config("[server]\nhost = \"127.0.0.1\"\nport = 4000\n");
        let addr = load(file.path()).unwrap().server.addr().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:4000");
    }
}
