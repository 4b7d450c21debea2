//! Single-instance lock
//!
//! The pidfile holds the daemon's pid. A pidfile naming a live process means
//! another daemon runs; a stale one is taken over. The file is removed when
//! the lock is dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

/// Default pidfile
pub const DEFAULT_PIDFILE: &str = "/run/nabbitd.pid";

#[derive(Debug, Error)]
pub enum PidFileError {
    #[error("nabbitd already running? (pid={0})")]
    AlreadyRunning(u32),
    #[error("cannot write pid file to {path}, please fix permissions: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Held pidfile
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Take the lock for the current process
    pub fn acquire(path: &Path) -> Result<Self, PidFileError> {
        Self::acquire_as(path, std::process::id())
    }

    fn acquire_as(path: &Path, pid: u32) -> Result<Self, PidFileError> {
        if let Some(other) = read_pid(path) {
            if other != pid && is_alive(other) {
                return Err(PidFileError::AlreadyRunning(other));
            }
            warn!("Replacing stale pid file {} (pid={})", path.display(), other);
        }
        fs::write(path, format!("{}\n", pid)).map_err(|source| PidFileError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn is_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_writes_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nabbitd.pid");
        {
            let lock = PidFile::acquire(&path).unwrap();
            assert_eq!(lock.path(), path);
            assert_eq!(read_pid(&path), Some(std::process::id()));
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_live_process_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nabbitd.pid");
        // The test process itself is alive; pretend it is another daemon
        let me = std::process::id();
        fs::write(&path, format!("{}\n", me)).unwrap();
        let err = PidFile::acquire_as(&path, me + 1).unwrap_err();
        assert!(matches!(err, PidFileError::AlreadyRunning(pid) if pid == me));
    }

    #[test]
    fn test_stale_pidfile_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nabbitd.pid");
        // Above the kernel's pid_max
        fs::write(&path, "4194305\n").unwrap();
        let _lock = PidFile::acquire(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id()));
    }

    #[test]
    fn test_unwritable_location() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("nabbitd.pid");
        assert!(matches!(PidFile::acquire(&path), Err(PidFileError::Write { .. })));
    }
}
