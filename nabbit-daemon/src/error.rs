//! Daemon error types

use std::io;
use std::net::SocketAddr;

use nabbit_core::ears::EarError;
use nabbit_core::tag::TagLayoutError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::pidfile::PidFileError;

/// Failure of a hardware capability
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("ear: {0}")]
    Ear(EarError),
    #[error("tag layout: {0}")]
    Tag(TagLayoutError),
    #[error("{0} is not available")]
    Unavailable(&'static str),
    #[error("driver task stopped")]
    Closed,
    #[error("a write is already in progress")]
    Busy,
}

impl From<EarError> for DeviceError {
    fn from(e: EarError) -> Self {
        DeviceError::Ear(e)
    }
}

impl From<TagLayoutError> for DeviceError {
    fn from(e: TagLayoutError) -> Self {
        DeviceError::Tag(e)
    }
}

/// Fatal startup errors
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    PidFile(#[from] PidFileError),
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("invalid listen address {0}")]
    Address(String),
    #[error(transparent)]
    Device(#[from] DeviceError),
}
