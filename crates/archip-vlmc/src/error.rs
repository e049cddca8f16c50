//! Volume operation error types

use archip_common::{ConfigError, VolumeNameError};
use archip_xseg::XsegError;
use std::path::PathBuf;
use thiserror::Error;

/// Volume operation error
#[derive(Debug, Error)]
pub enum VlmcError {
    #[error("invalid volume name: {0}")]
    InvalidName(#[from] VolumeNameError),

    #[error("volume {volume}: at least one of size or snapshot must be provided")]
    MissingSizeOrSnapshot { volume: String },

    #[error("volume {volume}: size of {mib} MiB does not fit in 64 bits")]
    SizeOverflow { volume: String, mib: u64 },

    /// The peer completed the request unsuccessfully
    #[error("Cannot {verb} volume {volume}")]
    Operation { verb: &'static str, volume: String },

    #[error("volume {volume} is mapped on device {device}")]
    VolumeBusy { volume: String, device: String },

    #[error("{module} module not loaded")]
    ModuleNotLoaded { module: String },

    #[error("volume {volume} already mapped on device {device}")]
    AlreadyMapped { volume: String, device: String },

    #[error("{device}: device doesn't exist")]
    NotMapped { device: String },

    #[error("{device}: device is busy (PID: {pid})")]
    DeviceBusy { device: String, pid: u32 },

    #[error("{device}: device is mounted, cannot unmap")]
    DeviceMounted { device: String },

    #[error("Cannot {verb} volume {volume}: not implemented")]
    NotImplemented { verb: &'static str, volume: String },

    /// The block driver collaborator failed
    #[error("block driver error: {0}")]
    Driver(String),

    #[error("cannot lock {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Channel(#[from] XsegError),
}

impl VlmcError {
    /// Create a driver error
    pub fn driver(msg: impl Into<String>) -> Self {
        Self::Driver(msg.into())
    }
}

/// Result type for volume operations
pub type VlmcResult<T> = Result<T, VlmcError>;
