//! System controller error types

use archip_common::{ConfigError, Role};
use archip_peer::PeerError;
use archip_vlmc::VlmcError;
use archip_xseg::XsegError;
use thiserror::Error;

/// System controller error
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("cannot start: {active} component(s) already active, try stopping first")]
    AlreadyRunning { active: usize },

    #[error("cannot stop archipelago: {count} mapped volume(s) exist")]
    MappedVolumesExist { count: usize },

    #[error("invalid peer {0}")]
    InvalidRole(Role),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Vlmc(#[from] VlmcError),

    #[error(transparent)]
    Channel(#[from] XsegError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for system control
pub type ControlResult<T> = Result<T, ControlError>;
