//! Configuration error types

use crate::types::{PortRange, Role};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for configuration handling
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Errors raised while loading or querying the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("roster is empty")]
    EmptyRoster,

    #[error("role {0} appears more than once in the roster")]
    DuplicateRole(Role),

    #[error("role {role} cannot run on a {kind} peer")]
    KindMismatch { role: Role, kind: String },

    #[error("role {role} has an empty port range {range}")]
    EmptyPortRange { role: Role, range: PortRange },

    #[error("port ranges of {first} ({first_range}) and {second} ({second_range}) overlap")]
    OverlappingPorts {
        first: Role,
        first_range: PortRange,
        second: Role,
        second_range: PortRange,
    },

    #[error("role {role} uses port {port} but the segment has {ports} ports")]
    PortOutOfRange { role: Role, port: u32, ports: u32 },

    #[error("role {0} is not configured")]
    MissingRole(Role),
}
