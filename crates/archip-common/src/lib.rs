//! Archipelago Common - Shared configuration and types
//!
//! This crate provides the configuration model (segment, paths and the
//! ordered peer roster), the error types raised while loading it, and the
//! small value types shared by every control-plane component.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    BlktapConfig, ChannelConfig, Config, DEFAULT_CONFIG_PATH, PathsConfig, RosterEntry,
    SegmentConfig, SupervisorConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
