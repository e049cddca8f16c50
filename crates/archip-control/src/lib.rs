//! Archipelago system control
//!
//! The [`Controller`] composes peer supervision, the segment and volume
//! mapping into the top-level start, stop, status and restart operations.

pub mod controller;
pub mod error;

pub use controller::{Controller, PeerReport, Scope, SystemStatus};
pub use error::{ControlError, ControlResult};
