//! Block driver seam
//!
//! Devices are created and destroyed by an external driver (blktap and its
//! `tap-ctl` tool in production). This layer never records mappings
//! itself; everything it knows about them comes from [`BlockDriver::list`].

use crate::error::VlmcResult;
use archip_common::VolumeName;
use derive_more::Display;
use serde::Serialize;

const TAPDISK_PAUSED: u32 = 0x2;

/// State flags reported by tapdisk
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum TapdiskState {
    #[display("running")]
    Running,
    #[display("paused")]
    Paused,
    #[display("{_0:#x}")]
    Other(u32),
}

impl TapdiskState {
    #[must_use]
    pub const fn from_raw(flags: u32) -> Self {
        if flags == 0 {
            Self::Running
        } else if flags & TAPDISK_PAUSED != 0 {
            Self::Paused
        } else {
            Self::Other(flags)
        }
    }

    #[must_use]
    pub const fn is_paused(self) -> bool {
        matches!(self, Self::Paused)
    }
}

/// A volume bound to a local block device
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MappedVolume {
    pub minor: u32,
    /// Volume name, when the device is backed by an Archipelago volume
    pub volume: Option<String>,
    /// Device path
    pub device: String,
    pub state: TapdiskState,
    /// Process serving the device
    pub pid: Option<u32>,
}

/// External block driver
pub trait BlockDriver: Send + Sync {
    /// Whether the kernel module is loaded
    fn module_loaded(&self) -> VlmcResult<bool>;

    fn load_module(&self) -> VlmcResult<()>;

    /// Devices currently exposed by the driver
    fn list(&self) -> VlmcResult<Vec<MappedVolume>>;

    /// Expose `volume` as a new device; returns the device path
    fn create(&self, volume: &VolumeName) -> VlmcResult<String>;

    fn destroy(&self, device: &str) -> VlmcResult<()>;

    /// Process holding `device` open, if any
    fn busy_pid(&self, device: &str) -> VlmcResult<Option<u32>>;

    /// Whether a filesystem is mounted on `device`
    fn is_mounted(&self, device: &str) -> VlmcResult<bool>;

    fn pause(&self, mapped: &MappedVolume) -> VlmcResult<()>;

    fn unpause(&self, mapped: &MappedVolume) -> VlmcResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tapdisk_state() {
        assert_eq!(TapdiskState::from_raw(0), TapdiskState::Running);
        assert_eq!(TapdiskState::from_raw(0x2), TapdiskState::Paused);
        assert_eq!(TapdiskState::from_raw(0x6), TapdiskState::Paused);
        assert_eq!(TapdiskState::from_raw(0x1), TapdiskState::Other(1));
        assert_eq!(TapdiskState::Other(0x10).to_string(), "0x10");
    }
}
