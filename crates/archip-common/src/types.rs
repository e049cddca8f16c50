//! Core types for Archipelago
//!
//! Peer roles and kinds, validated volume names and the size units used
//! when talking to the peers.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minimum length of a volume name
pub const MIN_VOLUME_NAME_LEN: usize = 6;

/// Prefix of the map objects backing a volume (lock objects live here)
pub const MAP_PREFIX: &str = "archip_";

/// Bytes per mebibyte; volume sizes are given in MiB and sent in bytes
pub const MIB: u64 = 1 << 20;

/// Convert a size in MiB to bytes, `None` on overflow
#[must_use]
pub fn mib_to_bytes(mib: u64) -> Option<u64> {
    mib.checked_mul(MIB)
}

/// Role a peer plays in the system
///
/// The role is the identity of a peer inside the roster; there is at most
/// one peer per role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Block store holding volume data
    #[display("blockerb")]
    Blockerb,
    /// Block store holding maps and lock objects
    #[display("blockerm")]
    Blockerm,
    /// Mapper: translates volume names to block maps
    #[display("mapperd")]
    Mapperd,
    /// Volume composer: entry point for volume I/O
    #[display("vlmcd")]
    Vlmcd,
}

impl Role {
    /// All roles, in their usual start order
    pub const ALL: [Self; 4] = [Self::Blockerb, Self::Blockerm, Self::Mapperd, Self::Vlmcd];

    /// Role name as written in configuration
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Blockerb => "blockerb",
            Self::Blockerm => "blockerm",
            Self::Mapperd => "mapperd",
            Self::Vlmcd => "vlmcd",
        }
    }
}

impl FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| RoleParseError(s.to_string()))
    }
}

/// Unknown role name
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct RoleParseError(pub String);

/// Daemon implementation backing a role
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    /// File-backed block store
    #[display("filed")]
    Filed,
    /// RADOS-backed block store
    #[display("sosd")]
    Sosd,
    /// Mapper daemon
    #[display("mapperd")]
    Mapperd,
    /// Volume composer daemon
    #[display("vlmcd")]
    Vlmcd,
}

impl PeerKind {
    /// Executable name of the daemon
    #[must_use]
    pub const fn executable(self) -> &'static str {
        match self {
            Self::Filed => "archip-filed",
            Self::Sosd => "archip-sosd",
            Self::Mapperd => "archip-mapperd",
            Self::Vlmcd => "archip-vlmcd",
        }
    }

    /// Whether this kind may run the given role
    #[must_use]
    pub const fn can_serve(self, role: Role) -> bool {
        match role {
            Role::Blockerb | Role::Blockerm => matches!(self, Self::Filed | Self::Sosd),
            Role::Mapperd => matches!(self, Self::Mapperd),
            Role::Vlmcd => matches!(self, Self::Vlmcd),
        }
    }
}

/// Volume name (validated)
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct VolumeName(String);

impl VolumeName {
    /// Create a new volume name
    pub fn new(name: impl Into<String>) -> Result<Self, VolumeNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Get the volume name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the map object holding this volume's lock
    #[must_use]
    pub fn lock_target(&self) -> String {
        format!("{MAP_PREFIX}{}", self.0)
    }

    fn validate(name: &str) -> Result<(), VolumeNameError> {
        let len = name.chars().count();
        if len < MIN_VOLUME_NAME_LEN {
            return Err(VolumeNameError::TooShort {
                name: name.to_string(),
                len,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for VolumeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VolumeName({:?})", self.0)
    }
}

impl AsRef<str> for VolumeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors that can occur when creating a volume name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VolumeNameError {
    #[error(
        "volume name {name:?} should have at least {MIN_VOLUME_NAME_LEN} characters (got {len})"
    )]
    TooShort { name: String, len: usize },
}

/// Inclusive range of segment ports a peer listens on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u32,
    pub end: u32,
}

impl PortRange {
    #[must_use]
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start > self.end
    }

    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}
