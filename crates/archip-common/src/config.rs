//! Configuration types for Archipelago
//!
//! The configuration is loaded once per invocation from a TOML file. It
//! describes the shared segment, the filesystem paths the control plane
//! uses, and the ordered roster of peers. Roster order is significant:
//! peers start in declared order and stop in reverse.

use crate::error::{ConfigError, ConfigResult};
use crate::types::{PeerKind, PortRange, Role};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/archipelago/archipelago.toml";

/// Root configuration for Archipelago
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shared segment configuration
    pub segment: SegmentConfig,
    /// Filesystem locations
    pub paths: PathsConfig,
    /// Peer supervision timing
    pub supervisor: SupervisorConfig,
    /// Request channel settings
    pub channel: ChannelConfig,
    /// Block driver settings
    pub blktap: BlktapConfig,
    /// Ordered peer roster
    pub roles: Vec<RosterEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            segment: SegmentConfig::default(),
            paths: PathsConfig::default(),
            supervisor: SupervisorConfig::default(),
            channel: ChannelConfig::default(),
            blktap: BlktapConfig::default(),
            roles: default_roster(),
        }
    }
}

impl Config {
    /// Load and validate the configuration at `path`
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate a configuration from TOML text
    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check roster invariants
    pub fn validate(&self) -> ConfigResult<()> {
        if self.roles.is_empty() {
            return Err(ConfigError::EmptyRoster);
        }

        let mut seen = HashSet::new();
        for entry in &self.roles {
            if !seen.insert(entry.role) {
                return Err(ConfigError::DuplicateRole(entry.role));
            }
            if !entry.kind.can_serve(entry.role) {
                return Err(ConfigError::KindMismatch {
                    role: entry.role,
                    kind: entry.kind.to_string(),
                });
            }
            let range = entry.ports();
            if range.is_empty() {
                return Err(ConfigError::EmptyPortRange {
                    role: entry.role,
                    range,
                });
            }
            if range.end >= self.segment.ports {
                return Err(ConfigError::PortOutOfRange {
                    role: entry.role,
                    port: range.end,
                    ports: self.segment.ports,
                });
            }
        }

        for (i, first) in self.roles.iter().enumerate() {
            for second in &self.roles[i + 1..] {
                if first.ports().overlaps(&second.ports()) {
                    return Err(ConfigError::OverlappingPorts {
                        first: first.role,
                        first_range: first.ports(),
                        second: second.role,
                        second_range: second.ports(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Ordered roster
    #[must_use]
    pub fn roster(&self) -> &[RosterEntry] {
        &self.roles
    }

    /// Roster entry for a role
    #[must_use]
    pub fn entry(&self, role: Role) -> Option<&RosterEntry> {
        self.roles.iter().find(|entry| entry.role == role)
    }

    /// First port of the peer serving `role`
    pub fn port_of(&self, role: Role) -> ConfigResult<u32> {
        self.entry(role)
            .map(|entry| entry.portno_start)
            .ok_or(ConfigError::MissingRole(role))
    }
}

/// Shared segment configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Segment type (e.g. "posix")
    pub kind: String,
    /// Segment name
    pub name: String,
    /// Number of ports in the segment
    pub ports: u32,
    /// Segment size in MiB
    pub size_mb: u64,
    /// Alignment shift of segment allocations
    pub align_shift: u32,
    /// Directory the segment lives under
    pub dir: PathBuf,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            kind: "posix".to_string(),
            name: "archipelago".to_string(),
            ports: 1024,
            size_mb: 5120,
            align_shift: 12,
            dir: PathBuf::from("/dev/shm"),
        }
    }
}

impl SegmentConfig {
    /// Segment spec string passed to every peer (`kind:name:ports:size:align`)
    #[must_use]
    pub fn spec(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.kind, self.name, self.ports, self.size_mb, self.align_shift
        )
    }

    /// Directory backing this segment
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }
}

/// Filesystem locations used by the control plane
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding the peer executables
    pub bin_dir: PathBuf,
    /// Directory peers write their pidfiles to
    pub pidfile_dir: PathBuf,
    /// Directory peers write their logs to
    pub log_dir: PathBuf,
    /// Lock file serializing mapping operations across processes
    pub lock_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            bin_dir: PathBuf::from("/usr/bin"),
            pidfile_dir: PathBuf::from("/var/run/archipelago"),
            log_dir: PathBuf::from("/var/log/archipelago"),
            lock_file: PathBuf::from("/var/lock/archipelago.lock"),
        }
    }
}

/// Peer supervision timing
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Interval between liveness polls (milliseconds)
    pub poll_interval_ms: u64,
    /// Polls before a start is declared failed
    pub start_attempts: u32,
    /// Polls before a stop is declared failed
    pub stop_attempts: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            start_attempts: 30,  // 3 s
            stop_attempts: 150, // 15 s
        }
    }
}

impl SupervisorConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Request channel settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Upper bound on waiting for a single reply (milliseconds)
    pub request_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
        }
    }
}

impl ChannelConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Block driver settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BlktapConfig {
    /// Kernel module gating all mapping operations
    pub module: String,
    /// Device path prefix; the minor number is appended
    pub device_prefix: String,
    /// tap-ctl executable
    pub tap_ctl: String,
    /// Driver name tapdisk uses for Archipelago volumes
    pub driver: String,
}

impl Default for BlktapConfig {
    fn default() -> Self {
        Self {
            module: "blktap".to_string(),
            device_prefix: "/dev/xen/blktap-2/tapdev".to_string(),
            tap_ctl: "tap-ctl".to_string(),
            driver: "archipelago".to_string(),
        }
    }
}

/// One peer in the roster
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Role this peer plays
    pub role: Role,
    /// Daemon implementation
    pub kind: PeerKind,
    /// First port the peer listens on
    pub portno_start: u32,
    /// Last port the peer listens on
    pub portno_end: u32,
    /// Concurrent operations the peer accepts
    #[serde(default = "default_nr_ops")]
    pub nr_ops: u32,
    /// Role-specific startup parameters, passed as `--key value`
    #[serde(default)]
    pub params: BTreeMap<String, toml::Value>,
}

impl RosterEntry {
    #[must_use]
    pub fn new(role: Role, kind: PeerKind, portno_start: u32, portno_end: u32) -> Self {
        Self {
            role,
            kind,
            portno_start,
            portno_end,
            nr_ops: default_nr_ops(),
            params: BTreeMap::new(),
        }
    }

    /// Add a startup parameter
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn ports(&self) -> PortRange {
        PortRange::new(self.portno_start, self.portno_end)
    }
}

const fn default_nr_ops() -> u32 {
    16
}

fn default_roster() -> Vec<RosterEntry> {
    vec![
        RosterEntry::new(Role::Blockerb, PeerKind::Filed, 1000, 1000)
            .with_param("archip-dir", "/srv/archip/blocks"),
        RosterEntry::new(Role::Blockerm, PeerKind::Filed, 1002, 1002)
            .with_param("archip-dir", "/srv/archip/maps"),
        RosterEntry::new(Role::Mapperd, PeerKind::Mapperd, 1001, 1001)
            .with_param("bp", 1000_i64)
            .with_param("mbp", 1002_i64),
        RosterEntry::new(Role::Vlmcd, PeerKind::Vlmcd, 500, 999)
            .with_param("mp", 1001_i64)
            .with_param("bp", 1000_i64),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.segment.spec(), "posix:archipelago:1024:5120:12");
        assert_eq!(config.port_of(Role::Mapperd).unwrap(), 1001);
        assert_eq!(config.port_of(Role::Vlmcd).unwrap(), 500);
        assert_eq!(config.supervisor.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_parse_roster_order() {
        let config = Config::from_toml_str(
            r#"
            [segment]
            name = "test"

            [[roles]]
            role = "blockerm"
            kind = "filed"
            portno_start = 2
            portno_end = 2

            [[roles]]
            role = "mapperd"
            kind = "mapperd"
            portno_start = 1
            portno_end = 1
            [roles.params]
            mbp = 2
            "#,
        )
        .unwrap();

        let roles: Vec<Role> = config.roster().iter().map(|e| e.role).collect();
        assert_eq!(roles, vec![Role::Blockerm, Role::Mapperd]);
        assert_eq!(config.segment.name, "test");
        assert_eq!(config.segment.ports, 1024);
        assert_eq!(config.roster()[1].params["mbp"].as_integer(), Some(2));
        assert!(matches!(
            config.port_of(Role::Vlmcd),
            Err(ConfigError::MissingRole(Role::Vlmcd))
        ));
    }

    #[test]
    fn test_duplicate_role_rejected() {
        let mut config = Config::default();
        config
            .roles
            .push(RosterEntry::new(Role::Mapperd, PeerKind::Mapperd, 3, 3));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateRole(Role::Mapperd))
        ));
    }

    #[test]
    fn test_overlapping_ports_rejected() {
        let mut config = Config::default();
        config.roles = vec![
            RosterEntry::new(Role::Blockerb, PeerKind::Filed, 1, 4),
            RosterEntry::new(Role::Mapperd, PeerKind::Mapperd, 4, 4),
        ];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OverlappingPorts { .. })
        ));
    }

    #[test]
    fn test_invalid_ports_rejected() {
        let mut config = Config::default();
        config.roles = vec![RosterEntry::new(Role::Mapperd, PeerKind::Mapperd, 5, 4)];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyPortRange { .. })
        ));

        config.roles = vec![RosterEntry::new(Role::Mapperd, PeerKind::Mapperd, 1, 2000)];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PortOutOfRange { port: 2000, .. })
        ));
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let mut config = Config::default();
        config.roles = vec![RosterEntry::new(Role::Vlmcd, PeerKind::Filed, 1, 1)];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::KindMismatch { role: Role::Vlmcd, .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archipelago.toml");
        std::fs::write(
            &path,
            r#"
            [paths]
            lock_file = "/tmp/archip.lock"
            "#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.paths.lock_file, PathBuf::from("/tmp/archip.lock"));
        assert_eq!(config.roster().len(), 4);
    }
}
