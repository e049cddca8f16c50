//! Peers resolved from the roster

use archip_common::{Config, PeerKind, PortRange, Role, RosterEntry};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One storage daemon, as configured for this invocation
#[derive(Clone, Debug)]
pub struct Peer {
    role: Role,
    kind: PeerKind,
    ports: PortRange,
    nr_ops: u32,
    params: BTreeMap<String, toml::Value>,
    executable: PathBuf,
    pidfile: PathBuf,
    logfile: PathBuf,
    segment_spec: String,
}

impl Peer {
    /// Resolve a roster entry against the configuration
    #[must_use]
    pub fn from_entry(entry: &RosterEntry, config: &Config) -> Self {
        let paths = &config.paths;
        Self {
            role: entry.role,
            kind: entry.kind,
            ports: entry.ports(),
            nr_ops: entry.nr_ops,
            params: entry.params.clone(),
            executable: paths.bin_dir.join(entry.kind.executable()),
            pidfile: paths.pidfile_dir.join(format!("{}.pid", entry.role)),
            logfile: paths.log_dir.join(format!("{}.log", entry.role)),
            segment_spec: config.segment.spec(),
        }
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub const fn kind(&self) -> PeerKind {
        self.kind
    }

    #[must_use]
    pub const fn ports(&self) -> PortRange {
        self.ports
    }

    /// First port the peer listens on
    #[must_use]
    pub const fn portno_start(&self) -> u32 {
        self.ports.start
    }

    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    #[must_use]
    pub fn pidfile(&self) -> &Path {
        &self.pidfile
    }

    #[must_use]
    pub fn logfile(&self) -> &Path {
        &self.logfile
    }

    /// Command line the daemon is started with (daemonized)
    #[must_use]
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![
            "-g".to_string(),
            self.segment_spec.clone(),
            "-sp".to_string(),
            self.ports.start.to_string(),
            "-ep".to_string(),
            self.ports.end.to_string(),
            "-n".to_string(),
            self.nr_ops.to_string(),
            "--pidfile".to_string(),
            self.pidfile.display().to_string(),
            "-l".to_string(),
            self.logfile.display().to_string(),
            "-d".to_string(),
        ];

        for (key, value) in &self.params {
            match value {
                toml::Value::Boolean(false) => {}
                toml::Value::Boolean(true) => args.push(format!("--{key}")),
                toml::Value::String(s) => {
                    args.push(format!("--{key}"));
                    args.push(s.clone());
                }
                other => {
                    args.push(format!("--{key}"));
                    args.push(other.to_string());
                }
            }
        }

        args
    }
}

/// Ordered set of peers built from the roster
#[derive(Clone, Debug, Default)]
pub struct PeerSet {
    peers: Vec<Peer>,
}

impl PeerSet {
    #[must_use]
    pub const fn new(peers: Vec<Peer>) -> Self {
        Self { peers }
    }

    /// Build the set in roster order
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config
                .roster()
                .iter()
                .map(|entry| Peer::from_entry(entry, config))
                .collect(),
        )
    }

    #[must_use]
    pub fn get(&self, role: Role) -> Option<&Peer> {
        self.peers.iter().find(|peer| peer.role == role)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Peer] {
        &self.peers
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Peer> {
        self.peers.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl<'a> IntoIterator for &'a PeerSet {
    type Item = &'a Peer;
    type IntoIter = std::slice::Iter<'a, Peer>;

    fn into_iter(self) -> Self::IntoIter {
        self.peers.iter()
    }
}
