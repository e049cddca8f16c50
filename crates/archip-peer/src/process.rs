//! Process management for peers
//!
//! Peers daemonize themselves and record their process id in a pidfile.
//! A peer counts as running when its pidfile names a live process.

use crate::error::{PeerError, PeerResult};
use crate::peer::Peer;
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Side effects of starting, stopping and observing a peer process
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// Spawn the peer; returns once the daemon has detached
    async fn launch(&self, peer: &Peer) -> PeerResult<()>;

    /// Ask the process `pid` of `peer` to exit
    async fn terminate(&self, peer: &Peer, pid: u32) -> PeerResult<()>;

    /// Live process id of the peer.
    ///
    /// `Ok(None)` when no pidfile exists, `StaleState` when one exists but
    /// its process cannot be confirmed alive.
    fn pid(&self, peer: &Peer) -> PeerResult<Option<u32>>;

    /// Remove leftover runtime state of the peer
    fn clear(&self, peer: &Peer);
}

/// [`ProcessManager`] backed by real processes and pidfiles
#[derive(Clone, Copy, Debug, Default)]
pub struct PidfileProcessManager;

impl PidfileProcessManager {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn stale(peer: &Peer) -> PeerError {
    PeerError::StaleState {
        role: peer.role(),
        pidfile: peer.pidfile().to_path_buf(),
    }
}

fn ensure_parent(path: &std::path::Path) -> io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

#[async_trait]
impl ProcessManager for PidfileProcessManager {
    async fn launch(&self, peer: &Peer) -> PeerResult<()> {
        let launch_err = |reason: String| PeerError::Launch {
            role: peer.role(),
            reason,
        };

        ensure_parent(peer.pidfile()).map_err(|e| launch_err(e.to_string()))?;
        ensure_parent(peer.logfile()).map_err(|e| launch_err(e.to_string()))?;

        let args = peer.command_args();
        debug!("launching {}: {} {}", peer.role(), peer.executable().display(), args.join(" "));

        let status = Command::new(peer.executable())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| launch_err(format!("{}: {e}", peer.executable().display())))?;

        if !status.success() {
            return Err(launch_err(format!("daemon exited with {status}")));
        }
        Ok(())
    }

    async fn terminate(&self, peer: &Peer, pid: u32) -> PeerResult<()> {
        let raw = i32::try_from(pid).map_err(|_| stale(peer))?;
        match signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(PeerError::Terminate {
                role: peer.role(),
                reason: errno.desc().to_string(),
            }),
        }
    }

    fn pid(&self, peer: &Peer) -> PeerResult<Option<u32>> {
        let contents = match std::fs::read_to_string(peer.pidfile()) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!("cannot read pidfile {}: {e}", peer.pidfile().display());
                return Err(stale(peer));
            }
        };

        let pid: u32 = contents.trim().parse().map_err(|_| stale(peer))?;
        let raw = i32::try_from(pid)
            .ok()
            .filter(|raw| *raw > 0)
            .ok_or_else(|| stale(peer))?;

        // EPERM: the process exists but belongs to someone else
        match signal::kill(Pid::from_raw(raw), None) {
            Ok(()) | Err(Errno::EPERM) => Ok(Some(pid)),
            Err(_) => Err(stale(peer)),
        }
    }

    fn clear(&self, peer: &Peer) {
        match std::fs::remove_file(peer.pidfile()) {
            Ok(()) => debug!("removed pidfile {}", peer.pidfile().display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("cannot remove pidfile {}: {e}", peer.pidfile().display()),
        }
    }
}
