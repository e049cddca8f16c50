//! System controller

use crate::error::{ControlError, ControlResult};
use archip_common::{Config, Role};
use archip_peer::{Orchestrator, PeerSet, PeerStatus, ProcessManager, Supervisor};
use archip_vlmc::{MappedVolume, VolumeMapper};
use archip_xseg::Transport;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Delay between stopping the peers and destroying the segment
const SEGMENT_SETTLE: Duration = Duration::from_millis(500);

/// What a start/stop/restart applies to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// All peers, the segment and the block driver module
    System,
    /// All peers and the segment; mapped devices are paused and resumed
    /// around the peers instead of blocking the stop
    User,
    /// A single peer
    Role(Role),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::User => f.write_str("user"),
            Self::Role(role) => write!(f, "{role}"),
        }
    }
}

/// Observed state of the whole system
#[derive(Clone, Debug, Serialize)]
pub struct SystemStatus {
    pub peers: Vec<PeerReport>,
    pub module_loaded: bool,
    pub mapped: Vec<MappedVolume>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PeerReport {
    pub role: Role,
    pub state: String,
    pub pid: Option<u32>,
}

impl PeerReport {
    fn new(role: Role, status: PeerStatus) -> Self {
        let pid = match status {
            PeerStatus::Running(pid) => Some(pid),
            PeerStatus::Stopped | PeerStatus::Stale => None,
        };
        Self {
            role,
            state: status.to_string(),
            pid,
        }
    }
}

impl SystemStatus {
    /// Running peers
    #[must_use]
    pub fn running(&self) -> usize {
        self.peers.iter().filter(|peer| peer.pid.is_some()).count()
    }

    /// Health code: running peers, plus one when volumes are mapped.
    /// Zero means fully stopped.
    #[must_use]
    pub fn code(&self) -> usize {
        self.running() + usize::from(!self.mapped.is_empty())
    }
}

/// Starts, stops and observes the configured system
pub struct Controller {
    config: Arc<Config>,
    peers: PeerSet,
    orchestrator: Orchestrator,
    transport: Arc<dyn Transport>,
    mapper: VolumeMapper,
}

impl Controller {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        processes: Arc<dyn ProcessManager>,
        transport: Arc<dyn Transport>,
        mapper: VolumeMapper,
    ) -> Self {
        let peers = PeerSet::from_config(&config);
        let supervisor = Supervisor::new(processes, &config.supervisor);
        Self {
            config,
            peers,
            orchestrator: Orchestrator::new(supervisor),
            transport,
            mapper,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn peers(&self) -> &PeerSet {
        &self.peers
    }

    fn peer(&self, role: Role) -> ControlResult<&archip_peer::Peer> {
        self.peers.get(role).ok_or(ControlError::InvalidRole(role))
    }

    /// Start the given scope.
    ///
    /// A whole-system start refuses while anything is active, and on any
    /// failure stops everything again before returning the error.
    pub async fn start(&self, scope: Scope) -> ControlResult<()> {
        match scope {
            Scope::Role(role) => {
                let peer = self.peer(role)?;
                self.orchestrator.supervisor().start_peer(peer).await?;
            }
            Scope::User => {
                self.transport.create_segment()?;
                self.orchestrator.start_all(&self.peers).await?;
                let resumed = self.mapper.resume_all()?;
                if resumed > 0 {
                    info!("resumed {resumed} mapped device(s)");
                }
            }
            Scope::System => {
                let active = self.status()?;
                if active > 0 {
                    return Err(ControlError::AlreadyRunning { active });
                }

                info!("starting archipelago");
                if let Err(e) = self.start_system().await {
                    warn!("start failed, stopping: {e}");
                    if let Err(stop_err) = self.stop(Scope::System).await {
                        warn!("cleanup after failed start: {stop_err}");
                    }
                    return Err(e);
                }
                info!("archipelago started");
            }
        }
        Ok(())
    }

    async fn start_system(&self) -> ControlResult<()> {
        self.transport.create_segment()?;
        self.orchestrator.start_all(&self.peers).await?;
        self.mapper.load_module()?;
        Ok(())
    }

    /// Stop the given scope.
    ///
    /// A whole-system stop refuses while volumes are mapped.
    pub async fn stop(&self, scope: Scope) -> ControlResult<()> {
        match scope {
            Scope::Role(role) => {
                let peer = self.peer(role)?;
                self.orchestrator.supervisor().stop_peer(peer).await?;
            }
            Scope::User => {
                let paused = self.mapper.pause_all()?;
                if paused > 0 {
                    info!("paused {paused} mapped device(s)");
                }
                self.orchestrator.stop_all(&self.peers).await?;
                self.transport.destroy_segment()?;
            }
            Scope::System => {
                let mapped = self.mapper.list_mapped()?;
                if !mapped.is_empty() {
                    return Err(ControlError::MappedVolumesExist {
                        count: mapped.len(),
                    });
                }

                info!("stopping archipelago");
                self.orchestrator.stop_all(&self.peers).await?;
                tokio::time::sleep(SEGMENT_SETTLE).await;
                self.transport.destroy_segment()?;
                info!("archipelago stopped");
            }
        }
        Ok(())
    }

    /// Observe the system without changing it
    pub fn report(&self) -> ControlResult<SystemStatus> {
        let peers = self
            .orchestrator
            .statuses(&self.peers)
            .into_iter()
            .map(|(role, status)| PeerReport::new(role, status))
            .collect();
        let module_loaded = self.mapper.module_loaded()?;
        let mapped = if module_loaded {
            self.mapper.list_mapped()?
        } else {
            Vec::new()
        };
        Ok(SystemStatus {
            peers,
            module_loaded,
            mapped,
        })
    }

    /// Health code; 0 means fully stopped
    pub fn status(&self) -> ControlResult<usize> {
        Ok(self.report()?.code())
    }

    /// Stop then start; a failed stop aborts the restart
    pub async fn restart(&self, scope: Scope) -> ControlResult<()> {
        self.stop(scope).await?;
        self.start(scope).await
    }
}
