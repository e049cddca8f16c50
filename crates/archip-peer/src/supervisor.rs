//! Single-peer supervision

use crate::error::{PeerError, PeerResult};
use crate::peer::Peer;
use crate::poll::{PollPolicy, poll_until};
use crate::process::ProcessManager;
use archip_common::SupervisorConfig;
use derive_more::Display;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Observed state of a peer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum PeerStatus {
    #[display("running (pid {_0})")]
    Running(u32),
    #[display("stopped")]
    Stopped,
    /// Pidfile left behind by a process that is gone
    #[display("stale pidfile")]
    Stale,
}

impl PeerStatus {
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running(_))
    }
}

/// Starts and stops individual peers
#[derive(Clone)]
pub struct Supervisor {
    processes: Arc<dyn ProcessManager>,
    start_policy: PollPolicy,
    stop_policy: PollPolicy,
}

impl Supervisor {
    #[must_use]
    pub fn new(processes: Arc<dyn ProcessManager>, config: &SupervisorConfig) -> Self {
        Self::with_policies(processes, PollPolicy::start(config), PollPolicy::stop(config))
    }

    #[must_use]
    pub fn with_policies(
        processes: Arc<dyn ProcessManager>,
        start_policy: PollPolicy,
        stop_policy: PollPolicy,
    ) -> Self {
        Self {
            processes,
            start_policy,
            stop_policy,
        }
    }

    /// Whether the peer has a live process
    pub fn is_running(&self, peer: &Peer) -> PeerResult<bool> {
        Ok(self.processes.pid(peer)?.is_some())
    }

    /// Observe the peer without failing on stale state
    pub fn status(&self, peer: &Peer) -> PeerStatus {
        match self.processes.pid(peer) {
            Ok(Some(pid)) => PeerStatus::Running(pid),
            Ok(None) => PeerStatus::Stopped,
            Err(e) => {
                debug!("{e}");
                PeerStatus::Stale
            }
        }
    }

    /// Start the peer and wait until it reports running
    pub async fn start_peer(&self, peer: &Peer) -> PeerResult<()> {
        let role = peer.role();
        if self.is_running(peer)? {
            return Err(PeerError::AlreadyRunning { role });
        }

        info!("starting {role}");
        self.processes.launch(peer).await?;

        let processes = &self.processes;
        let up = poll_until(self.start_policy, || Ok(processes.pid(peer)?.is_some())).await?;
        if !up {
            return Err(PeerError::StartTimeout {
                role,
                waited_ms: self.start_policy.budget_ms(),
            });
        }

        debug!("{role} is running");
        Ok(())
    }

    /// Stop the peer and wait until its process is gone.
    ///
    /// Stopping a peer that is not running succeeds without side effects.
    /// A stale pidfile counts as stopped and is removed.
    pub async fn stop_peer(&self, peer: &Peer) -> PeerResult<()> {
        let role = peer.role();
        let pid = match self.processes.pid(peer) {
            Ok(Some(pid)) => pid,
            Ok(None) => {
                debug!("{role} is not running");
                return Ok(());
            }
            Err(PeerError::StaleState { .. }) => {
                warn!("{role} left a stale pidfile, clearing it");
                self.processes.clear(peer);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        info!("stopping {role} (pid {pid})");
        self.processes.terminate(peer, pid).await?;

        let processes = &self.processes;
        let gone = poll_until(self.stop_policy, || match processes.pid(peer) {
            Ok(pid) => Ok(pid.is_none()),
            // Process exited without removing its pidfile
            Err(PeerError::StaleState { .. }) => {
                processes.clear(peer);
                Ok(true)
            }
            Err(e) => Err(e),
        })
        .await?;

        if !gone {
            return Err(PeerError::StopTimeout {
                role,
                waited_ms: self.stop_policy.budget_ms(),
            });
        }

        debug!("{role} stopped");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::peer::PeerSet;
    use archip_common::{Config, Role};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::time::Instant;

    /// How a fake peer reacts to being started or stopped
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) enum Behavior {
        Normal,
        NeverStarts,
        NeverStops,
        FailsLaunch,
        /// Parent exits non-zero after the daemon already forked
        LaunchFailsAfterFork,
    }

    #[derive(Debug, Default)]
    pub(crate) struct FakeState {
        pub running: HashMap<Role, u32>,
        pub stale: Vec<Role>,
        pub behavior: HashMap<Role, Behavior>,
        pub launched: Vec<Role>,
        pub terminated: Vec<Role>,
        pub cleared: Vec<Role>,
        next_pid: u32,
    }

    /// In-memory process manager recording every side effect
    #[derive(Debug, Default)]
    pub(crate) struct FakeProcesses {
        pub state: Mutex<FakeState>,
    }

    impl FakeProcesses {
        pub fn with_behavior(role: Role, behavior: Behavior) -> Self {
            let fake = Self::default();
            fake.state.lock().behavior.insert(role, behavior);
            fake
        }

        fn behavior(&self, role: Role) -> Behavior {
            self.state
                .lock()
                .behavior
                .get(&role)
                .copied()
                .unwrap_or(Behavior::Normal)
        }
    }

    #[async_trait]
    impl ProcessManager for FakeProcesses {
        async fn launch(&self, peer: &Peer) -> PeerResult<()> {
            let behavior = self.behavior(peer.role());
            let mut state = self.state.lock();
            state.launched.push(peer.role());
            match behavior {
                Behavior::FailsLaunch => Err(PeerError::Launch {
                    role: peer.role(),
                    reason: "exec failed".to_string(),
                }),
                Behavior::LaunchFailsAfterFork => {
                    state.next_pid += 1;
                    let pid = 1000 + state.next_pid;
                    state.running.insert(peer.role(), pid);
                    Err(PeerError::Launch {
                        role: peer.role(),
                        reason: "exit 1".to_string(),
                    })
                }
                Behavior::NeverStarts => Ok(()),
                Behavior::Normal | Behavior::NeverStops => {
                    state.next_pid += 1;
                    let pid = 1000 + state.next_pid;
                    state.running.insert(peer.role(), pid);
                    Ok(())
                }
            }
        }

        async fn terminate(&self, peer: &Peer, _pid: u32) -> PeerResult<()> {
            let behavior = self.behavior(peer.role());
            let mut state = self.state.lock();
            state.terminated.push(peer.role());
            if behavior != Behavior::NeverStops {
                state.running.remove(&peer.role());
            }
            Ok(())
        }

        fn pid(&self, peer: &Peer) -> PeerResult<Option<u32>> {
            let state = self.state.lock();
            if state.stale.contains(&peer.role()) {
                return Err(PeerError::StaleState {
                    role: peer.role(),
                    pidfile: peer.pidfile().to_path_buf(),
                });
            }
            Ok(state.running.get(&peer.role()).copied())
        }

        fn clear(&self, peer: &Peer) {
            let mut state = self.state.lock();
            state.stale.retain(|role| *role != peer.role());
            state.cleared.push(peer.role());
        }
    }

    pub(crate) fn supervisor(fake: &Arc<FakeProcesses>) -> Supervisor {
        let processes: Arc<dyn ProcessManager> = fake.clone();
        Supervisor::new(processes, &SupervisorConfig::default())
    }

    fn peer(role: Role) -> Peer {
        PeerSet::from_config(&Config::default())
            .get(role)
            .unwrap()
            .clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop() {
        let fake = Arc::new(FakeProcesses::default());
        let supervisor = supervisor(&fake);
        let mapperd = peer(Role::Mapperd);

        supervisor.start_peer(&mapperd).await.unwrap();
        assert!(supervisor.status(&mapperd).is_running());

        supervisor.stop_peer(&mapperd).await.unwrap();
        assert_eq!(supervisor.status(&mapperd), PeerStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_already_running() {
        let fake = Arc::new(FakeProcesses::default());
        let supervisor = supervisor(&fake);
        let vlmcd = peer(Role::Vlmcd);

        supervisor.start_peer(&vlmcd).await.unwrap();
        let err = supervisor.start_peer(&vlmcd).await.unwrap_err();
        assert!(matches!(err, PeerError::AlreadyRunning { role: Role::Vlmcd }));
        assert_eq!(fake.state.lock().launched, vec![Role::Vlmcd]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_timeout_after_three_seconds() {
        let fake = Arc::new(FakeProcesses::with_behavior(
            Role::Blockerb,
            Behavior::NeverStarts,
        ));
        let supervisor = supervisor(&fake);
        let started = Instant::now();

        let err = supervisor.start_peer(&peer(Role::Blockerb)).await.unwrap_err();
        assert!(matches!(
            err,
            PeerError::StartTimeout {
                role: Role::Blockerb,
                waited_ms: 3000
            }
        ));
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_timeout_after_fifteen_seconds() {
        let fake = Arc::new(FakeProcesses::with_behavior(
            Role::Mapperd,
            Behavior::NeverStops,
        ));
        let supervisor = supervisor(&fake);
        let mapperd = peer(Role::Mapperd);
        supervisor.start_peer(&mapperd).await.unwrap();

        let started = Instant::now();
        let err = supervisor.stop_peer(&mapperd).await.unwrap_err();
        assert!(matches!(
            err,
            PeerError::StopTimeout {
                role: Role::Mapperd,
                waited_ms: 15_000
            }
        ));
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let fake = Arc::new(FakeProcesses::default());
        let supervisor = supervisor(&fake);
        let blockerm = peer(Role::Blockerm);

        supervisor.stop_peer(&blockerm).await.unwrap();
        supervisor.stop_peer(&blockerm).await.unwrap();

        let state = fake.state.lock();
        assert!(state.terminated.is_empty());
        assert!(state.cleared.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_pidfile() {
        let fake = Arc::new(FakeProcesses::default());
        fake.state.lock().stale.push(Role::Vlmcd);
        let supervisor = supervisor(&fake);
        let vlmcd = peer(Role::Vlmcd);

        assert_eq!(supervisor.status(&vlmcd), PeerStatus::Stale);
        assert!(matches!(
            supervisor.start_peer(&vlmcd).await,
            Err(PeerError::StaleState { role: Role::Vlmcd, .. })
        ));
        assert!(fake.state.lock().launched.is_empty());

        // Stop clears the stale state instead of failing
        supervisor.stop_peer(&vlmcd).await.unwrap();
        assert_eq!(fake.state.lock().cleared, vec![Role::Vlmcd]);
        assert_eq!(supervisor.status(&vlmcd), PeerStatus::Stopped);
    }
}
