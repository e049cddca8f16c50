//! Ordered start/stop of a peer set
//!
//! Peers start in roster order and stop in reverse: later peers depend on
//! earlier ones.

use crate::error::{PeerError, PeerResult};
use crate::peer::{Peer, PeerSet};
use crate::supervisor::{PeerStatus, Supervisor};
use archip_common::Role;
use tracing::{info, warn};

/// Drives a [`Supervisor`] over a whole [`PeerSet`]
#[derive(Clone)]
pub struct Orchestrator {
    supervisor: Supervisor,
}

impl Orchestrator {
    #[must_use]
    pub const fn new(supervisor: Supervisor) -> Self {
        Self { supervisor }
    }

    #[must_use]
    pub const fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Start every peer in order.
    ///
    /// The first failure aborts the remaining starts. Peers started so far,
    /// and the failing peer itself, are stopped again in reverse order and
    /// the original error returned.
    pub async fn start_all(&self, peers: &PeerSet) -> PeerResult<()> {
        let mut started: Vec<&Peer> = Vec::with_capacity(peers.len());

        for peer in peers {
            match self.supervisor.start_peer(peer).await {
                Ok(()) => started.push(peer),
                Err(err) => {
                    // A failed launch or a timeout may still leave a daemon
                    // behind; stopping a peer that never came up is a no-op
                    if !matches!(
                        err,
                        PeerError::AlreadyRunning { .. } | PeerError::StaleState { .. }
                    ) {
                        started.push(peer);
                    }
                    warn!("start of {} failed, rolling back: {err}", peer.role());
                    self.rollback(&started).await;
                    return Err(err);
                }
            }
        }

        info!("started {} peer(s)", started.len());
        Ok(())
    }

    async fn rollback(&self, started: &[&Peer]) {
        for peer in started.iter().rev() {
            if let Err(e) = self.supervisor.stop_peer(peer).await {
                warn!("rollback: {e}");
            }
        }
    }

    /// Stop every peer in reverse order.
    ///
    /// Every peer is attempted; failures are collected into
    /// [`PeerError::StopFailed`].
    pub async fn stop_all(&self, peers: &PeerSet) -> PeerResult<()> {
        let mut failures = Vec::new();

        for peer in peers.iter().rev() {
            if let Err(e) = self.supervisor.stop_peer(peer).await {
                warn!("{e}");
                failures.push(e);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PeerError::StopFailed(failures))
        }
    }

    /// Number of peers with a live process
    #[must_use]
    pub fn count_running(&self, peers: &PeerSet) -> usize {
        peers
            .iter()
            .filter(|peer| self.supervisor.status(peer).is_running())
            .count()
    }

    /// Status of every peer, in roster order
    #[must_use]
    pub fn statuses(&self, peers: &PeerSet) -> Vec<(Role, PeerStatus)> {
        peers
            .iter()
            .map(|peer| (peer.role(), self.supervisor.status(peer)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::tests::{Behavior, FakeProcesses, supervisor};
    use archip_common::Config;
    use std::sync::Arc;

    fn orchestrator(fake: &Arc<FakeProcesses>) -> Orchestrator {
        Orchestrator::new(supervisor(fake))
    }

    fn peers() -> PeerSet {
        PeerSet::from_config(&Config::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_all_in_order() {
        let fake = Arc::new(FakeProcesses::default());
        let orchestrator = orchestrator(&fake);
        let peers = peers();

        orchestrator.start_all(&peers).await.unwrap();
        assert_eq!(orchestrator.count_running(&peers), 4);
        assert_eq!(
            fake.state.lock().launched,
            vec![Role::Blockerb, Role::Blockerm, Role::Mapperd, Role::Vlmcd]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_all_rolls_back() {
        let fake = Arc::new(FakeProcesses::with_behavior(
            Role::Mapperd,
            Behavior::FailsLaunch,
        ));
        let orchestrator = orchestrator(&fake);
        let peers = peers();

        let err = orchestrator.start_all(&peers).await.unwrap_err();
        assert!(matches!(err, PeerError::Launch { role: Role::Mapperd, .. }));

        let state = fake.state.lock();
        // vlmcd is never attempted
        assert_eq!(
            state.launched,
            vec![Role::Blockerb, Role::Blockerm, Role::Mapperd]
        );
        // mapperd never wrote a pid, so stopping it terminates nothing
        assert_eq!(state.terminated, vec![Role::Blockerm, Role::Blockerb]);
        assert!(state.running.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_all_stops_peer_that_forked_before_failing() {
        let fake = Arc::new(FakeProcesses::with_behavior(
            Role::Mapperd,
            Behavior::LaunchFailsAfterFork,
        ));
        let orchestrator = orchestrator(&fake);
        let peers = peers();

        let err = orchestrator.start_all(&peers).await.unwrap_err();
        assert!(matches!(err, PeerError::Launch { role: Role::Mapperd, .. }));

        let state = fake.state.lock();
        assert_eq!(
            state.terminated,
            vec![Role::Mapperd, Role::Blockerm, Role::Blockerb]
        );
        assert!(state.running.is_empty());
        drop(state);
        assert_eq!(orchestrator.count_running(&peers), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_all_rolls_back_timed_out_peer() {
        let fake = Arc::new(FakeProcesses::with_behavior(
            Role::Blockerm,
            Behavior::NeverStarts,
        ));
        let orchestrator = orchestrator(&fake);

        let err = orchestrator.start_all(&peers()).await.unwrap_err();
        assert!(matches!(err, PeerError::StartTimeout { role: Role::Blockerm, .. }));
        // blockerm never came up, so only blockerb needs terminating
        assert_eq!(fake.state.lock().terminated, vec![Role::Blockerb]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_collects_failures() {
        let fake = Arc::new(FakeProcesses::with_behavior(
            Role::Mapperd,
            Behavior::NeverStops,
        ));
        let orchestrator = orchestrator(&fake);
        let peers = peers();
        orchestrator.start_all(&peers).await.unwrap();

        let err = orchestrator.stop_all(&peers).await.unwrap_err();
        let PeerError::StopFailed(failures) = err else {
            panic!("expected StopFailed, got {err}");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].role(), Some(Role::Mapperd));

        // Peers after the failing one are still stopped
        assert_eq!(
            fake.state.lock().terminated,
            vec![Role::Vlmcd, Role::Mapperd, Role::Blockerm, Role::Blockerb]
        );
        assert_eq!(orchestrator.count_running(&peers), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_running_does_not_mutate() {
        let fake = Arc::new(FakeProcesses::default());
        fake.state.lock().stale.push(Role::Vlmcd);
        let orchestrator = orchestrator(&fake);
        let peers = peers();

        assert_eq!(orchestrator.count_running(&peers), 0);
        let statuses = orchestrator.statuses(&peers);
        assert_eq!(statuses[3], (Role::Vlmcd, PeerStatus::Stale));
        assert!(fake.state.lock().cleared.is_empty());
    }
}
