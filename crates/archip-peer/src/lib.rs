//! Archipelago peer supervision
//!
//! Peers are the long-running storage daemons (blockers, mapper, volume
//! composer). This crate starts and stops them and observes whether they
//! are alive:
//!
//! - [`Peer`]: a roster entry resolved against the configuration
//! - [`ProcessManager`]: the seam to process management (spawn, signal,
//!   pidfile liveness), with [`PidfileProcessManager`] as the real one
//! - [`Supervisor`]: start/stop of one peer with bounded polling
//! - [`Orchestrator`]: ordered start/stop of the whole roster

pub mod error;
pub mod orchestrator;
pub mod peer;
pub mod poll;
pub mod process;
pub mod supervisor;

pub use error::{PeerError, PeerResult};
pub use orchestrator::Orchestrator;
pub use peer::{Peer, PeerSet};
pub use poll::{PollPolicy, poll_until};
pub use process::{PidfileProcessManager, ProcessManager};
pub use supervisor::{PeerStatus, Supervisor};
