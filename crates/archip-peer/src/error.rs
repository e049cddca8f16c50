//! Peer supervision error types

use archip_common::Role;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Peer supervision error
#[derive(Debug, Error)]
pub enum PeerError {
    /// Start requested for a peer that is already running
    #[error("cannot start peer {role}: peer already running")]
    AlreadyRunning { role: Role },

    /// Peer never reported running within the start budget
    #[error("couldn't start {role}: not running after {waited_ms} ms")]
    StartTimeout { role: Role, waited_ms: u64 },

    /// Peer still had a live process after the stop budget
    #[error("failed to stop peer {role}: still running after {waited_ms} ms")]
    StopTimeout { role: Role, waited_ms: u64 },

    /// Pidfile present but the process cannot be confirmed active
    #[error("{role} has a pidfile ({}) but does not seem to be active", .pidfile.display())]
    StaleState { role: Role, pidfile: PathBuf },

    /// The start side effect itself failed
    #[error("cannot start {role}: {reason}")]
    Launch { role: Role, reason: String },

    /// The stop side effect itself failed
    #[error("cannot stop {role}: {reason}")]
    Terminate { role: Role, reason: String },

    /// One or more peers of a set failed to stop
    #[error("failed to stop {}", StopFailures(.0))]
    StopFailed(Vec<PeerError>),
}

impl PeerError {
    /// Role the error is about, `None` for aggregated stop failures
    #[must_use]
    pub const fn role(&self) -> Option<Role> {
        match self {
            Self::AlreadyRunning { role }
            | Self::StartTimeout { role, .. }
            | Self::StopTimeout { role, .. }
            | Self::StaleState { role, .. }
            | Self::Launch { role, .. }
            | Self::Terminate { role, .. } => Some(*role),
            Self::StopFailed(_) => None,
        }
    }
}

struct StopFailures<'a>(&'a [PeerError]);

impl fmt::Display for StopFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} peer(s)", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            f.write_str(if i == 0 { ": " } else { "; " })?;
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

/// Result type for peer supervision
pub type PeerResult<T> = Result<T, PeerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_failed_message() {
        let err = PeerError::StopFailed(vec![
            PeerError::StopTimeout {
                role: Role::Vlmcd,
                waited_ms: 15_000,
            },
            PeerError::Terminate {
                role: Role::Blockerb,
                reason: "EPERM".to_string(),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("failed to stop 2 peer(s): "));
        assert!(msg.contains("vlmcd"));
        assert!(msg.contains("blockerb"));
        assert_eq!(err.role(), None);
    }

    #[test]
    fn test_error_names_role() {
        let err = PeerError::AlreadyRunning {
            role: Role::Mapperd,
        };
        assert_eq!(err.role(), Some(Role::Mapperd));
        assert_eq!(err.to_string(), "cannot start peer mapperd: peer already running");
    }
}
