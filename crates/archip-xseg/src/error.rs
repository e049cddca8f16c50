//! Channel error types

use thiserror::Error;

/// Failures of the segment channel itself
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Segment missing (peers not started or segment destroyed)
    #[error("segment {segment} is not initialized")]
    NotInitialized { segment: String },

    /// Nothing listens on the target port
    #[error("no peer responding on port {port}")]
    NoPeer { port: u32 },

    /// The peer went away while a request was outstanding
    #[error("peer on port {port} went away")]
    PeerGone { port: u32 },

    /// No reply within the channel's request timeout
    #[error("request on port {port} timed out after {timeout_ms} ms")]
    Timeout { port: u32, timeout_ms: u64 },

    /// Segment I/O error
    #[error("segment I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the request protocol
#[derive(Debug, Error)]
pub enum XsegError {
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Malformed or unexpected reply, or a request used out of order
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl XsegError {
    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

impl From<std::io::Error> for XsegError {
    fn from(err: std::io::Error) -> Self {
        Self::Channel(ChannelError::Io(err))
    }
}

/// Result type for channel operations
pub type XsegResult<T> = Result<T, XsegError>;
