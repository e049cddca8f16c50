//! Archipelago segment channel
//!
//! Every control operation talks to the peers through the shared segment.
//! This crate provides the pieces of that conversation:
//!
//! - [`ChannelHandle`]: a scoped handle onto the segment, closed on drop
//! - [`Request`]: one outstanding operation against a peer port, with the
//!   allocate → submit → wait → release lifecycle and release on drop
//! - [`Transport`] / [`Session`]: the seam to the segment engine itself
//! - [`SocketTransport`]: an engine that carries requests over Unix sockets
//!   living in the segment directory
//!
//! ```text
//! ChannelHandle::open(transport)
//!     └── handle.request(port, op)   allocated
//!             ├── submit()           submitted
//!             ├── wait()             completed(success | failure)
//!             └── drop / into_reply  released
//! ```

pub mod error;
pub mod handle;
pub mod request;
pub mod socket;
pub mod transport;

pub use error::{ChannelError, XsegError, XsegResult};
pub use handle::ChannelHandle;
pub use request::{
    FromReply, HashReply, InfoReply, Opcode, Reply, ReplyData, Request, RequestOp, RequestState,
};
pub use socket::SocketTransport;
pub use transport::{RequestTag, Session, Transport};
