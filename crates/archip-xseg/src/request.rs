//! Request protocol
//!
//! A [`Request`] is one operation against one peer port. It is owned by the
//! caller that allocated it and moves through
//! `Allocated → Submitted → Completed`; its slot is released exactly once,
//! when the request is dropped or converted with [`Request::into_reply`].

use crate::error::{XsegError, XsegResult};
use crate::transport::{RequestTag, Session};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Logical operation codes understood by the peers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum Opcode {
    #[display("clone")]
    Clone,
    #[display("snapshot")]
    Snapshot,
    #[display("hash")]
    Hash,
    #[display("delete")]
    Delete,
    #[display("info")]
    Info,
    #[display("open")]
    Open,
    #[display("close")]
    Close,
    #[display("acquire")]
    Acquire,
    #[display("release")]
    Release,
}

/// Operation plus its opcode-specific payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RequestOp {
    /// Create `target`, optionally cloned from `source`; `size` in bytes
    Clone {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        size: u64,
        #[serde(default)]
        cont_addr: bool,
    },
    Snapshot {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<String>,
    },
    Hash {
        target: String,
    },
    Delete {
        target: String,
    },
    Info {
        target: String,
    },
    Open {
        target: String,
    },
    Close {
        target: String,
    },
    Acquire {
        target: String,
    },
    Release {
        target: String,
        #[serde(default)]
        force: bool,
    },
}

impl RequestOp {
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Clone { .. } => Opcode::Clone,
            Self::Snapshot { .. } => Opcode::Snapshot,
            Self::Hash { .. } => Opcode::Hash,
            Self::Delete { .. } => Opcode::Delete,
            Self::Info { .. } => Opcode::Info,
            Self::Open { .. } => Opcode::Open,
            Self::Close { .. } => Opcode::Close,
            Self::Acquire { .. } => Opcode::Acquire,
            Self::Release { .. } => Opcode::Release,
        }
    }

    /// Object the operation targets
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::Clone { target, .. }
            | Self::Snapshot { target, .. }
            | Self::Hash { target }
            | Self::Delete { target }
            | Self::Info { target }
            | Self::Open { target }
            | Self::Close { target }
            | Self::Acquire { target }
            | Self::Release { target, .. } => target,
        }
    }
}

/// Typed payload carried by a successful reply
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplyData {
    Info { size: u64 },
    Hash { target: String },
}

impl ReplyData {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Info { .. } => "info",
            Self::Hash { .. } => "hash",
        }
    }
}

/// Completion of a request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub success: bool,
    pub data: Option<ReplyData>,
}

impl Reply {
    #[must_use]
    pub const fn success() -> Self {
        Self {
            success: true,
            data: None,
        }
    }

    #[must_use]
    pub const fn failure() -> Self {
        Self {
            success: false,
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: ReplyData) -> Self {
        self.data = Some(data);
        self
    }

    /// Extract the typed payload of a successful reply
    pub fn payload<T: FromReply>(&self) -> XsegResult<T> {
        if !self.success {
            return Err(XsegError::protocol(format!(
                "failed request carries no {} payload",
                T::KIND
            )));
        }
        let data = self.data.as_ref().ok_or_else(|| {
            XsegError::protocol(format!("reply carries no {} payload", T::KIND))
        })?;
        T::from_reply(data).ok_or_else(|| {
            XsegError::protocol(format!(
                "expected {} reply, got {}",
                T::KIND,
                data.kind()
            ))
        })
    }
}

/// Typed view over [`ReplyData`]
pub trait FromReply: Sized {
    /// Payload kind, for error messages
    const KIND: &'static str;

    fn from_reply(data: &ReplyData) -> Option<Self>;
}

/// Reply to an info request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InfoReply {
    /// Volume size in bytes
    pub size: u64,
}

impl FromReply for InfoReply {
    const KIND: &'static str = "info";

    fn from_reply(data: &ReplyData) -> Option<Self> {
        match data {
            ReplyData::Info { size } => Some(Self { size: *size }),
            ReplyData::Hash { .. } => None,
        }
    }
}

/// Reply to a hash request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashReply {
    /// Name of the content-addressed map
    pub target: String,
}

impl FromReply for HashReply {
    const KIND: &'static str = "hash";

    fn from_reply(data: &ReplyData) -> Option<Self> {
        match data {
            ReplyData::Hash { target } => Some(Self {
                target: target.clone(),
            }),
            ReplyData::Info { .. } => None,
        }
    }
}

/// Lifecycle state of a request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    Allocated,
    Submitted,
    Completed,
}

/// One outstanding operation, released on drop
pub struct Request<'h> {
    session: &'h mut dyn Session,
    tag: RequestTag,
    port: u32,
    opcode: Opcode,
    state: RequestState,
    reply: Option<Reply>,
}

impl<'h> Request<'h> {
    pub(crate) fn allocate(
        session: &'h mut dyn Session,
        port: u32,
        op: RequestOp,
    ) -> XsegResult<Self> {
        let opcode = op.opcode();
        let tag = session.allocate(port, op)?;
        trace!("allocated {tag} ({opcode}) on port {port}");
        Ok(Self {
            session,
            tag,
            port,
            opcode,
            state: RequestState::Allocated,
            reply: None,
        })
    }

    #[must_use]
    pub const fn tag(&self) -> RequestTag {
        self.tag
    }

    #[must_use]
    pub const fn port(&self) -> u32 {
        self.port
    }

    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        self.opcode
    }

    #[must_use]
    pub const fn state(&self) -> RequestState {
        self.state
    }

    /// Hand the request to the target peer
    pub async fn submit(&mut self) -> XsegResult<()> {
        if self.state != RequestState::Allocated {
            return Err(XsegError::protocol(format!(
                "{} ({}) already submitted",
                self.tag, self.opcode
            )));
        }
        self.session.submit(self.tag).await?;
        self.state = RequestState::Submitted;
        debug!("submitted {} ({}) to port {}", self.tag, self.opcode, self.port);
        Ok(())
    }

    /// Suspend until the request has completed
    pub async fn wait(&mut self) -> XsegResult<()> {
        match self.state {
            RequestState::Allocated => Err(XsegError::protocol(format!(
                "{} ({}) waited on before submit",
                self.tag, self.opcode
            ))),
            RequestState::Completed => Ok(()),
            RequestState::Submitted => {
                let reply = self.session.wait(self.tag).await?;
                debug!(
                    "{} ({}) completed on port {}: success={}",
                    self.tag, self.opcode, self.port, reply.success
                );
                self.reply = Some(reply);
                self.state = RequestState::Completed;
                Ok(())
            }
        }
    }

    /// Whether the request completed successfully
    #[must_use]
    pub fn success(&self) -> bool {
        self.reply.as_ref().is_some_and(|reply| reply.success)
    }

    /// Completion of the request
    pub fn reply(&self) -> XsegResult<&Reply> {
        self.reply.as_ref().ok_or_else(|| {
            XsegError::protocol(format!("{} ({}) has not completed", self.tag, self.opcode))
        })
    }

    /// Typed payload of the reply
    pub fn payload<T: FromReply>(&self) -> XsegResult<T> {
        self.reply()?.payload()
    }

    /// Release the request and keep its completion
    pub fn into_reply(mut self) -> XsegResult<Reply> {
        self.reply.take().ok_or_else(|| {
            XsegError::protocol(format!("{} ({}) has not completed", self.tag, self.opcode))
        })
    }

    /// Release the request slot
    pub fn release(self) {}
}

impl Drop for Request<'_> {
    fn drop(&mut self) {
        self.session.release(self.tag);
        trace!("released {} ({})", self.tag, self.opcode);
    }
}
