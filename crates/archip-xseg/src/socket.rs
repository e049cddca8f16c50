//! Unix-socket segment engine
//!
//! The segment is a directory (`<dir>/<name>`); a peer serving port `p`
//! listens on `port-<p>.sock` inside it. Each request uses its own
//! connection and is framed as one JSON object per line in each direction:
//!
//! ```text
//! → {"id":7,"op":"info","target":"volumeabc"}
//! ← {"id":7,"state":"success","data":{"kind":"info","size":10485760}}
//! ```

use crate::error::{ChannelError, XsegError, XsegResult};
use crate::request::{Reply, ReplyData, RequestOp};
use crate::transport::{RequestTag, Session, Transport};
use archip_common::{ChannelConfig, SegmentConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, info};

/// Request frame
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRequest {
    pub id: u64,
    #[serde(flatten)]
    pub op: RequestOp,
}

/// Reply frame
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireReply {
    pub id: u64,
    pub state: WireState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ReplyData>,
}

/// Completion state on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireState {
    Success,
    Failed,
}

/// Socket path of `port` inside a segment directory
#[must_use]
pub fn port_path(segment_dir: &Path, port: u32) -> PathBuf {
    segment_dir.join(format!("port-{port}.sock"))
}

/// Segment engine carrying requests over Unix sockets
pub struct SocketTransport {
    segment: SegmentConfig,
    request_timeout: Duration,
}

impl SocketTransport {
    #[must_use]
    pub fn new(segment: SegmentConfig, channel: &ChannelConfig) -> Self {
        Self {
            segment,
            request_timeout: channel.request_timeout(),
        }
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn segment(&self) -> &SegmentConfig {
        &self.segment
    }

    fn create_segment(&self) -> XsegResult<()> {
        let path = self.segment.path();
        std::fs::create_dir_all(&path)?;
        info!("created segment {} at {}", self.segment.name, path.display());
        Ok(())
    }

    fn destroy_segment(&self) -> XsegResult<()> {
        let path = self.segment.path();
        match std::fs::remove_dir_all(&path) {
            Ok(()) => {
                info!("destroyed segment {}", self.segment.name);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("segment {} already destroyed", self.segment.name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn connect(&self) -> XsegResult<Box<dyn Session>> {
        let root = self.segment.path();
        if !tokio::fs::try_exists(&root).await? {
            return Err(ChannelError::NotInitialized {
                segment: self.segment.name.clone(),
            }
            .into());
        }
        Ok(Box::new(SocketSession {
            root,
            timeout: self.request_timeout,
            next_tag: 0,
            slots: HashMap::new(),
        }))
    }
}

struct Slot {
    port: u32,
    op: RequestOp,
    stream: Option<BufReader<UnixStream>>,
}

struct SocketSession {
    root: PathBuf,
    timeout: Duration,
    next_tag: u64,
    slots: HashMap<RequestTag, Slot>,
}

impl SocketSession {
    fn slot(&mut self, tag: RequestTag) -> XsegResult<&mut Slot> {
        self.slots
            .get_mut(&tag)
            .ok_or_else(|| XsegError::protocol(format!("unknown request {tag}")))
    }
}

fn peer_io_error(port: u32, err: std::io::Error) -> ChannelError {
    match err.kind() {
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof => {
            ChannelError::PeerGone { port }
        }
        _ => ChannelError::Io(err),
    }
}

#[async_trait]
impl Session for SocketSession {
    fn allocate(&mut self, port: u32, op: RequestOp) -> XsegResult<RequestTag> {
        self.next_tag += 1;
        let tag = RequestTag(self.next_tag);
        self.slots.insert(
            tag,
            Slot {
                port,
                op,
                stream: None,
            },
        );
        Ok(tag)
    }

    async fn submit(&mut self, tag: RequestTag) -> XsegResult<()> {
        let root = self.root.clone();
        let slot = self.slot(tag)?;
        let port = slot.port;

        let stream = UnixStream::connect(port_path(&root, port))
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::ConnectionRefused => {
                    ChannelError::NoPeer { port }
                }
                _ => ChannelError::Io(e),
            })?;
        let mut stream = BufReader::new(stream);

        let frame = WireRequest {
            id: tag.0,
            op: slot.op.clone(),
        };
        let mut line = serde_json::to_vec(&frame)
            .map_err(|e| XsegError::protocol(format!("cannot encode {tag}: {e}")))?;
        line.push(b'\n');
        stream
            .get_mut()
            .write_all(&line)
            .await
            .map_err(|e| peer_io_error(port, e))?;

        slot.stream = Some(stream);
        Ok(())
    }

    async fn wait(&mut self, tag: RequestTag) -> XsegResult<Reply> {
        let timeout = self.timeout;
        let slot = self.slot(tag)?;
        let port = slot.port;
        let stream = slot
            .stream
            .as_mut()
            .ok_or_else(|| XsegError::protocol(format!("{tag} was not submitted")))?;

        let mut line = String::new();
        let read = tokio::time::timeout(timeout, stream.read_line(&mut line))
            .await
            .map_err(|_| ChannelError::Timeout {
                port,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })?
            .map_err(|e| peer_io_error(port, e))?;
        if read == 0 {
            return Err(ChannelError::PeerGone { port }.into());
        }

        let reply: WireReply = serde_json::from_str(line.trim_end()).map_err(|e| {
            XsegError::protocol(format!("malformed reply from port {port}: {e}"))
        })?;
        if reply.id != tag.0 {
            return Err(XsegError::protocol(format!(
                "reply for req#{} received while waiting on {tag}",
                reply.id
            )));
        }

        Ok(Reply {
            success: reply.state == WireState::Success,
            data: reply.data,
        })
    }

    fn release(&mut self, tag: RequestTag) {
        self.slots.remove(&tag);
    }

    fn shutdown(&mut self) {
        self.slots.clear();
    }
}
