//! Scoped handle onto the segment

use crate::error::XsegResult;
use crate::request::{Request, RequestOp};
use crate::transport::{Session, Transport};
use tracing::debug;

/// Open handle onto one segment.
///
/// Holds no state beyond the session; the session is shut down when the
/// handle is closed or dropped, whichever comes first.
pub struct ChannelHandle {
    session: Box<dyn Session>,
    segment: String,
}

impl ChannelHandle {
    /// Open a handle onto the transport's segment
    pub async fn open(transport: &dyn Transport) -> XsegResult<Self> {
        let segment = transport.segment().name.clone();
        let session = transport.connect().await?;
        debug!("opened handle on segment {segment}");
        Ok(Self { session, segment })
    }

    /// Name of the segment this handle is bound to
    #[must_use]
    pub fn segment(&self) -> &str {
        &self.segment
    }

    /// Allocate a request targeting `port`
    pub fn request(&mut self, port: u32, op: RequestOp) -> XsegResult<Request<'_>> {
        Request::allocate(self.session.as_mut(), port, op)
    }

    /// Close the handle
    pub fn close(self) {}
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.session.shutdown();
        debug!("closed handle on segment {}", self.segment);
    }
}
