//! Segment engine seam
//!
//! A [`Transport`] is bound to one segment configuration. Opening it yields
//! a [`Session`], the raw per-handle request slots that [`crate::Request`]
//! and [`crate::ChannelHandle`] wrap with scoped lifetimes.

use crate::error::XsegResult;
use crate::request::{Reply, RequestOp};
use archip_common::SegmentConfig;
use async_trait::async_trait;
use derive_more::Display;

/// Correlation handle of a request slot within a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("req#{_0}")]
pub struct RequestTag(pub u64);

/// Segment engine bound to one segment
#[async_trait]
pub trait Transport: Send + Sync {
    /// Segment this transport is bound to
    fn segment(&self) -> &SegmentConfig;

    /// Create the segment backing store (idempotent)
    fn create_segment(&self) -> XsegResult<()>;

    /// Destroy the segment backing store (idempotent)
    fn destroy_segment(&self) -> XsegResult<()>;

    /// Open a session onto the segment.
    ///
    /// Fails with [`crate::ChannelError::NotInitialized`] when the segment
    /// does not exist.
    async fn connect(&self) -> XsegResult<Box<dyn Session>>;
}

/// Request slots of one open handle
#[async_trait]
pub trait Session: Send {
    /// Reserve a request slot targeting `port`
    fn allocate(&mut self, port: u32, op: RequestOp) -> XsegResult<RequestTag>;

    /// Hand the request to the peer behind its port
    async fn submit(&mut self, tag: RequestTag) -> XsegResult<()>;

    /// Suspend until the request completes or the peer is gone
    async fn wait(&mut self, tag: RequestTag) -> XsegResult<Reply>;

    /// Return the slot to the segment
    fn release(&mut self, tag: RequestTag);

    /// Tear down the session; outstanding slots are released
    fn shutdown(&mut self);
}
