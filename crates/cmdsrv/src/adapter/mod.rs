//! Transport adapter contract.
//!
//! An adapter turns a transport (websocket, tcp, in-process channels) into a
//! stream of `(sid, Request)` pairs and accepts responses addressed by sid.

mod channel;

pub use channel::{ChannelAdapter, ChannelSession};

use async_trait::async_trait;

use crate::errors::Result;
use crate::types::{Request, Response};

/// Transport consumed by [`Srv`](crate::Srv).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServerAdapter: Send + Sync {
    /// Wait for the next inbound message.
    ///
    /// An error is fatal for this adapter's dispatch loop and is surfaced by
    /// [`Srv::run`](crate::Srv::run).
    async fn read(&self) -> Result<(String, Request)>;

    /// Deliver a response or push to `sid`. Fails if the session is gone.
    async fn write(&self, sid: &str, resp: &Response) -> Result<()>;

    /// Terminate the session's connection.
    async fn close(&self, sid: &str) -> Result<()>;

    /// Currently live session ids.
    fn all_sids(&self) -> Vec<String>;
}
