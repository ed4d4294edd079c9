//! In-process adapter over tokio channels.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ServerAdapter;
use crate::errors::{Result, SrvError};
use crate::types::{CMD_CLOSED, CMD_CONNECTED, CMD_HEARTBEAT, Request, Response};

type Inbound = (String, Request);

/// Adapter whose clients live in the same process.
///
/// Each [`connect`](Self::connect) registers a session `chan.N` and returns
/// the client end. Lifecycle messages are emitted on connect and close.
pub struct ChannelAdapter {
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    sessions: DashMap<String, mpsc::UnboundedSender<Response>>,
    next_id: AtomicU64,
    cancel: CancellationToken,
}

impl ChannelAdapter {
    /// New adapter with no sessions.
    pub fn new() -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            cancel: CancellationToken::new(),
        })
    }

    /// Open a client session.
    pub fn connect(self: &Arc<Self>) -> ChannelSession {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sid = format!("chan.{id}");
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.sessions.insert(sid.clone(), tx);
        self.emit(&sid, Request::new(CMD_CONNECTED, "", Bytes::new()));
        debug!(%sid, "channel session connected");
        ChannelSession {
            sid,
            adapter: Arc::clone(self),
            rx,
        }
    }

    /// Stop delivering messages. Pending and future `read` calls fail.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn emit(&self, sid: &str, req: Request) {
        let _ = self.inbound_tx.send((sid.to_owned(), req));
    }

    fn drop_session(&self, sid: &str) -> bool {
        if self.sessions.remove(sid).is_some() {
            self.emit(sid, Request::new(CMD_CLOSED, "", Bytes::new()));
            debug!(sid, "channel session closed");
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl ServerAdapter for ChannelAdapter {
    async fn read(&self) -> Result<(String, Request)> {
        if self.cancel.is_cancelled() {
            return Err(SrvError::AdapterClosed);
        }
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            () = self.cancel.cancelled() => Err(SrvError::AdapterClosed),
            msg = rx.recv() => msg.ok_or(SrvError::AdapterClosed),
        }
    }

    async fn write(&self, sid: &str, resp: &Response) -> Result<()> {
        let tx = self
            .sessions
            .get(sid)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SrvError::session_closed(sid))?;
        tx.send(resp.clone())
            .map_err(|_| SrvError::session_closed(sid))
    }

    async fn close(&self, sid: &str) -> Result<()> {
        if self.drop_session(sid) {
            Ok(())
        } else {
            Err(SrvError::session_closed(sid))
        }
    }

    fn all_sids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }
}

/// Client end of a [`ChannelAdapter`] session.
pub struct ChannelSession {
    sid: String,
    adapter: Arc<ChannelAdapter>,
    rx: mpsc::UnboundedReceiver<Response>,
}

impl ChannelSession {
    /// Session id assigned by the adapter.
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Send a command with a JSON payload.
    pub fn send(&self, cmd: &str, seqno: &str, data: &Value) -> Result<()> {
        let raw = serde_json::to_vec(data)?;
        self.send_request(Request::new(cmd, seqno, raw))
    }

    /// Send a prebuilt request.
    pub fn send_request(&self, req: Request) -> Result<()> {
        if !self.adapter.sessions.contains_key(&self.sid) {
            return Err(SrvError::session_closed(&self.sid));
        }
        self.adapter.emit(&self.sid, req);
        Ok(())
    }

    /// Send a transport keepalive.
    pub fn heartbeat(&self) -> Result<()> {
        self.send_request(Request::new(CMD_HEARTBEAT, "", Bytes::new()))
    }

    /// Next response or push. `None` once the server closed the session.
    pub async fn recv(&mut self) -> Option<Response> {
        self.rx.recv().await
    }

    /// Leave the session.
    pub fn disconnect(self) {
        let _ = self.adapter.drop_session(&self.sid);
    }
}
