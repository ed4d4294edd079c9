//! Message envelopes and reserved commands.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::Result;
use crate::util::random_string;

// ── Reserved lifecycle commands ─────────────────────────────────────

/// Emitted by an adapter when a session connects.
pub const CMD_CONNECTED: &str = "__cmdsrv_connected__";
/// Emitted by an adapter when a session is gone.
pub const CMD_CLOSED: &str = "__cmdsrv_closed__";
/// Transport-level keepalive.
pub const CMD_HEARTBEAT: &str = "__cmdsrv_heartbeat__";

/// Whether `cmd` is one of the reserved lifecycle commands.
///
/// Lifecycle messages run through the middleware chain but never produce a
/// response frame.
pub fn is_lifecycle(cmd: &str) -> bool {
    cmd == CMD_CONNECTED || cmd == CMD_CLOSED || cmd == CMD_HEARTBEAT
}

// ── Response codes ──────────────────────────────────────────────────

/// Success.
pub const CODE_OK: i32 = 0;
/// No route matched the command.
pub const CODE_UNSUPPORTED: i32 = -1;
/// A handler failed or panicked.
pub const CODE_INTERNAL: i32 = -2;

/// Message paired with [`CODE_OK`].
pub const MSG_OK: &str = "ok";
/// Message paired with [`CODE_UNSUPPORTED`].
pub const MSG_UNSUPPORTED: &str = "unsupported command";

/// Length of generated push sequence numbers.
const SEQNO_LEN: usize = 12;

/// Inbound message, immutable once an adapter has built it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Request {
    /// Routing key.
    pub cmd: String,
    /// Caller-assigned correlation id.
    pub seqno: String,
    /// Undecoded payload.
    pub raw_data: Bytes,
}

/// Inbound wire envelope `{cmd, seqno, data}`.
#[derive(Deserialize)]
struct WireRequest {
    cmd: String,
    #[serde(default)]
    seqno: String,
    #[serde(default)]
    data: Option<Value>,
}

impl Request {
    /// Build a request from its parts.
    pub fn new(cmd: impl Into<String>, seqno: impl Into<String>, raw_data: impl Into<Bytes>) -> Self {
        Self {
            cmd: cmd.into(),
            seqno: seqno.into(),
            raw_data: raw_data.into(),
        }
    }

    /// Parse the JSON `{cmd, seqno, data}` envelope.
    ///
    /// `data` is kept as raw JSON bytes for lazy decoding; a missing `data`
    /// yields an empty payload.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let wire: WireRequest = serde_json::from_slice(bytes)?;
        let raw_data = match wire.data {
            Some(data) => Bytes::from(serde_json::to_vec(&data)?),
            None => Bytes::new(),
        };
        Ok(Self {
            cmd: wire.cmd,
            seqno: wire.seqno,
            raw_data,
        })
    }
}

/// Outbound message: a reply to a [`Request`] or a server push.
///
/// Serializes as the `{cmd, seqno, code, msg, data}` envelope.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Response {
    /// Originating request, if this answers one.
    #[serde(skip)]
    pub request: Option<Arc<Request>>,
    /// Routing key echoed to the client.
    pub cmd: String,
    /// Correlation id.
    pub seqno: String,
    /// Status code; `0` is success.
    pub code: i32,
    /// Human-readable status.
    pub msg: String,
    /// Arbitrary payload.
    pub data: Value,
}

impl Response {
    /// A push message for `cmd` with an empty object payload.
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            data: empty_object(),
            ..Self::default()
        }
    }

    /// The initial reply for `request`: unsupported until a handler answers.
    pub fn reply_to(request: Arc<Request>) -> Self {
        Self {
            cmd: request.cmd.clone(),
            seqno: request.seqno.clone(),
            code: CODE_UNSUPPORTED,
            msg: MSG_UNSUPPORTED.to_owned(),
            data: empty_object(),
            request: Some(request),
        }
    }

    /// Replace the payload.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = data.into();
        self
    }

    /// Replace code and message.
    #[must_use]
    pub fn with_status(mut self, code: i32, msg: impl Into<String>) -> Self {
        self.code = code;
        self.msg = msg.into();
        self
    }

    /// Set an explicit sequence number.
    #[must_use]
    pub fn with_seqno(mut self, seqno: impl Into<String>) -> Self {
        self.seqno = seqno.into();
        self
    }

    /// Fill unset fields with defaults.
    ///
    /// Cmd and seqno fall back to the originating request; a seqno that is
    /// still empty gets a random value. A zero code with no message reads
    /// as `"ok"`.
    pub fn fill(&mut self) {
        if let Some(req) = &self.request {
            if self.cmd.is_empty() {
                self.cmd.clone_from(&req.cmd);
            }
            if self.seqno.is_empty() {
                self.seqno.clone_from(&req.seqno);
            }
        }
        if self.seqno.is_empty() {
            self.seqno = random_string(SEQNO_LEN);
        }
        if self.code == CODE_OK && self.msg.is_empty() {
            self.msg = MSG_OK.to_owned();
        }
    }

    /// Whether this response reports success.
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

pub(crate) fn empty_object() -> Value {
    Value::Object(Map::new())
}
