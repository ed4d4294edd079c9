//! # cmdsrv
//!
//! Transport-agnostic command message router.
//!
//! Adapters (WebSocket, TCP, HTTP+SSE, in-process channels) deliver
//! `(sid, Request)` pairs; the router resolves the command name to a handler
//! chain, runs it onion-style inside a per-message task, and writes exactly
//! one [`Response`] back through the adapter that produced the message.
//! Handlers can push unsolicited messages to any live session.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `types` | `Request`/`Response` envelopes, reserved lifecycle commands |
//! | `handler` | `Handler`/`PushHandler` traits and the `Interrupt` control-flow type |
//! | `context` | Per-message execution cursor (`next`, `abort`, `ok`, `exit`, ...) |
//! | `srv` | Route table, dispatch loops, push/broadcast/close |
//! | `group` | Nested route groups composing middleware at registration time |
//! | `state` | Per-session key/value store over a pluggable expiring cache |
//! | `middleware` | `Recover`, `Heartbeat`, `AccessLog` and internal chain members |
//! | `adapter` | `ServerAdapter` contract and the in-process `ChannelAdapter` |
//! | `decode` | Pluggable payload decoder used by `Context::parse` |
//! | `config` | `SrvConfig` loaded from JSON + environment |

pub mod adapter;
pub mod config;
pub mod context;
pub mod decode;
pub mod errors;
pub mod group;
pub mod handler;
pub mod metrics;
pub mod middleware;
pub mod srv;
pub mod state;
pub mod types;

mod util;

pub use adapter::{ChannelAdapter, ChannelSession, ServerAdapter};
pub use config::SrvConfig;
pub use context::Context;
pub use decode::{Decoder, JsonDecoder};
pub use errors::{Result, SrvError};
pub use group::SrvGroup;
pub use handler::{
    Failure, Handler, HandlerFunc, HandlerResult, Interrupt, PushHandler, PushHandlerFunc,
    handler_fn, push_handler_fn,
};
pub use middleware::{AccessLog, AccessLogConfig, Heartbeat, Recover, RouteNotFound};
pub use srv::{Srv, WeakSrv};
pub use state::{MemoryCache, State, StateCache};
pub use types::{
    CMD_CLOSED, CMD_CONNECTED, CMD_HEARTBEAT, CODE_INTERNAL, CODE_OK, CODE_UNSUPPORTED, MSG_OK,
    MSG_UNSUPPORTED, Request, Response, is_lifecycle,
};
