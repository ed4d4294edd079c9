//! Per-message execution context.
//!
//! A `Context` owns the in-progress [`Response`], the session id, handles to
//! the router and to the adapter that delivered the message, and the cursor
//! over the handler chain built for this invocation.

use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use metrics::counter;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{error, warn};

use crate::adapter::ServerAdapter;
use crate::errors::Result;
use crate::handler::{Failure, HandlerFunc, HandlerResult, Interrupt};
use crate::metrics::FAILURES_TOTAL;
use crate::srv::Srv;
use crate::types::{CODE_INTERNAL, CODE_OK, MSG_OK, MSG_UNSUPPORTED, Request, Response, empty_object};
use crate::util::panic_message;

/// Execution cursor for one inbound message (or one outbound push).
pub struct Context {
    /// Response being built; written back when the chain finishes.
    pub response: Response,
    sid: String,
    srv: Srv,
    server: Arc<dyn ServerAdapter>,
    handlers: Vec<HandlerFunc>,
    cursor: usize,
    aborted: bool,
}

impl Context {
    pub(crate) fn new(
        srv: Srv,
        server: Arc<dyn ServerAdapter>,
        sid: String,
        request: Arc<Request>,
        handlers: Vec<HandlerFunc>,
    ) -> Self {
        Self {
            response: Response::reply_to(request),
            sid,
            srv,
            server,
            handlers,
            cursor: 0,
            aborted: false,
        }
    }

    /// Context for the push pipeline: same session, no handler chain.
    pub(crate) fn for_push(
        srv: Srv,
        server: Arc<dyn ServerAdapter>,
        sid: String,
        response: Response,
    ) -> Self {
        Self {
            response,
            sid,
            srv,
            server,
            handlers: Vec::new(),
            cursor: 0,
            aborted: true,
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// Session id the message belongs to.
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Command being handled.
    pub fn cmd(&self) -> &str {
        &self.response.cmd
    }

    /// Current sequence number.
    pub fn seqno(&self) -> &str {
        &self.response.seqno
    }

    /// Originating request, if any.
    pub fn request(&self) -> Option<&Request> {
        self.response.request.as_deref()
    }

    /// Undecoded request payload (empty for pushes).
    pub fn raw_data(&self) -> &[u8] {
        self.request().map_or(&[], |r| r.raw_data.as_ref())
    }

    /// The router.
    pub fn srv(&self) -> &Srv {
        &self.srv
    }

    /// The adapter that delivered the message.
    pub fn server(&self) -> &Arc<dyn ServerAdapter> {
        &self.server
    }

    // ── Chain control ───────────────────────────────────────────────

    /// Run the next handler in the chain.
    ///
    /// At the end of the chain this marks the context aborted instead. After
    /// [`abort`](Self::abort) it does nothing.
    pub async fn next(&mut self) -> HandlerResult {
        if self.aborted {
            return Ok(());
        }
        let Some(handler) = self.handlers.get(self.cursor).map(Arc::clone) else {
            self.abort();
            return Ok(());
        };
        self.cursor += 1;
        handler.call(self).await
    }

    /// Stop inner handlers from running. Outer handlers still finish.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    /// Whether the chain has been aborted or has run to its end.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Number of handlers started so far.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Drive the whole chain, absorbing interrupts and panics.
    ///
    /// Handlers that return without calling `next` are followed by their
    /// siblings until the chain aborts.
    pub(crate) async fn run(&mut self) {
        let outcome = AssertUnwindSafe(self.drive()).catch_unwind().await;
        match outcome {
            Ok(Ok(()) | Err(Interrupt::Exit)) => {}
            Ok(Err(Interrupt::Fail(failure))) => {
                warn!(sid = %self.sid, cmd = %self.response.cmd, %failure, "unrecovered handler failure");
                counter!(FAILURES_TOTAL, "kind" => "failure").increment(1);
                self.apply_failure(failure);
            }
            Err(panic) => {
                let failure = failure_from_panic(panic);
                error!(sid = %self.sid, cmd = %self.response.cmd, %failure, "handler panicked");
                counter!(FAILURES_TOTAL, "kind" => "panic").increment(1);
                self.apply_failure(failure);
            }
        }
    }

    async fn drive(&mut self) -> HandlerResult {
        while !self.aborted {
            self.next().await?;
        }
        Ok(())
    }

    pub(crate) fn apply_failure(&mut self, failure: Failure) {
        match failure {
            Failure::Message(msg) => {
                self.response.code = CODE_INTERNAL;
                self.response.msg = msg;
            }
            Failure::Response(resp) => {
                self.response.code = resp.code;
                self.response.msg = resp.msg;
                if !resp.data.is_null() {
                    self.response.data = resp.data;
                }
            }
        }
        self.abort();
    }

    // ── Response helpers ────────────────────────────────────────────

    /// Answer success with an empty object payload.
    pub fn ok(&mut self) {
        self.ok_with(empty_object());
    }

    /// Answer success with `data`.
    pub fn ok_with(&mut self, data: impl Into<Value>) {
        self.response.code = CODE_OK;
        self.response.msg = MSG_OK.to_owned();
        self.response.data = data.into();
    }

    /// Set code and message, and the payload when given.
    pub fn resp(&mut self, code: i32, msg: impl Into<String>, data: Option<Value>) {
        self.response.code = code;
        self.response.msg = msg.into();
        if let Some(data) = data {
            self.response.data = data;
        }
    }

    /// Report `err` with `code`. A `None` error is ignored.
    pub fn err<E: Display>(&mut self, err: Option<E>, code: i32) {
        if let Some(err) = err {
            self.response.code = code;
            self.response.msg = err.to_string();
        }
    }

    /// End the request early and successfully with `code`.
    ///
    /// Use as `return c.exit(0);` or `c.exit(code)?`. Nothing after the call
    /// runs in this call path; writes made before it are kept.
    ///
    /// A message set by a handler is kept. Otherwise the unsupported default
    /// becomes `"ok"` for code 0 and is cleared for any other code.
    pub fn exit(&mut self, code: i32) -> HandlerResult {
        self.response.code = code;
        if self.response.msg.is_empty() || self.response.msg == MSG_UNSUPPORTED {
            self.response.msg = if code == CODE_OK {
                MSG_OK.to_owned()
            } else {
                String::new()
            };
        }
        self.abort();
        Err(Interrupt::Exit)
    }

    /// Unwrap `result`, or exit with `code` and the error text.
    pub fn if_err_exit<T, E: Display>(
        &mut self,
        result: std::result::Result<T, E>,
        code: i32,
    ) -> std::result::Result<T, Interrupt> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                self.response.code = code;
                self.response.msg = err.to_string();
                self.abort();
                Err(Interrupt::Exit)
            }
        }
    }

    // ── Session state ───────────────────────────────────────────────

    /// Read a value from this session's state.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.srv.state().get(&self.sid, key)
    }

    /// Write a value to this session's state.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.srv.state().set(&self.sid, key, value.into());
    }

    /// Read another session's state.
    pub fn get_state(&self, sid: &str, key: &str) -> Option<Value> {
        self.srv.state().get(sid, key)
    }

    /// Write another session's state.
    pub fn set_state(&self, sid: &str, key: &str, value: impl Into<Value>) {
        self.srv.state().set(sid, key, value.into());
    }

    // ── Payload ─────────────────────────────────────────────────────

    /// Decode the request payload with the router's decoder.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self.srv.decoder().decode(self.raw_data())?;
        Ok(serde_json::from_value(value)?)
    }

    // ── Push / session control ──────────────────────────────────────

    /// Push a message to this session through the adapter that delivered
    /// the current message.
    pub async fn push(&self, resp: Response) -> Result<()> {
        self.srv.push_server(&self.server, &self.sid, resp).await
    }

    /// Push a message to any session.
    pub async fn push_sid(&self, sid: &str, resp: Response) -> Result<()> {
        self.srv.push(sid, resp).await
    }

    /// Push to every live session. Returns the number delivered.
    pub async fn broadcast(&self, resp: Response) -> usize {
        self.srv.broadcast(resp).await
    }

    /// Close this session.
    pub async fn close(&self) -> Result<()> {
        self.srv.close_by_server(&self.server, &self.sid).await
    }

    /// Every live session across all adapters.
    pub fn all_sids(&self) -> Vec<String> {
        self.srv.all_sids()
    }

    /// Live sessions of the adapter that delivered this message.
    pub fn server_all_sids(&self) -> Vec<String> {
        self.server.all_sids()
    }
}

/// Map a caught panic payload to a failure. A `Response` raised with
/// `std::panic::panic_any` keeps its status.
pub(crate) fn failure_from_panic(panic: Box<dyn std::any::Any + Send>) -> Failure {
    match panic.downcast::<Response>() {
        Ok(resp) => Failure::Response(*resp),
        Err(panic) => Failure::Message(panic_message(panic.as_ref())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockServerAdapter;
    use crate::handler::handler_fn;
    use crate::types::CODE_UNSUPPORTED;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use serde_json::json;

    fn make_context(handlers: Vec<HandlerFunc>) -> Context {
        let server: Arc<dyn ServerAdapter> = Arc::new(MockServerAdapter::new());
        let request = Arc::new(Request::new("cmd", "1", Bytes::from_static(b"{\"n\":3}")));
        Context::new(Srv::new(Vec::new()), server, "s1".into(), request, handlers)
    }

    fn marker(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> HandlerFunc {
        let log = Arc::clone(log);
        handler_fn(move |c| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().push(format!("{name}>"));
                let res = c.next().await;
                log.lock().push(format!("<{name}"));
                res
            })
        })
    }

    fn leaf(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> HandlerFunc {
        let log = Arc::clone(log);
        handler_fn(move |_c| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().push(name.to_owned());
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn onion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = make_context(vec![marker(&log, "a"), marker(&log, "b"), leaf(&log, "h")]);
        ctx.run().await;
        assert_eq!(*log.lock(), vec!["a>", "b>", "h", "<b", "<a"]);
        assert!(ctx.is_aborted());
    }

    #[tokio::test]
    async fn siblings_run_without_next() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = make_context(vec![leaf(&log, "h1"), leaf(&log, "h2")]);
        ctx.run().await;
        assert_eq!(*log.lock(), vec!["h1", "h2"]);
    }

    #[tokio::test]
    async fn abort_stops_inner_handlers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stopper = handler_fn(|c| {
            Box::pin(async move {
                c.abort();
                c.next().await
            })
        });
        let mut ctx = make_context(vec![marker(&log, "a"), stopper, leaf(&log, "h")]);
        ctx.run().await;
        assert_eq!(*log.lock(), vec!["a>", "<a"]);
        assert_eq!(ctx.position(), 2);
    }

    #[tokio::test]
    async fn next_at_end_aborts() {
        let mut ctx = make_context(Vec::new());
        assert!(!ctx.is_aborted());
        ctx.next().await.unwrap();
        assert!(ctx.is_aborted());
        assert_eq!(ctx.position(), 0);
    }

    #[tokio::test]
    async fn untouched_response_is_unsupported() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = make_context(vec![leaf(&log, "h")]);
        ctx.run().await;
        assert_eq!(ctx.response.code, CODE_UNSUPPORTED);
        assert_eq!(ctx.response.msg, MSG_UNSUPPORTED);
    }

    #[tokio::test]
    async fn ok_variants() {
        let mut ctx = make_context(Vec::new());
        ctx.ok();
        assert_eq!(ctx.response.code, 0);
        assert_eq!(ctx.response.msg, "ok");
        assert_eq!(ctx.response.data, json!({}));

        ctx.ok_with("str");
        assert_eq!(ctx.response.data, json!("str"));

        ctx.ok_with(Value::Null);
        assert!(ctx.response.data.is_null());
    }

    #[tokio::test]
    async fn resp_and_err() {
        let mut ctx = make_context(Vec::new());
        ctx.resp(12, "msg2", Some(json!("data2")));
        assert_eq!((ctx.response.code, ctx.response.msg.as_str()), (12, "msg2"));
        assert_eq!(ctx.response.data, json!("data2"));

        ctx.resp(13, "msg3", None);
        assert_eq!(ctx.response.data, json!("data2"));

        ctx.err(None::<&str>, 99);
        assert_eq!(ctx.response.code, 13);
        ctx.err(Some("err1"), 11);
        assert_eq!((ctx.response.code, ctx.response.msg.as_str()), (11, "err1"));
    }

    #[tokio::test]
    async fn exit_skips_rest_of_call_path() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        let exiting = handler_fn(move |c| {
            let log = Arc::clone(&log2);
            Box::pin(async move {
                log.lock().push("before".to_owned());
                c.exit(5)?;
                log.lock().push("after".to_owned());
                Ok(())
            })
        });
        let mut ctx = make_context(vec![exiting, leaf(&log, "sibling")]);
        ctx.run().await;
        assert_eq!(*log.lock(), vec!["before"]);
        assert_eq!(ctx.response.code, 5);
    }

    #[tokio::test]
    async fn exit_replaces_default_message() {
        let mut ctx = make_context(Vec::new());
        assert!(matches!(ctx.exit(0), Err(Interrupt::Exit)));
        assert_eq!((ctx.response.code, ctx.response.msg.as_str()), (0, "ok"));

        let mut ctx = make_context(Vec::new());
        let _ = ctx.exit(7);
        assert_eq!((ctx.response.code, ctx.response.msg.as_str()), (7, ""));

        let mut ctx = make_context(Vec::new());
        ctx.resp(1, "kept", None);
        let _ = ctx.exit(8);
        assert_eq!((ctx.response.code, ctx.response.msg.as_str()), (8, "kept"));
    }

    #[tokio::test]
    async fn if_err_exit_passes_ok_through() {
        let mut ctx = make_context(Vec::new());
        let value = ctx.if_err_exit(Ok::<_, std::io::Error>(3), 9).unwrap();
        assert_eq!(value, 3);
        assert!(!ctx.is_aborted());

        let res = ctx.if_err_exit(Err::<(), _>("bad input"), 9);
        assert!(matches!(res, Err(Interrupt::Exit)));
        assert_eq!((ctx.response.code, ctx.response.msg.as_str()), (9, "bad input"));
        assert!(ctx.is_aborted());
    }

    #[tokio::test]
    async fn unrecovered_failure_becomes_internal() {
        let failing = handler_fn(|_c| Box::pin(async move { Err::<(), _>(Interrupt::fail("broken")) }));
        let mut ctx = make_context(vec![failing]);
        ctx.run().await;
        assert_eq!(ctx.response.code, CODE_INTERNAL);
        assert_eq!(ctx.response.msg, "broken");
    }

    #[tokio::test]
    async fn unrecovered_panic_becomes_internal() {
        fn explode() -> HandlerResult {
            panic!("kaboom")
        }
        let panicking = handler_fn(|_c| Box::pin(async move { explode() }));
        let mut ctx = make_context(vec![panicking]);
        ctx.run().await;
        assert_eq!(ctx.response.code, CODE_INTERNAL);
        assert_eq!(ctx.response.msg, "kaboom");
    }

    #[tokio::test]
    async fn parse_payload() {
        #[derive(serde::Deserialize)]
        struct Body {
            n: u32,
        }
        let ctx = make_context(Vec::new());
        let body: Body = ctx.parse().unwrap();
        assert_eq!(body.n, 3);
        assert!(ctx.parse::<Vec<u32>>().is_err());
    }

    #[tokio::test]
    async fn state_roundtrip_through_context() {
        let ctx = make_context(Vec::new());
        assert!(ctx.get("uid").is_none());
        ctx.set("uid", 10);
        assert_eq!(ctx.get("uid"), Some(json!(10)));
        assert_eq!(ctx.get_state("s1", "uid"), Some(json!(10)));
        ctx.set_state("other", "uid", 11);
        assert_eq!(ctx.get_state("other", "uid"), Some(json!(11)));
        assert_eq!(ctx.get("uid"), Some(json!(10)));
    }
}
