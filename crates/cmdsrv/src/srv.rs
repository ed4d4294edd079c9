//! Command router.
//!
//! [`Srv`] owns the route table, the registered adapters, the session state
//! store and the dispatch loops. It is a cheap clonable handle; clones share
//! the same router.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::future::join_all;
use metrics::{counter, histogram};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapter::ServerAdapter;
use crate::config::SrvConfig;
use crate::context::Context;
use crate::decode::{Decoder, JsonDecoder};
use crate::errors::{Result, SrvError};
use crate::group::SrvGroup;
use crate::handler::{HandlerFunc, PushHandlerFunc};
use crate::metrics::{
    PUSH_REJECTED_TOTAL, PUSHES_TOTAL, REQUEST_DURATION_SECONDS, REQUESTS_TOTAL, UNSUPPORTED_TOTAL,
};
use crate::middleware::{AccessLog, AccessLogConfig, Heartbeat};
use crate::middleware::internal::{ChainEnd, FillPushResponse, RouteNotFound};
use crate::state::{State, StateCache};
use crate::types::{CMD_CLOSED, CODE_UNSUPPORTED, Request, Response, is_lifecycle};

/// Command router handle.
#[derive(Clone)]
pub struct Srv {
    inner: Arc<SrvInner>,
}

/// Non-owning router handle for background tasks.
#[derive(Clone)]
pub struct WeakSrv {
    inner: Weak<SrvInner>,
}

impl WeakSrv {
    /// The router, if it is still alive.
    pub fn upgrade(&self) -> Option<Srv> {
        self.inner.upgrade().map(|inner| Srv { inner })
    }
}

struct SrvInner {
    servers: RwLock<Vec<Arc<dyn ServerAdapter>>>,
    middleware: RwLock<Vec<HandlerFunc>>,
    push_middleware: RwLock<Vec<PushHandlerFunc>>,
    routes: RwLock<HashMap<String, Vec<HandlerFunc>>>,
    decoder: RwLock<Arc<dyn Decoder>>,
    state: State,
    /// Fatal-error channel of the running dispatch loops. Lock order:
    /// `running` before `servers`.
    running: Mutex<Option<mpsc::UnboundedSender<SrvError>>>,
    shutdown: CancellationToken,
    route_not_found: HandlerFunc,
    chain_end: HandlerFunc,
    fill_push: PushHandlerFunc,
}

impl Srv {
    /// Router over `servers` with no routes or middleware.
    pub fn new(servers: Vec<Arc<dyn ServerAdapter>>) -> Self {
        Self {
            inner: Arc::new(SrvInner {
                servers: RwLock::new(servers),
                middleware: RwLock::new(Vec::new()),
                push_middleware: RwLock::new(Vec::new()),
                routes: RwLock::new(HashMap::new()),
                decoder: RwLock::new(Arc::new(JsonDecoder)),
                state: State::default(),
                running: Mutex::new(None),
                shutdown: CancellationToken::new(),
                route_not_found: Arc::new(RouteNotFound),
                chain_end: Arc::new(ChainEnd),
                fill_push: Arc::new(FillPushResponse),
            }),
        }
    }

    /// Router configured from `config`.
    ///
    /// Installs the access log (request and push side) and the heartbeat
    /// monitor when configured, in that order.
    pub fn with_config(config: &SrvConfig, servers: Vec<Arc<dyn ServerAdapter>>) -> Self {
        let srv = Self::new(servers);
        srv.set_state_expire(config.state_expire());
        if let Some(name) = &config.access_log {
            let log = AccessLog::new(AccessLogConfig { name: name.clone() });
            let _ = srv
                .use_middleware([Arc::clone(&log) as HandlerFunc])
                .use_push([log as PushHandlerFunc]);
        }
        if let Some(timeout) = config.heartbeat_timeout() {
            let _ = srv.use_middleware([Heartbeat::new(timeout) as HandlerFunc]);
        }
        srv
    }

    /// Weak handle that does not keep the router alive.
    pub fn downgrade(&self) -> WeakSrv {
        WeakSrv {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Identity shared by all clones of this router.
    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    // ── Registration ────────────────────────────────────────────────

    /// Append global middleware.
    ///
    /// Global middleware is read at dispatch time, so it applies to routes
    /// registered before and after this call.
    pub fn use_middleware(&self, handlers: impl IntoIterator<Item = HandlerFunc>) -> &Self {
        self.inner.middleware.write().extend(handlers);
        self
    }

    /// Append push middleware.
    pub fn use_push(&self, handlers: impl IntoIterator<Item = PushHandlerFunc>) -> &Self {
        self.inner.push_middleware.write().extend(handlers);
        self
    }

    /// Append `handlers` to the route for `cmd`.
    pub fn handle(&self, cmd: &str, handlers: impl IntoIterator<Item = HandlerFunc>) -> &Self {
        let handlers: Vec<HandlerFunc> = handlers.into_iter().collect();
        if handlers.is_empty() {
            return self;
        }
        self.inner
            .routes
            .write()
            .entry(cmd.to_owned())
            .or_default()
            .extend(handlers);
        self
    }

    /// New top-level group with `handlers` as its middleware.
    pub fn group(&self, handlers: impl IntoIterator<Item = HandlerFunc>) -> SrvGroup {
        SrvGroup::new(self.clone(), handlers.into_iter().collect())
    }

    /// Register more adapters. Starts their dispatch loops right away when
    /// the router is running.
    pub fn add_server(&self, servers: impl IntoIterator<Item = Arc<dyn ServerAdapter>>) {
        let running = self.inner.running.lock();
        let mut list = self.inner.servers.write();
        for server in servers {
            if let Some(errors) = running.as_ref() {
                self.spawn_loop(Arc::clone(&server), errors.clone());
            }
            list.push(server);
        }
    }

    /// Replace the payload decoder used by [`Context::parse`].
    pub fn set_decoder(&self, decoder: Arc<dyn Decoder>) {
        *self.inner.decoder.write() = decoder;
    }

    pub(crate) fn decoder(&self) -> Arc<dyn Decoder> {
        Arc::clone(&self.inner.decoder.read())
    }

    /// Effective handler list dispatch builds for `cmd`: global middleware,
    /// then the route's handlers (or the not-found handler), then the
    /// internal chain end.
    pub fn chain_for(&self, cmd: &str) -> Vec<HandlerFunc> {
        let mut chain = self.inner.middleware.read().clone();
        match self.inner.routes.read().get(cmd) {
            Some(handlers) => chain.extend(handlers.iter().cloned()),
            None => chain.push(Arc::clone(&self.inner.route_not_found)),
        }
        chain.push(Arc::clone(&self.inner.chain_end));
        chain
    }

    // ── State ───────────────────────────────────────────────────────

    /// Session state store.
    pub fn state(&self) -> &State {
        &self.inner.state
    }

    /// Read `key` of session `sid`.
    pub fn get_state(&self, sid: &str, key: &str) -> Option<serde_json::Value> {
        self.inner.state.get(sid, key)
    }

    /// Write `key` of session `sid`.
    pub fn set_state(&self, sid: &str, key: &str, value: impl Into<serde_json::Value>) {
        self.inner.state.set(sid, key, value.into());
    }

    /// TTL for subsequent state writes.
    pub fn set_state_expire(&self, expire: Duration) {
        self.inner.state.set_expire(expire);
    }

    /// Swap the state cache backend.
    pub fn set_state_adapter(&self, cache: Arc<dyn StateCache>) {
        self.inner.state.set_cache(cache);
    }

    // ── Sessions ────────────────────────────────────────────────────

    /// Every live session across all adapters.
    pub fn all_sids(&self) -> Vec<String> {
        self.servers().iter().flat_map(|s| s.all_sids()).collect()
    }

    fn servers(&self) -> Vec<Arc<dyn ServerAdapter>> {
        self.inner.servers.read().clone()
    }

    /// Adapter currently listing `sid`.
    fn sid_server(&self, sid: &str) -> Result<Arc<dyn ServerAdapter>> {
        self.servers()
            .into_iter()
            .find(|s| s.all_sids().iter().any(|known| known == sid))
            .ok_or_else(|| SrvError::session_not_found(sid))
    }

    /// Push `resp` to `sid` on whichever adapter owns it.
    pub async fn push(&self, sid: &str, resp: Response) -> Result<()> {
        let server = self.sid_server(sid)?;
        self.push_server(&server, sid, resp).await
    }

    /// Push `resp` to `sid` through `server`.
    ///
    /// The message runs through the push pipeline first: the built-in
    /// defaults filler, then the registered push middleware in order. Any
    /// middleware error rejects the push.
    pub async fn push_server(
        &self,
        server: &Arc<dyn ServerAdapter>,
        sid: &str,
        resp: Response,
    ) -> Result<()> {
        let outbound = Response {
            request: None,
            cmd: resp.cmd,
            seqno: resp.seqno,
            code: resp.code,
            msg: resp.msg,
            data: resp.data,
        };
        let mut ctx = Context::for_push(self.clone(), Arc::clone(server), sid.to_owned(), outbound);
        for handler in self.push_chain() {
            if let Err(err) = handler.handle(&mut ctx).await {
                counter!(PUSH_REJECTED_TOTAL).increment(1);
                debug!(sid, cmd = ctx.cmd(), error = %err, "push rejected");
                return Err(err);
            }
        }
        server.write(sid, &ctx.response).await?;
        counter!(PUSHES_TOTAL).increment(1);
        Ok(())
    }

    fn push_chain(&self) -> Vec<PushHandlerFunc> {
        let user = self.inner.push_middleware.read();
        let mut chain = Vec::with_capacity(user.len() + 1);
        chain.push(Arc::clone(&self.inner.fill_push));
        chain.extend(user.iter().cloned());
        chain
    }

    /// Push `resp` to every live session. Failures are logged and skipped;
    /// returns how many deliveries succeeded.
    pub async fn broadcast(&self, resp: Response) -> usize {
        let targets: Vec<(Arc<dyn ServerAdapter>, String)> = self
            .servers()
            .into_iter()
            .flat_map(|server| {
                server
                    .all_sids()
                    .into_iter()
                    .map(move |sid| (Arc::clone(&server), sid))
                    .collect::<Vec<_>>()
            })
            .collect();
        let deliveries = targets.iter().map(|(server, sid)| {
            let resp = resp.clone();
            async move {
                let result = self.push_server(server, sid, resp).await;
                if let Err(err) = &result {
                    debug!(%sid, error = %err, "broadcast delivery failed");
                }
                result.is_ok()
            }
        });
        join_all(deliveries).await.into_iter().filter(|ok| *ok).count()
    }

    /// Close `sid` on whichever adapter owns it.
    pub async fn close(&self, sid: &str) -> Result<()> {
        let server = self.sid_server(sid)?;
        self.close_by_server(&server, sid).await
    }

    /// Close `sid` through `server`.
    pub async fn close_by_server(&self, server: &Arc<dyn ServerAdapter>, sid: &str) -> Result<()> {
        debug!(sid, "closing session");
        server.close(sid).await
    }

    // ── Running ─────────────────────────────────────────────────────

    /// Start one dispatch loop per adapter and wait.
    ///
    /// Returns the first fatal adapter error; the other adapters keep
    /// serving. Returns `Ok(())` after [`shutdown`](Self::shutdown). A router
    /// runs at most once.
    pub async fn run(&self) -> Result<()> {
        let mut errors = {
            let mut running = self.inner.running.lock();
            if running.is_some() {
                return Err(SrvError::AlreadyRunning);
            }
            let (tx, rx) = mpsc::unbounded_channel();
            let servers = self.inner.servers.read();
            for server in servers.iter() {
                self.spawn_loop(Arc::clone(server), tx.clone());
            }
            info!(adapters = servers.len(), "router running");
            *running = Some(tx);
            rx
        };

        tokio::select! {
            () = self.inner.shutdown.cancelled() => {
                info!("router shut down");
                Ok(())
            }
            err = errors.recv() => match err {
                Some(err) => Err(err),
                None => Ok(()),
            },
        }
    }

    /// Stop the dispatch loops and background tasks. In-flight handler
    /// chains finish normally.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    fn spawn_loop(&self, server: Arc<dyn ServerAdapter>, errors: mpsc::UnboundedSender<SrvError>) {
        let srv = self.clone();
        let token = self.inner.shutdown.clone();
        let _ = tokio::spawn(async move {
            debug!("dispatch loop started");
            loop {
                let next = tokio::select! {
                    () = token.cancelled() => break,
                    next = server.read() => next,
                };
                match next {
                    Ok((sid, req)) => {
                        let srv = srv.clone();
                        let server = Arc::clone(&server);
                        let _ = tokio::spawn(async move {
                            srv.dispatch(server, sid, req).await;
                        });
                    }
                    Err(err) => {
                        if !token.is_cancelled() {
                            error!(error = %err, code = err.code(), "adapter read failed");
                            let _ = errors.send(err);
                        }
                        break;
                    }
                }
            }
            debug!("dispatch loop stopped");
        });
    }

    /// Run the chain for one inbound message and write the response.
    pub(crate) async fn dispatch(&self, server: Arc<dyn ServerAdapter>, sid: String, req: Request) {
        let cmd = req.cmd.clone();
        let lifecycle = is_lifecycle(&cmd);
        let handlers = self.chain_for(&cmd);
        let mut ctx = Context::new(self.clone(), Arc::clone(&server), sid.clone(), Arc::new(req), handlers);
        debug!(%sid, %cmd, seqno = ctx.seqno(), "dispatching");

        let started = Instant::now();
        ctx.run().await;

        if cmd == CMD_CLOSED {
            self.inner.state.destroy_sid(&sid);
        }
        if lifecycle {
            return;
        }

        counter!(REQUESTS_TOTAL, "cmd" => cmd.clone()).increment(1);
        histogram!(REQUEST_DURATION_SECONDS, "cmd" => cmd.clone())
            .record(started.elapsed().as_secs_f64());
        if ctx.response.code == CODE_UNSUPPORTED {
            counter!(UNSUPPORTED_TOTAL).increment(1);
        }

        if let Err(err) = server.write(&sid, &ctx.response).await {
            warn!(%sid, %cmd, error = %err, "response write failed");
        }
    }
}
