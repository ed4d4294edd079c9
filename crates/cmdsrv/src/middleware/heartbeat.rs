//! Session liveness monitor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::counter;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::Context;
use crate::handler::{Handler, HandlerResult};
use crate::metrics::HEARTBEAT_CLOSED_TOTAL;
use crate::srv::WeakSrv;
use crate::types::CMD_CLOSED;

/// Closes sessions that stay silent for longer than the timeout.
///
/// Every message passing through records the session's last-seen time. A
/// background sweeper, started with the first message, wakes every
/// `timeout / 2` and closes idle sessions through the router.
///
/// Sessions are tracked per router, so one instance may be installed on
/// several routers; each gets its own sweeper.
pub struct Heartbeat {
    timeout: Duration,
    routers: Arc<DashMap<usize, LastSeen>>,
}

type LastSeen = Arc<DashMap<String, Instant>>;

impl Heartbeat {
    /// Monitor closing sessions idle for longer than `timeout`.
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            timeout,
            routers: Arc::new(DashMap::new()),
        })
    }

    /// Configured idle timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of sessions currently monitored across all routers.
    pub fn tracked(&self) -> usize {
        self.routers.iter().map(|r| r.value().len()).sum()
    }

    /// Session table of the router handling `ctx`, starting its sweeper on
    /// first use.
    fn last_seen(&self, ctx: &Context) -> LastSeen {
        let srv = ctx.srv();
        let id = srv.id();
        if let Some(existing) = self.routers.get(&id) {
            return Arc::clone(existing.value());
        }
        let entry = self.routers.entry(id).or_insert_with(|| {
            let last_seen = LastSeen::default();
            let _ = tokio::spawn(sweep(
                Arc::clone(&last_seen),
                Arc::clone(&self.routers),
                id,
                srv.downgrade(),
                srv.shutdown_token(),
                self.timeout,
            ));
            last_seen
        });
        Arc::clone(entry.value())
    }
}

#[async_trait]
impl Handler for Heartbeat {
    async fn call(&self, ctx: &mut Context) -> HandlerResult {
        let last_seen = self.last_seen(ctx);
        if ctx.cmd() == CMD_CLOSED {
            let _ = last_seen.remove(ctx.sid());
        } else {
            let _ = last_seen.insert(ctx.sid().to_owned(), Instant::now());
        }
        ctx.next().await
    }
}

async fn sweep(
    last_seen: LastSeen,
    routers: Arc<DashMap<usize, LastSeen>>,
    router_id: usize,
    srv: WeakSrv,
    cancel: CancellationToken,
    timeout: Duration,
) {
    let period = (timeout / 2).max(Duration::from_millis(1));
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(?timeout, "heartbeat sweeper started");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(srv) = srv.upgrade() else { break };

        let now = Instant::now();
        let idle: Vec<String> = last_seen
            .iter()
            .filter(|e| now.duration_since(*e.value()) > timeout)
            .map(|e| e.key().clone())
            .collect();

        for sid in idle {
            let _ = last_seen.remove(&sid);
            counter!(HEARTBEAT_CLOSED_TOTAL).increment(1);
            info!(%sid, "closing idle session");
            if let Err(err) = srv.close(&sid).await {
                debug!(%sid, error = %err, "idle session already gone");
            }
        }
    }
    let _ = routers.remove(&router_id);
    debug!("heartbeat sweeper stopped");
}
