//! Request/response and push access logging.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::Context;
use crate::errors::Result;
use crate::handler::{Handler, HandlerResult, PushHandler};
use crate::types::is_lifecycle;

/// Longest payload excerpt written to the log.
const PREVIEW_LIMIT: usize = 256;

/// Access log settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessLogConfig {
    /// Service name attached to every event.
    pub name: String,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self { name: "SRV".into() }
    }
}

/// Logs every request and response under `cmdsrv::access` and every push
/// under `cmdsrv::push`. Lifecycle commands pass through silently.
pub struct AccessLog {
    name: String,
}

impl AccessLog {
    /// Logger usable as both request and push middleware.
    pub fn new(config: AccessLogConfig) -> Arc<Self> {
        Arc::new(Self { name: config.name })
    }
}

#[async_trait]
impl Handler for AccessLog {
    async fn call(&self, ctx: &mut Context) -> HandlerResult {
        if is_lifecycle(ctx.cmd()) {
            return ctx.next().await;
        }
        info!(
            target: "cmdsrv::access",
            service = %self.name,
            sid = ctx.sid(),
            cmd = ctx.cmd(),
            seqno = ctx.seqno(),
            data = %preview(ctx.raw_data()),
            "recv"
        );
        let started = Instant::now();
        let result = ctx.next().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            target: "cmdsrv::access",
            service = %self.name,
            sid = ctx.sid(),
            cmd = ctx.cmd(),
            seqno = ctx.seqno(),
            code = ctx.response.code,
            msg = %ctx.response.msg,
            data = %ctx.response.data,
            elapsed_ms,
            failed = result.is_err(),
            "resp"
        );
        result
    }
}

#[async_trait]
impl PushHandler for AccessLog {
    async fn handle(&self, ctx: &mut Context) -> Result<()> {
        info!(
            target: "cmdsrv::push",
            service = %self.name,
            sid = ctx.sid(),
            cmd = ctx.cmd(),
            seqno = ctx.seqno(),
            code = ctx.response.code,
            msg = %ctx.response.msg,
            data = %ctx.response.data,
            "push"
        );
        Ok(())
    }
}

fn preview(raw: &[u8]) -> Cow<'_, str> {
    let text = String::from_utf8_lossy(raw);
    if text.len() <= PREVIEW_LIMIT {
        return text;
    }
    let mut end = PREVIEW_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    Cow::Owned(format!("{}...", &text[..end]))
}
