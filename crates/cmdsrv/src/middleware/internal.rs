//! Handlers the router adds to every chain.

use async_trait::async_trait;

use crate::context::Context;
use crate::errors::Result;
use crate::handler::{Handler, HandlerResult, PushHandler};
use crate::types::{CODE_UNSUPPORTED, MSG_UNSUPPORTED};

/// Stands in for route handlers when no route matches the command.
pub struct RouteNotFound;

#[async_trait]
impl Handler for RouteNotFound {
    async fn call(&self, ctx: &mut Context) -> HandlerResult {
        ctx.resp(CODE_UNSUPPORTED, MSG_UNSUPPORTED, None);
        Ok(())
    }
}

/// Innermost handler of every chain; marks the chain complete.
///
/// `Exit` interrupts travel outward through the return values and are
/// absorbed by the chain runner, so nothing past this point can observe one.
pub(crate) struct ChainEnd;

#[async_trait]
impl Handler for ChainEnd {
    async fn call(&self, ctx: &mut Context) -> HandlerResult {
        ctx.abort();
        Ok(())
    }
}

/// First push middleware: fills unset code, msg and seqno.
pub(crate) struct FillPushResponse;

#[async_trait]
impl PushHandler for FillPushResponse {
    async fn handle(&self, ctx: &mut Context) -> Result<()> {
        ctx.response.fill();
        Ok(())
    }
}
