use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use metrics::counter;
use tracing::{error, warn};

use crate::context::{Context, failure_from_panic};
use crate::handler::{Handler, HandlerFunc, HandlerResult, Interrupt};
use crate::metrics::FAILURES_TOTAL;

/// Converts failures of inner handlers into the response.
///
/// Catches both `Interrupt::Fail` results and panics. A message becomes
/// `code = -2`; a `Response` payload (returned via [`Interrupt::respond`] or
/// raised with `std::panic::panic_any`) supplies code, msg and non-null data.
/// The chain is aborted afterwards. `Exit` passes through untouched.
pub struct Recover;

impl Recover {
    /// Shared handler instance.
    pub fn handler() -> HandlerFunc {
        Arc::new(Self)
    }
}

#[async_trait]
impl Handler for Recover {
    async fn call(&self, ctx: &mut Context) -> HandlerResult {
        let outcome = AssertUnwindSafe(ctx.next()).catch_unwind().await;
        let failure = match outcome {
            Ok(Err(Interrupt::Fail(failure))) => {
                warn!(sid = ctx.sid(), cmd = ctx.cmd(), %failure, "recovered handler failure");
                counter!(FAILURES_TOTAL, "kind" => "failure").increment(1);
                failure
            }
            Ok(result) => return result,
            Err(panic) => {
                let failure = failure_from_panic(panic);
                error!(sid = ctx.sid(), cmd = ctx.cmd(), %failure, "recovered handler panic");
                counter!(FAILURES_TOTAL, "kind" => "panic").increment(1);
                failure
            }
        };
        ctx.apply_failure(failure);
        Ok(())
    }
}
