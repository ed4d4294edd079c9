//! Handler traits and chain control flow.
//!
//! A handler returns [`HandlerResult`]: `Ok(())` to continue, or an
//! [`Interrupt`] that unwinds the onion. `Interrupt::Exit` is a successful
//! early return; `Interrupt::Fail` carries a failure payload that `Recover`
//! (or, failing that, the chain runner) turns into the response.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::context::Context;
use crate::errors::Result;
use crate::types::Response;

/// Outcome of a handler.
pub type HandlerResult = std::result::Result<(), Interrupt>;

/// Non-local exit from a handler chain.
#[derive(Debug)]
pub enum Interrupt {
    /// Stop the chain; the request completed successfully.
    Exit,
    /// Stop the chain with a failure.
    Fail(Failure),
}

/// Payload of a failed handler.
#[derive(Debug)]
pub enum Failure {
    /// Error text; becomes `code = -2, msg = text`.
    Message(String),
    /// A complete status; code, msg and (non-null) data are copied verbatim.
    Response(Response),
}

impl Interrupt {
    /// Fail with a message.
    pub fn fail(msg: impl Into<String>) -> Self {
        Self::Fail(Failure::Message(msg.into()))
    }

    /// Fail with a complete response status.
    pub fn respond(resp: Response) -> Self {
        Self::Fail(Failure::Response(resp))
    }
}

impl<E> From<E> for Interrupt
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::fail(err.to_string())
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(msg) => f.write_str(msg),
            Self::Response(resp) => write!(f, "[{}] {}", resp.code, resp.msg),
        }
    }
}

/// Request handler or middleware.
///
/// Middleware calls [`Context::next`] to run the inner handlers; code before
/// the call runs outward-in, code after it runs inward-out.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Run against the in-flight context.
    async fn call(&self, ctx: &mut Context) -> HandlerResult;
}

/// Shared handler reference as stored in route tables.
pub type HandlerFunc = Arc<dyn Handler>;

/// Middleware for server-initiated messages.
///
/// Runs sequentially; returning an error rejects the push.
#[async_trait]
pub trait PushHandler: Send + Sync {
    /// Inspect or rewrite the outbound push.
    async fn handle(&self, ctx: &mut Context) -> Result<()>;
}

/// Shared push handler reference.
pub type PushHandlerFunc = Arc<dyn PushHandler>;

struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync,
{
    async fn call(&self, ctx: &mut Context) -> HandlerResult {
        (self.0)(ctx).await
    }
}

struct FnPushHandler<F>(F);

#[async_trait]
impl<F> PushHandler for FnPushHandler<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    async fn handle(&self, ctx: &mut Context) -> Result<()> {
        (self.0)(ctx).await
    }
}

/// Wrap a closure as a [`HandlerFunc`].
///
/// ```ignore
/// srv.handle("ping", [handler_fn(|c| Box::pin(async move {
///     c.ok_with("pong");
///     Ok(())
/// }))]);
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFunc
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Wrap a closure as a [`PushHandlerFunc`].
pub fn push_handler_fn<F>(f: F) -> PushHandlerFunc
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    Arc::new(FnPushHandler(f))
}
