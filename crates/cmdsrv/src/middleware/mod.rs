//! Built-in middleware.

mod access_log;
mod heartbeat;
pub(crate) mod internal;
mod recover;

pub use access_log::{AccessLog, AccessLogConfig};
pub use heartbeat::Heartbeat;
pub use internal::RouteNotFound;
pub use recover::Recover;
