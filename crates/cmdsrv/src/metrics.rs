//! Metric names recorded through the `metrics` facade.
//!
//! The library installs no recorder; embedders pick an exporter.

/// Inbound requests dispatched (counter, labels: cmd).
pub const REQUESTS_TOTAL: &str = "cmdsrv_requests_total";
/// Requests answered with the unsupported-command response (counter).
pub const UNSUPPORTED_TOTAL: &str = "cmdsrv_unsupported_total";
/// Failures converted into error responses (counter, labels: kind).
pub const FAILURES_TOTAL: &str = "cmdsrv_failures_total";
/// Handler chain duration seconds (histogram, labels: cmd).
pub const REQUEST_DURATION_SECONDS: &str = "cmdsrv_request_duration_seconds";
/// Pushes delivered (counter).
pub const PUSHES_TOTAL: &str = "cmdsrv_pushes_total";
/// Pushes refused by push middleware (counter).
pub const PUSH_REJECTED_TOTAL: &str = "cmdsrv_push_rejected_total";
/// Sessions closed for inactivity (counter).
pub const HEARTBEAT_CLOSED_TOTAL: &str = "cmdsrv_heartbeat_closed_total";
