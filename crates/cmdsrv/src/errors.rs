//! Router error codes and error type.

// ── Error code constants ────────────────────────────────────────────

/// No adapter currently owns the session.
pub const SESSION_NOT_FOUND: &str = "SESSION_NOT_FOUND";
/// The session existed but its connection is gone.
pub const SESSION_CLOSED: &str = "SESSION_CLOSED";
/// Adapter-level I/O failure.
pub const TRANSPORT_ERROR: &str = "TRANSPORT_ERROR";
/// The adapter's message source has shut down.
pub const ADAPTER_CLOSED: &str = "ADAPTER_CLOSED";
/// `run()` was called on a router that is already running.
pub const ALREADY_RUNNING: &str = "ALREADY_RUNNING";
/// A push middleware refused the outbound message.
pub const PUSH_REJECTED: &str = "PUSH_REJECTED";
/// Payload could not be decoded.
pub const DECODE_ERROR: &str = "DECODE_ERROR";
/// Invalid configuration.
pub const CONFIG_ERROR: &str = "CONFIG_ERROR";

/// Errors returned by router operations and adapters.
#[derive(Debug, thiserror::Error)]
pub enum SrvError {
    /// No registered adapter lists the session id.
    #[error("session not found: {sid}")]
    SessionNotFound {
        /// The unknown session id.
        sid: String,
    },

    /// The session's connection has already been closed.
    #[error("session already closed: {sid}")]
    SessionClosed {
        /// The closed session id.
        sid: String,
    },

    /// Transport failure reported by an adapter.
    #[error("transport error: {message}")]
    Transport {
        /// Description from the adapter.
        message: String,
    },

    /// The adapter will not deliver any more messages.
    #[error("adapter closed")]
    AdapterClosed,

    /// The router's dispatch loops are already started.
    #[error("router is already running")]
    AlreadyRunning,

    /// A push middleware rejected the message.
    #[error("push rejected: {reason}")]
    PushRejected {
        /// Why the push was refused.
        reason: String,
    },

    /// Payload decoding failed.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Configuration could not be loaded.
    #[error("config error: {message}")]
    Config {
        /// Description.
        message: String,
    },
}

impl SrvError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound { .. } => SESSION_NOT_FOUND,
            Self::SessionClosed { .. } => SESSION_CLOSED,
            Self::Transport { .. } => TRANSPORT_ERROR,
            Self::AdapterClosed => ADAPTER_CLOSED,
            Self::AlreadyRunning => ALREADY_RUNNING,
            Self::PushRejected { .. } => PUSH_REJECTED,
            Self::Decode(_) => DECODE_ERROR,
            Self::Config { .. } => CONFIG_ERROR,
        }
    }

    /// Shorthand for [`SrvError::SessionNotFound`].
    pub fn session_not_found(sid: impl Into<String>) -> Self {
        Self::SessionNotFound { sid: sid.into() }
    }

    /// Shorthand for [`SrvError::SessionClosed`].
    pub fn session_closed(sid: impl Into<String>) -> Self {
        Self::SessionClosed { sid: sid.into() }
    }

    /// Shorthand for [`SrvError::PushRejected`].
    pub fn push_rejected(reason: impl Into<String>) -> Self {
        Self::PushRejected {
            reason: reason.into(),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T, E = SrvError> = std::result::Result<T, E>;
