//! Crate-wide error type and conversions.
//!
//! Mirrors the teacher's `ProviderError`: a flat `thiserror` enum covering
//! every failure surface named in spec §7, with `#[from]` conversions for
//! the handful of external error types the crate actually touches.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the agent loop, transports, tool pipeline, and
/// context-management services.
#[derive(Debug, Error)]
pub enum Error {
    /// A suspension point observed cancellation. Never recovered from;
    /// always propagates out of `run_stream`.
    #[error("operation aborted")]
    Aborted,

    /// Network/HTTP/WS failure from a provider transport.
    #[error("LLM transport error: {0}")]
    Transport(String),

    /// A provider returned a non-success HTTP status.
    #[error("LLM API error (HTTP {status}): {body}")]
    ApiStatus { status: u16, body: String },

    /// `serde_json` failed to parse a provider payload or tool arguments.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(String),

    /// HTTP-level failure during the WS upgrade handshake: status, a bounded
    /// subset of response headers, and a bounded body snippet (≤2 KB).
    #[error("websocket upgrade failed (HTTP {status}): {body_snippet}")]
    WebSocketUpgrade {
        status: u16,
        headers: Vec<(String, String)>,
        body_snippet: String,
    },

    /// Tool was not found in the registry. Callers should convert this to
    /// an error tool message rather than aborting the turn.
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    /// A tool's `execute` returned an error. Converted into a tool message
    /// with `is_error = true`; never bubbles past the agent loop.
    #[error("tool '{name}' failed: {message}")]
    ToolFailed { name: String, message: String },

    /// Permission hook denied the call.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Model spec is missing the context-window figure needed to evaluate
    /// a budget or compaction threshold.
    #[error("missing context limit for model '{0}'")]
    MissingContextLimit(String),

    /// Model id could not be resolved by the registry through any strategy.
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    /// Invalid configuration supplied by the embedder.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Generic compaction failure, distinct from transport failure so the
    /// agent loop can decide whether to proceed with uncompacted history.
    #[error("compaction failed: {0}")]
    Compaction(String),
}

impl Error {
    /// True for errors that must never be captured as a tool/turn message
    /// and must always propagate to the caller.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted)
    }
}
