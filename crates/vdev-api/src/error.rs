use thiserror::Error;

/// Top-level error type for the `vdev-api` crate.
///
/// Covers both remote surfaces: the gateway variable REST API and the
/// door controller (REST + event stream). `vdev-core` folds these into
/// "no update this cycle" outcomes; nothing here is fatal on its own.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Remote answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    // ── Gateway variables ───────────────────────────────────────────
    /// Variable type outside the 1..=4 table.
    #[error("Unknown variable type {0}")]
    UnknownVarType(i64),

    /// Variable id zero, negative or not an integer.
    #[error("Invalid variable id: {0}")]
    InvalidVarId(String),

    /// Gateway reply lacked the tag we read from, or it was not an integer.
    #[error("Variable reply has no usable <{tag}> element")]
    MissingTag { tag: &'static str },

    // ── Event stream ────────────────────────────────────────────────
    /// No bytes arrived within the idle window.
    #[error("Event stream idle for {timeout_secs}s")]
    IdleTimeout { timeout_secs: u64 },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            Self::IdleTimeout { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` for errors caused by local configuration rather than
    /// by the remote end (bad variable addressing, malformed URLs).
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::UnknownVarType(_) | Self::InvalidVarId(_) | Self::InvalidUrl(_)
        )
    }
}
