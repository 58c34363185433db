// ── Core error types ──
//
// Errors from vdev-core. Boundary I/O failures are mostly logged and
// folded into "no update this cycle"; these variants surface where a
// caller can act on them (startup, persistence, configuration).
// The `From<vdev_api::Error>` impl keeps transport details out of the
// public surface.

use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid configuration for {field}: {reason}")]
    Config { field: String, reason: String },

    // ── Persistence ──────────────────────────────────────────────────
    #[error("Persistence failure: {message}")]
    Persistence { message: String },

    #[error("Legacy artifact {path} could not be migrated: {reason}")]
    Migration { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ── Remote surfaces (wrapped, not exposed raw) ───────────────────
    #[error("Remote call failed: {message}")]
    Api {
        message: String,
        transient: bool,
    },
}

impl CoreError {
    /// `true` when a later retry might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Api { transient, .. } => *transient,
            Self::Io(_) => true,
            _ => false,
        }
    }
}

impl From<vdev_api::Error> for CoreError {
    fn from(err: vdev_api::Error) -> Self {
        if err.is_config() {
            return Self::Config {
                field: "variable".into(),
                reason: err.to_string(),
            };
        }
        Self::Api {
            transient: err.is_transient(),
            message: err.to_string(),
        }
    }
}
