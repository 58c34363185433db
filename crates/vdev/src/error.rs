//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use vdev_config::ConfigError;
use vdev_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CREDENTIALS: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────

    #[error("Configuration file not found")]
    #[diagnostic(
        code(vdev::no_config),
        help(
            "Create one with: vdev init\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(code(vdev::config_exists), help("Pass --force to overwrite it."))]
    ConfigExists { path: String },

    #[error("No gateway password configured for user '{username}'")]
    #[diagnostic(
        code(vdev::no_credentials),
        help(
            "Set gateway.password_env to a variable holding the password,\n\
             store it in the system keyring under service 'vdev', entry 'gateway/{username}',\n\
             or set gateway.password in the config file."
        )
    )]
    NoCredentials { username: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(vdev::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(vdev::config))]
    Config(ConfigError),

    // ── Devices ──────────────────────────────────────────────────────

    #[error("Garage '{name}' not found")]
    #[diagnostic(code(vdev::not_found), help("Configured garages: {available}"))]
    UnknownDevice { name: String, available: String },

    #[error("Could not reach {what}: {message}")]
    #[diagnostic(code(vdev::connection))]
    Connection { what: String, message: String },

    #[error(transparent)]
    #[diagnostic(code(vdev::core))]
    Core(CoreError),

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoConfig { .. }
            | Self::ConfigExists { .. }
            | Self::Validation { .. }
            | Self::Config(_) => exit_code::USAGE,
            Self::NoCredentials { .. } => exit_code::CREDENTIALS,
            Self::UnknownDevice { .. } => exit_code::NOT_FOUND,
            Self::Connection { .. } => exit_code::CONNECTION,
            Self::Core(_) | Self::Io(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { username } => Self::NoCredentials { username },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Config { field, reason } => Self::Validation { field, reason },
            other if other.is_transient() => Self::Connection {
                what: "remote service".into(),
                message: other.to_string(),
            },
            other => Self::Core(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_class() {
        let missing: CliError = ConfigError::NoCredentials {
            username: "admin".into(),
        }
        .into();
        assert_eq!(missing.exit_code(), exit_code::CREDENTIALS);

        let bad: CliError = CoreError::Config {
            field: "controller".into(),
            reason: "address error: x".into(),
        }
        .into();
        assert_eq!(bad.exit_code(), exit_code::USAGE);

        let down: CliError = CoreError::Api {
            message: "timed out".into(),
            transient: true,
        }
        .into();
        assert_eq!(down.exit_code(), exit_code::CONNECTION);

        assert_ne!(exit_code::SUCCESS, exit_code::GENERAL);
    }
}
