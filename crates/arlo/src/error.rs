//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use arlo_config::ConfigError;
use arlo_core::{AuthError, CoreError, LocalChannelError, ProtocolError, TransportError};

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the Arlo cloud: {reason}")]
    #[diagnostic(
        code(arlo::connection_failed),
        help("Check network access, or raise --timeout. Run with -vv for request details.")
    )]
    ConnectionFailed { reason: String },

    #[error("Timed out: {reason}")]
    #[diagnostic(
        code(arlo::timeout),
        help("Increase --timeout, or --wait for device discovery.")
    )]
    Timeout { reason: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {reason}")]
    #[diagnostic(
        code(arlo::auth_failed),
        help(
            "Verify the account email and password.\n\
             Run: arlo config set-password"
        )
    )]
    AuthFailed { reason: String },

    #[error("No {secret} configured for profile '{profile}'")]
    #[diagnostic(
        code(arlo::no_credentials),
        help(
            "Configure credentials with: arlo config init\n\
             Or set the ARLO_PASSWORD environment variable."
        )
    )]
    NoCredentials { profile: String, secret: String },

    // ── Devices ──────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(code(arlo::not_found), help("Run: arlo {list_command} to see available ids"))]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("The account has no hub")]
    #[diagnostic(
        code(arlo::no_hub),
        help("Every household needs a base station or a self-hosted camera.")
    )]
    NoHub,

    // ── Cloud ────────────────────────────────────────────────────────
    #[error("API error ({code}): {message}")]
    #[diagnostic(code(arlo::api_error))]
    ApiError { code: String, message: String },

    // ── Local storage ────────────────────────────────────────────────
    #[error("Local storage failed: {message}")]
    #[diagnostic(
        code(arlo::local_storage),
        help("Local credentials were reset and will be reissued on the next attempt.")
    )]
    LocalStorage { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(arlo::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(arlo::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: arlo config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Configuration file not found")]
    #[diagnostic(
        code(arlo::no_config),
        help(
            "Create one with: arlo config init\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Configuration error: {0}")]
    #[diagnostic(code(arlo::config))]
    Config(String),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::LocalStorage { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::NoHub => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Auth(e) => CliError::AuthFailed {
                reason: match e {
                    AuthError::TokenExpired => "session expired".into(),
                    other => other.to_string(),
                },
            },
            CoreError::NotLoggedIn => CliError::AuthFailed {
                reason: "not logged in".into(),
            },

            CoreError::Transport(TransportError::Timeout) => CliError::Timeout {
                reason: "the cloud did not answer in time".into(),
            },
            CoreError::Transport(TransportError::ConnectionRefused(reason)) => {
                CliError::ConnectionFailed { reason }
            }
            CoreError::Transport(TransportError::NonSuccessStatus(status)) => CliError::ApiError {
                code: format!("http_{status}"),
                message: format!("unexpected HTTP status {status}"),
            },
            CoreError::Disconnected => CliError::ConnectionFailed {
                reason: "the event stream is not connected".into(),
            },

            CoreError::Protocol(ProtocolError::MissingHub) => CliError::NoHub,
            CoreError::Protocol(e) => CliError::ApiError {
                code: "protocol".into(),
                message: e.to_string(),
            },

            CoreError::LocalChannel(e @ LocalChannelError::HubUnreachable(_)) => CliError::ConnectionFailed {
                reason: e.to_string(),
            },
            CoreError::LocalChannel(e @ LocalChannelError::StaleCredential(_)) => CliError::LocalStorage {
                message: e.to_string(),
            },

            CoreError::DeviceNotFound(identifier) => CliError::NotFound {
                resource_type: "device".into(),
                identifier,
                list_command: "devices list".into(),
            },

            CoreError::Rejected { message } => CliError::ApiError {
                code: "rejected".into(),
                message,
            },

            CoreError::Config { message } => CliError::Config(message),

            CoreError::Internal(message) => CliError::ApiError {
                code: "internal".into(),
                message,
            },
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile, secret } => CliError::NoCredentials { profile, secret },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config(other.to_string()),
        }
    }
}
