// ── Core error types ──
//
// User-facing errors from arlo-core. Consumers never see raw HTTP
// status codes or envelope shapes; the `From<arlo_api::Error>` impl
// translates wire errors into the engine's taxonomy.

use thiserror::Error;

/// Failures of the login handshake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("No {factor} factor registered on this account")]
    NoFactorAvailable { factor: String },

    #[error("One-time code rejected: {0}")]
    InvalidCode(String),

    #[error("Session token expired")]
    TokenExpired,
}

/// Failures reaching the cloud or the hub.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("HTTP {0}")]
    NonSuccessStatus(u16),
}

/// Failures interpreting what the cloud sent back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Unparsable envelope: {0}")]
    UnparsableEnvelope(String),

    #[error("Event for unknown device {0}")]
    UnknownDevice(String),

    #[error("Device discovery returned no hub")]
    MissingHub,
}

/// Failures of the hub-local media channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocalChannelError {
    #[error("Hub rejected local credentials ({0}); they were reset and will be reissued")]
    StaleCredential(String),

    #[error("Hub unreachable: {0}")]
    HubUnreachable(String),
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    LocalChannel(#[from] LocalChannelError),

    // ── Engine state ─────────────────────────────────────────────────
    #[error("Event stream is not connected")]
    Disconnected,

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The cloud answered but refused the request.
    #[error("Request rejected: {message}")]
    Rejected { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns `true` for failures the caller may sensibly retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Disconnected
                | Self::Transport(TransportError::Timeout | TransportError::ConnectionRefused(_))
        ) || matches!(self, Self::Transport(TransportError::NonSuccessStatus(code)) if *code >= 500)
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<arlo_api::Error> for CoreError {
    fn from(err: arlo_api::Error) -> Self {
        use arlo_api::Error as Api;

        match err {
            Api::Authentication { .. } => AuthError::TokenExpired.into(),
            Api::NotLoggedIn => CoreError::NotLoggedIn,
            Api::Transport(ref e) => {
                if e.is_timeout() {
                    TransportError::Timeout.into()
                } else if e.is_connect() {
                    TransportError::ConnectionRefused(e.to_string()).into()
                } else if let Some(status) = e.status() {
                    TransportError::NonSuccessStatus(status.as_u16()).into()
                } else {
                    TransportError::ConnectionRefused(e.to_string()).into()
                }
            }
            Api::Timeout { .. } => TransportError::Timeout.into(),
            Api::Status { status, .. } => TransportError::NonSuccessStatus(status).into(),
            Api::Tls(msg) => TransportError::ConnectionRefused(format!("TLS: {msg}")).into(),
            Api::EventStream(msg) => TransportError::ConnectionRefused(msg).into(),
            Api::AuthApi { message, .. } | Api::CloudApi { message } => CoreError::Rejected { message },
            Api::Deserialization { message, .. } => ProtocolError::UnparsableEnvelope(message).into(),
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Io(e) => CoreError::Internal(format!("I/O error: {e}")),
        }
    }
}
