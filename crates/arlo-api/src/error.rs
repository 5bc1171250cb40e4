use thiserror::Error;

/// Top-level error type for the `arlo-api` crate.
///
/// Covers every failure mode of the wire layer: the two cloud response
/// envelopes, HTTP transport, the push event stream and the hub-local
/// storage client. `arlo-core` maps these into its own taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Credentials rejected or bearer token revoked (HTTP 401/403).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// An authenticated call was attempted before a session was established.
    #[error("No session token -- login required")]
    NotLoggedIn,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS setup or handshake error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Non-success HTTP status outside the envelope contract.
    #[error("HTTP {status}: {preview}")]
    Status { status: u16, preview: String },

    // ── Envelopes ───────────────────────────────────────────────────
    /// `{meta: {code, message}}` envelope with a code other than 200.
    #[error("Auth API rejected request (code {code}): {message}")]
    AuthApi { code: u16, message: String },

    /// `{success: false, data: {message}}` envelope.
    #[error("Cloud API rejected request: {message}")]
    CloudApi { message: String },

    // ── Event stream ────────────────────────────────────────────────
    /// The push stream could not be opened or dropped with an error.
    #[error("Event stream error: {0}")]
    EventStream(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// Local filesystem error while writing a download.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if this error indicates auth has expired
    /// and re-authentication might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::NotLoggedIn)
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            Self::Timeout { .. } | Self::EventStream(_) => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if the peer could not be reached at all.
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_connect())
    }

    /// Returns `true` if the request hit its deadline.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::Status { status, .. } => Some(*status),
            Self::AuthApi { code, .. } => Some(*code),
            _ => None,
        }
    }
}
