// ── Session types ──

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use strum::Display;

/// Where the login handshake stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    AwaitingFactor,
    AwaitingCode,
    Authenticated,
    Expired,
}

impl SessionState {
    /// States from which a fresh login may start.
    pub fn can_login(self) -> bool {
        matches!(self, Self::Unauthenticated | Self::Expired)
    }
}

/// Who the session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: String,
    pub serial_number: Option<String>,
}

/// An established cloud session.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: SecretString,
    pub token_expiry: Option<DateTime<Utc>>,
    pub identity: Identity,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.token_expiry.is_some_and(|expiry| now >= expiry)
    }
}
