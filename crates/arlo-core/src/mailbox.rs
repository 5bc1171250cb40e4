// ── One-time code collaborator ──
//
// The email factor delivers a 6-digit code to an inbox the engine does
// not own. A `OneTimeCodeSource` fetches it; `poll_one_time_code` wraps
// the bounded fixed-delay retry around that fetch.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::debug;

use crate::error::{AuthError, CoreError};

/// Subject line of the vendor's code email.
pub const SUBJECT_FILTER: &str = "Your one-time authentication code from Arlo";

/// Where the code email lands.
#[derive(Clone)]
pub struct MailboxConnection {
    pub user: String,
    pub password: SecretString,
    pub host: String,
    pub port: u16,
}

impl Default for MailboxConnection {
    fn default() -> Self {
        Self {
            user: String::new(),
            password: SecretString::from(String::new()),
            host: String::new(),
            port: 993,
        }
    }
}

impl fmt::Debug for MailboxConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxConnection")
            .field("user", &self.user)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

/// Supplies the one-time code for the email factor.
///
/// Implementations should consume the source message so the next login
/// does not pick up a stale code. `Ok(None)` means "not there yet".
#[async_trait]
pub trait OneTimeCodeSource: Send + Sync {
    async fn fetch_code(&self, connection: &MailboxConnection, subject: &str) -> Result<Option<String>, CoreError>;
}

/// Bounded fixed-delay retry for the code fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeRetry {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for CodeRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(10),
        }
    }
}

/// Wait `delay`, ask the source, repeat up to `attempts` times.
pub async fn poll_one_time_code(
    source: &dyn OneTimeCodeSource,
    connection: &MailboxConnection,
    retry: CodeRetry,
) -> Result<String, CoreError> {
    for attempt in 1..=retry.attempts {
        if !retry.delay.is_zero() {
            tokio::time::sleep(retry.delay).await;
        }
        match source.fetch_code(connection, SUBJECT_FILTER).await? {
            Some(raw) => match extract_code(&raw) {
                Some(code) => return Ok(code),
                None => debug!(attempt, "fetched text holds no 6-digit code"),
            },
            None => debug!(attempt, "one-time code not found yet"),
        }
    }
    Err(AuthError::InvalidCode(format!("no one-time code received after {} attempts", retry.attempts)).into())
}

/// First run of exactly six ASCII digits in `text`.
pub fn extract_code(text: &str) -> Option<String> {
    text.split(|c: char| !c.is_ascii_digit())
        .find(|run| run.len() == 6)
        .map(str::to_owned)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Scripted(Mutex<Vec<Option<String>>>);

    #[async_trait]
    impl OneTimeCodeSource for Scripted {
        async fn fetch_code(&self, _: &MailboxConnection, subject: &str) -> Result<Option<String>, CoreError> {
            assert_eq!(subject, SUBJECT_FILTER);
            Ok(self.0.lock().unwrap().remove(0))
        }
    }

    fn retry() -> CodeRetry {
        CodeRetry {
            attempts: 3,
            delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn extracts_six_digit_runs_only() {
        assert_eq!(extract_code("Your code is 123456.").as_deref(), Some("123456"));
        assert_eq!(extract_code("ref 1234567 code 654321").as_deref(), Some("654321"));
        assert_eq!(extract_code("12345"), None);
    }

    #[tokio::test]
    async fn code_found_on_second_attempt() {
        let source = Scripted(Mutex::new(vec![None, Some("code: 987654".into()), None]));
        let code = poll_one_time_code(&source, &MailboxConnection::default(), retry())
            .await
            .unwrap();
        assert_eq!(code, "987654");
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let source = Scripted(Mutex::new(vec![None, None, None]));
        let err = poll_one_time_code(&source, &MailboxConnection::default(), retry())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Auth(AuthError::InvalidCode(_))));
        assert!(source.0.lock().unwrap().is_empty());
    }
}
