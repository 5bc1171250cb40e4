// ── Authentication session ──
//
// Drives the multi-factor login to a bearer session. Intermediate
// tokens live only inside one `login` call; the shared API client's
// bearer token is written once, after the session exchange succeeds,
// and cleared by logout or expiry. Nothing else writes it.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use arlo_api::{ApiClient, MfaProtocol, OcAuth};

use crate::error::{AuthError, CoreError, ProtocolError};
use crate::mailbox::{CodeRetry, MailboxConnection, OneTimeCodeSource, poll_one_time_code};
use crate::model::{Identity, Session, SessionState};

// ── Inputs ───────────────────────────────────────────────────────────

/// Account credentials.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: SecretString,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Which second factor to use, with what it needs.
#[derive(Debug, Clone)]
pub enum AuthFlow {
    /// Password login; the code is read from a mailbox.
    Email {
        mailbox: MailboxConnection,
        retry: CodeRetry,
    },
    /// Mobile-token login; a paired device approves silently.
    Push {
        mobile_payload: SecretString,
        /// Access token from a previous run, tried before a full login.
        saved_token: Option<SecretString>,
    },
}

impl AuthFlow {
    pub fn protocol(&self) -> MfaProtocol {
        match self {
            Self::Email { .. } => MfaProtocol::Email,
            Self::Push { .. } => MfaProtocol::Push,
        }
    }
}

// ── AuthSession ──────────────────────────────────────────────────────

pub struct AuthSession {
    api: Arc<ApiClient>,
    flow: AuthFlow,
    code_source: Option<Arc<dyn OneTimeCodeSource>>,
    state: watch::Sender<SessionState>,
    session: ArcSwapOption<Session>,
}

impl AuthSession {
    pub fn new(api: Arc<ApiClient>, flow: AuthFlow, code_source: Option<Arc<dyn OneTimeCodeSource>>) -> Self {
        let (state, _) = watch::channel(SessionState::Unauthenticated);
        Self {
            api,
            flow,
            code_source,
            state,
            session: ArcSwapOption::empty(),
        }
    }

    // ── Login / logout ───────────────────────────────────────────────

    /// Run the full handshake.
    ///
    /// Any failing step aborts the login: the state returns to
    /// `Unauthenticated` and the client's bearer token is left as it was.
    pub async fn login(&self, credentials: &Credentials) -> Result<Session, CoreError> {
        let current = *self.state.borrow();
        if current == SessionState::Authenticated {
            if let Some(session) = self.session() {
                return Ok(session);
            }
        } else if !current.can_login() {
            return Err(CoreError::Internal(format!("login already in progress ({current})")));
        }

        self.set_state(SessionState::Authenticating);
        match self.handshake(credentials).await {
            Ok(session) => {
                self.api.set_token(Some(session.token.clone()));
                self.session.store(Some(Arc::new(session.clone())));
                self.set_state(SessionState::Authenticated);
                info!(user_id = %session.identity.user_id, "logged in");
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "login failed");
                self.set_state(SessionState::Unauthenticated);
                Err(e)
            }
        }
    }

    /// End the cloud session and clear local state.
    ///
    /// Local state is cleared even when the logout request fails; the
    /// request's error is still returned.
    pub async fn logout(&self) -> Result<(), CoreError> {
        let result = if self.api.has_token() {
            self.api.logout().await.map_err(CoreError::from)
        } else {
            Ok(())
        };
        self.api.set_token(None);
        self.session.store(None);
        self.set_state(SessionState::Unauthenticated);
        debug!("session cleared");
        result
    }

    /// Mark the session expired (token lifetime elapsed or remote logout).
    pub fn expire(&self) {
        self.api.set_token(None);
        self.session.store(None);
        self.set_state(SessionState::Expired);
        info!("session expired");
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn is_valid(&self) -> bool {
        *self.state.borrow() == SessionState::Authenticated
            && self.session().is_some_and(|s| !s.is_expired_at(Utc::now()))
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn session(&self) -> Option<Session> {
        self.session.load_full().map(|s| (*s).clone())
    }

    pub fn identity(&self) -> Option<Identity> {
        self.session.load_full().map(|s| s.identity.clone())
    }

    pub fn flow(&self) -> &AuthFlow {
        &self.flow
    }

    // ── Handshake ────────────────────────────────────────────────────

    async fn handshake(&self, credentials: &Credentials) -> Result<Session, CoreError> {
        let protocol = self.flow.protocol();

        if let AuthFlow::Push {
            saved_token: Some(token),
            ..
        } = &self.flow
        {
            if self.saved_token_valid(token).await {
                debug!("saved access token still valid, skipping factor exchange");
                return self.exchange(token, None).await;
            }
        }

        // 1. Primary credentials.
        let ticket = self
            .api
            .submit_credentials(protocol, &credentials.email, &credentials.password)
            .await
            .map_err(|e| rejected(e, AuthError::InvalidCredentials))?;
        if ticket.mfa == Some(false) {
            return Err(AuthError::InvalidCredentials("account is not enrolled in multi-factor login".into()).into());
        }
        let primary = oc_auth(protocol, &ticket.token);
        let reference = ticket.authenticated.as_deref();
        self.set_state(SessionState::AwaitingFactor);

        // 2. Pick the configured factor.
        let factor = self
            .api
            .list_factors(protocol, reference, &primary)
            .await?
            .into_iter()
            .find(|f| f.factor_type.eq_ignore_ascii_case(protocol.factor_type()))
            .ok_or_else(|| AuthError::NoFactorAvailable {
                factor: protocol.factor_type().to_owned(),
            })?;
        debug!(factor_id = %factor.factor_id, "factor selected");

        // 3. Trigger delivery.
        let mobile_payload = match &self.flow {
            AuthFlow::Push { mobile_payload, .. } => Some(mobile_payload),
            AuthFlow::Email { .. } => None,
        };
        let start = self
            .api
            .start_factor(protocol, &factor, mobile_payload, &primary)
            .await?;
        self.set_state(SessionState::AwaitingCode);

        // 4-5. Code (email) or directly issued token (push).
        let (access, lifetime) = match &self.flow {
            AuthFlow::Email { mailbox, retry } => {
                let correlation = start.factor_auth_code.ok_or_else(|| {
                    ProtocolError::UnparsableEnvelope("factor start without factorAuthCode".into())
                })?;
                let source = self.code_source.as_ref().ok_or_else(|| CoreError::Config {
                    message: "email login needs a one-time code source".into(),
                })?;
                let code = poll_one_time_code(source.as_ref(), mailbox, *retry).await?;
                let finish = self
                    .api
                    .finish_factor(&correlation, &code, &primary)
                    .await
                    .map_err(|e| rejected(e, AuthError::InvalidCode))?;
                (SecretString::from(finish.token), finish.expires_in)
            }
            AuthFlow::Push { .. } => {
                let issued = start
                    .access_token
                    .ok_or_else(|| AuthError::InvalidCode("push approval issued no access token".into()))?;
                (SecretString::from(issued.token), issued.expired_in)
            }
        };

        // 6. Validate the access token.
        let validation = self
            .api
            .validate_access_token(protocol, reference, &oc_auth(protocol, access.expose_secret()))
            .await
            .map_err(|e| rejected(e, AuthError::InvalidCode))?;
        if protocol == MfaProtocol::Push && validation.token_validated != Some(true) {
            return Err(AuthError::InvalidCode("access token was not validated".into()).into());
        }

        // 7. Final session.
        self.exchange(&access, lifetime).await
    }

    async fn saved_token_valid(&self, token: &SecretString) -> bool {
        let auth = OcAuth::AccessToken(token.clone());
        match self.api.validate_access_token(MfaProtocol::Push, None, &auth).await {
            Ok(validation) => validation.token_validated == Some(true),
            Err(e) => {
                debug!(error = %e, "saved access token rejected");
                false
            }
        }
    }

    async fn exchange(&self, access: &SecretString, lifetime: Option<i64>) -> Result<Session, CoreError> {
        let info = self.api.start_session(access).await?;
        Ok(Session {
            token: SecretString::from(info.token),
            token_expiry: expiry_from(lifetime, Utc::now()),
            identity: Identity {
                user_id: info.user_id,
                serial_number: info.serial_number,
            },
        })
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Auth-API credential header for a token under `protocol`.
fn oc_auth(protocol: MfaProtocol, token: &str) -> OcAuth {
    match protocol {
        MfaProtocol::Email => OcAuth::Authorization(SecretString::from(BASE64.encode(token))),
        MfaProtocol::Push => OcAuth::AccessToken(SecretString::from(token.to_owned())),
    }
}

/// Map an explicit rejection to `kind`; pass transport failures through.
fn rejected(err: arlo_api::Error, kind: fn(String) -> AuthError) -> CoreError {
    match err {
        arlo_api::Error::AuthApi { message, .. } | arlo_api::Error::Authentication { message } => kind(message).into(),
        other => other.into(),
    }
}

/// Token lifetime as issued: seconds from now, or an absolute epoch
/// timestamp in seconds or milliseconds.
fn expiry_from(lifetime: Option<i64>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let value = lifetime.filter(|v| *v > 0)?;
    if value >= 1_000_000_000_000 {
        DateTime::from_timestamp_millis(value)
    } else if value >= 1_000_000_000 {
        DateTime::from_timestamp(value, 0)
    } else {
        Some(now + chrono::Duration::seconds(value))
    }
}
