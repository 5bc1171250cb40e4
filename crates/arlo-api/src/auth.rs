// Authentication API handshake calls
//
// Each method is one step of the multi-factor login. The two protocol
// revisions share the step sequence but differ in paths, credential
// headers and response fields; `MfaProtocol` selects between them.
// State between steps is owned by the caller, never stored here.

use secrecy::{ExposeSecret, SecretString};
use serde::de::IgnoredAny;
use serde_json::json;
use tracing::debug;

use crate::client::{ApiClient, OcAuth};
use crate::endpoints;
use crate::error::Error;
use crate::models::{AuthTicket, Factor, FactorFinish, FactorList, FactorStart, SessionInfo, TokenValidation};

/// Which revision of the authentication API to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MfaProtocol {
    /// Password login with a one-time code delivered by email.
    Email,
    /// Mobile-token login with a silent push to a paired device.
    Push,
}

impl MfaProtocol {
    /// The `factorType` this protocol selects from the factor list.
    pub fn factor_type(self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::Push => "PUSH",
        }
    }

    fn credentials_path(self) -> &'static str {
        match self {
            Self::Email => "auth",
            Self::Push => "v2/ocAuth_PHP_MFA",
        }
    }

    fn factors_path(self) -> &'static str {
        match self {
            Self::Email => "getFactors",
            Self::Push => "v2/ocGetFactors_PHP_MFA",
        }
    }

    fn start_path(self) -> &'static str {
        match self {
            Self::Email => "startAuth",
            Self::Push => "v2/ocStart2FAauth_PHP_MFA",
        }
    }

    fn validate_path(self) -> &'static str {
        match self {
            Self::Email => "validateAccessToken",
            Self::Push => "v2/ocAccessTokenValidate_PHP_MFA",
        }
    }
}

impl ApiClient {
    /// Submit primary credentials.
    pub async fn submit_credentials(
        &self,
        protocol: MfaProtocol,
        email: &str,
        password: &SecretString,
    ) -> Result<AuthTicket, Error> {
        debug!(?protocol, "submitting primary credentials");
        let mut url = self.auth_url(protocol.credentials_path())?;
        let body = match protocol {
            MfaProtocol::Email => {
                url.query_pairs_mut()
                    .append_pair("timestamp", &chrono::Utc::now().timestamp_millis().to_string());
                json!({
                    "email": email,
                    "password": password.expose_secret(),
                    "language": "en",
                    "EnvSource": "prod",
                })
            }
            MfaProtocol::Push => json!({
                "email": email,
                "password": password.expose_secret(),
            }),
        };
        self.oc_post(url, &body, None).await
    }

    /// Enumerate the second factors registered on the account.
    pub async fn list_factors(
        &self,
        protocol: MfaProtocol,
        authenticated: Option<&str>,
        auth: &OcAuth,
    ) -> Result<Vec<Factor>, Error> {
        debug!(?protocol, "listing factors");
        let mut url = self.auth_url(protocol.factors_path())?;
        if let (MfaProtocol::Email, Some(reference)) = (protocol, authenticated) {
            url.query_pairs_mut().append_pair("data", reference);
        }
        let list: FactorList = self.oc_get(url, auth).await?;
        Ok(list.items)
    }

    /// Trigger delivery of the selected factor.
    pub async fn start_factor(
        &self,
        protocol: MfaProtocol,
        factor: &Factor,
        mobile_payload: Option<&SecretString>,
        auth: &OcAuth,
    ) -> Result<FactorStart, Error> {
        debug!(?protocol, factor_id = %factor.factor_id, "starting factor delivery");
        let mut url = self.auth_url(protocol.start_path())?;
        let body = match protocol {
            MfaProtocol::Email => json!({ "factorId": factor.factor_id }),
            MfaProtocol::Push => {
                if let Some(app) = factor.application_id.as_deref() {
                    url.query_pairs_mut().append_pair("applicationId", app);
                }
                json!({
                    "factorId": factor.factor_id,
                    "mobilePayload": mobile_payload.map(|p| p.expose_secret()),
                })
            }
        };
        self.oc_post(url, &body, Some(auth)).await
    }

    /// Submit the one-time code (email protocol only).
    pub async fn finish_factor(
        &self,
        factor_auth_code: &str,
        otp: &str,
        auth: &OcAuth,
    ) -> Result<FactorFinish, Error> {
        debug!("submitting one-time code");
        let url = self.auth_url("finishAuth")?;
        let body = json!({ "factorAuthCode": factor_auth_code, "otp": otp });
        self.oc_post(url, &body, Some(auth)).await
    }

    /// Ask the authentication API whether an access token is valid.
    pub async fn validate_access_token(
        &self,
        protocol: MfaProtocol,
        authenticated: Option<&str>,
        auth: &OcAuth,
    ) -> Result<TokenValidation, Error> {
        debug!(?protocol, "validating access token");
        let mut url = self.auth_url(protocol.validate_path())?;
        if let (MfaProtocol::Email, Some(reference)) = (protocol, authenticated) {
            url.query_pairs_mut().append_pair("data", reference);
        }
        self.oc_get(url, auth).await
    }

    /// Exchange a validated access token for the final session.
    ///
    /// Uses `token` explicitly; the stored session token is untouched.
    pub async fn start_session(&self, token: &SecretString) -> Result<SessionInfo, Error> {
        debug!("starting cloud session");
        let url = self.api_url(endpoints::SESSION)?;
        self.cloud_get_with(url, token).await
    }

    /// End the cloud session. The stored token is left for the caller to clear.
    pub async fn logout(&self) -> Result<(), Error> {
        debug!("logging out");
        let url = self.api_url(endpoints::LOGOUT)?;
        let _: IgnoredAny = self.cloud_put(url, &json!({})).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocols_select_their_factor_type() {
        assert_eq!(MfaProtocol::Email.factor_type(), "EMAIL");
        assert_eq!(MfaProtocol::Push.factor_type(), "PUSH");
        assert_ne!(MfaProtocol::Email.start_path(), MfaProtocol::Push.start_path());
    }
}
