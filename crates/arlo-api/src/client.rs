// Cloud HTTP client
//
// Wraps `reqwest::Client` with endpoint resolution, session-token header
// injection and unwrapping of the two response envelopes the vendor uses.
// Endpoint groups (auth handshake, devices, certificates) are implemented
// as inherent methods in separate files to keep this module focused on
// transport mechanics.

use std::sync::RwLock;
use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use crate::endpoints::{self, Endpoints};
use crate::error::Error;
use crate::transport::TransportConfig;

/// Maximum number of body bytes quoted back in error messages.
const PREVIEW_LEN: usize = 200;

/// Credential header for calls against the authentication API.
///
/// The email protocol sends the primary token base64-encoded in
/// `Authorization`; the push protocol sends it raw in `accessToken`.
#[derive(Debug, Clone)]
pub enum OcAuth {
    Authorization(SecretString),
    AccessToken(SecretString),
}

impl OcAuth {
    fn apply(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Authorization(token) => builder.header("Authorization", token.expose_secret()),
            Self::AccessToken(token) => builder.header("accessToken", token.expose_secret()),
        }
    }
}

/// `{meta: {code, message}, data}` envelope of the authentication API.
#[derive(Debug, Deserialize)]
struct OcEnvelope {
    meta: OcMeta,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OcMeta {
    code: u16,
    #[serde(default)]
    message: Option<String>,
}

/// `{success, data}` envelope of the device/session API.
#[derive(Debug, Deserialize)]
struct CloudEnvelope {
    success: bool,
    #[serde(default)]
    data: serde_json::Value,
}

/// HTTP client for the vendor cloud.
///
/// Holds the session token as the one piece of shared credential state.
/// Only the session layer writes it (after a completed handshake, or to
/// clear it on logout); every other caller reads it implicitly through
/// the request helpers.
pub struct ApiClient {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    endpoints: Endpoints,
    timeout: Duration,
    token: RwLock<Option<SecretString>>,
}

impl ApiClient {
    /// Create a client from a `TransportConfig`.
    ///
    /// A cookie jar is added if the config lacks one; the cloud pins
    /// sessions to a load-balancer cookie.
    pub fn new(endpoints: Endpoints, transport: &TransportConfig) -> Result<Self, Error> {
        let config = if transport.cookie_jar.is_some() {
            transport.clone()
        } else {
            transport.clone().with_cookie_jar()
        };
        Ok(Self {
            http: config.build_client()?,
            stream_http: config.build_streaming_client()?,
            endpoints,
            timeout: config.timeout,
            token: RwLock::new(None),
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// The configured per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // ── Session token ────────────────────────────────────────────────

    /// Replace the session token. `None` clears it.
    pub fn set_token(&self, token: Option<SecretString>) {
        debug!(present = token.is_some(), "updating session token");
        *self.token.write().expect("token lock poisoned") = token;
    }

    pub fn has_token(&self) -> bool {
        self.token.read().expect("token lock poisoned").is_some()
    }

    fn apply_token(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, Error> {
        let guard = self.token.read().expect("token lock poisoned");
        let token = guard.as_ref().ok_or(Error::NotLoggedIn)?;
        Ok(with_session_headers(builder, token))
    }

    // ── Device/session API helpers ───────────────────────────────────

    pub(crate) fn api_url(&self, path: &str) -> Result<Url, Error> {
        self.endpoints.api(path)
    }

    /// Authenticated GET against the device/session API.
    pub(crate) async fn cloud_get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);
        let builder = self.apply_token(self.http.get(url))?;
        let resp = builder.send().await.map_err(|e| self.map_send_error(e))?;
        parse_cloud(resp).await
    }

    /// Authenticated POST against the device/session API.
    ///
    /// `xcloud_id` routes the request to the device's cloud relay and is
    /// required by the notify and stream endpoints.
    pub(crate) async fn cloud_post<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &(impl Serialize + Sync),
        xcloud_id: Option<&str>,
    ) -> Result<T, Error> {
        debug!("POST {}", url);
        let mut builder = self.apply_token(self.http.post(url).json(body))?;
        if let Some(id) = xcloud_id {
            builder = builder.header("xcloudId", id);
        }
        let resp = builder.send().await.map_err(|e| self.map_send_error(e))?;
        parse_cloud(resp).await
    }

    /// Authenticated PUT against the device/session API.
    pub(crate) async fn cloud_put<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &(impl Serialize + Sync),
    ) -> Result<T, Error> {
        debug!("PUT {}", url);
        let builder = self.apply_token(self.http.put(url).json(body))?;
        let resp = builder.send().await.map_err(|e| self.map_send_error(e))?;
        parse_cloud(resp).await
    }

    /// GET with an explicit token, bypassing the stored one.
    ///
    /// Used for the session exchange, which must not commit anything
    /// until it succeeds.
    pub(crate) async fn cloud_get_with<T: DeserializeOwned>(
        &self,
        url: Url,
        token: &SecretString,
    ) -> Result<T, Error> {
        debug!("GET {} (explicit token)", url);
        let builder = with_session_headers(self.http.get(url), token);
        let resp = builder.send().await.map_err(|e| self.map_send_error(e))?;
        parse_cloud(resp).await
    }

    /// Open the push channel. The returned response body is unbounded.
    pub async fn open_event_stream(&self) -> Result<reqwest::Response, Error> {
        let url = self.endpoints.api(endpoints::SUBSCRIBE)?;
        debug!("GET {} (event stream)", url);
        let builder = self
            .apply_token(self.stream_http.get(url))?
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"));
        let resp = builder.send().await.map_err(|e| self.map_send_error(e))?;
        check_status(resp).await
    }

    // ── Authentication API helpers ───────────────────────────────────

    pub(crate) fn auth_url(&self, path: &str) -> Result<Url, Error> {
        self.endpoints.auth(path)
    }

    pub(crate) async fn oc_get<T: DeserializeOwned>(&self, url: Url, auth: &OcAuth) -> Result<T, Error> {
        debug!("GET {}", url);
        let builder = auth.apply(self.http.get(url));
        let resp = builder.send().await.map_err(|e| self.map_send_error(e))?;
        parse_oc(resp).await
    }

    pub(crate) async fn oc_post<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &(impl Serialize + Sync),
        auth: Option<&OcAuth>,
    ) -> Result<T, Error> {
        debug!("POST {}", url);
        let mut builder = self.http.post(url).json(body);
        if let Some(auth) = auth {
            builder = auth.apply(builder);
        }
        let resp = builder.send().await.map_err(|e| self.map_send_error(e))?;
        parse_oc(resp).await
    }

    fn map_send_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            Error::Transport(err)
        }
    }
}

fn with_session_headers(builder: reqwest::RequestBuilder, token: &SecretString) -> reqwest::RequestBuilder {
    builder
        .header("Authorization", token.expose_secret())
        .header("Auth-Version", "2")
}

// ── Envelope parsing ────────────────────────────────────────────────

fn preview(body: &str) -> String {
    body.chars().take(PREVIEW_LEN).collect()
}

/// Map HTTP-level failures before any envelope is inspected.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(Error::Authentication {
            message: format!("session rejected (HTTP {})", status.as_u16()),
        });
    }

    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Status {
            status: status.as_u16(),
            preview: preview(&body),
        });
    }

    Ok(resp)
}

async fn read_body(resp: reqwest::Response) -> Result<String, Error> {
    let resp = check_status(resp).await?;
    let body = resp.text().await.map_err(Error::Transport)?;
    trace!(len = body.len(), "response body received");
    Ok(body)
}

fn decode<T: DeserializeOwned>(data: serde_json::Value, body: &str) -> Result<T, Error> {
    serde_json::from_value(data).map_err(|e| Error::Deserialization {
        message: format!("{e} (body preview: {:?})", preview(body)),
        body: body.to_owned(),
    })
}

fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, Error> {
    serde_json::from_str(body).map_err(|e| Error::Deserialization {
        message: format!("{e} (body preview: {:?})", preview(body)),
        body: body.to_owned(),
    })
}

/// Unwrap `{success, data}`, returning `data` or `Error::CloudApi`.
async fn parse_cloud<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let body = read_body(resp).await?;
    let envelope: CloudEnvelope = parse_json(&body)?;

    if !envelope.success {
        let message = envelope
            .data
            .get("message")
            .or_else(|| envelope.data.get("reason"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("request unsuccessful")
            .to_owned();
        return Err(Error::CloudApi { message });
    }

    decode(envelope.data, &body)
}

/// Unwrap `{meta: {code}, data}`, returning `data` or `Error::AuthApi`.
async fn parse_oc<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let body = read_body(resp).await?;
    let envelope: OcEnvelope = parse_json(&body)?;

    if envelope.meta.code != 200 {
        return Err(Error::AuthApi {
            code: envelope.meta.code,
            message: envelope
                .meta
                .message
                .unwrap_or_else(|| format!("code={}", envelope.meta.code)),
        });
    }

    decode(envelope.data, &body)
}
