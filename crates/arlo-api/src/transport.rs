// Shared transport configuration for building reqwest::Client instances.
//
// The cloud client, the event stream and the hub-local client all derive
// their HTTP clients from here so TLS, timeout and cookie handling stay in
// one place.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;

use crate::error::Error;

/// User agent presented to the cloud API.
pub const USER_AGENT: &str = "(iPhone13,3 14_7_1) iOS Arlo 3.5";

/// TLS verification mode for cloud calls.
#[derive(Debug, Clone)]
pub enum TlsMode {
    /// Use the system certificate store.
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (test servers, intercepting proxies).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
    pub cookie_jar: Option<Arc<Jar>>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
            cookie_jar: None,
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` for buffered request/response calls.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        self.builder()?
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }

    /// Build a client for the indefinitely-lived push stream.
    ///
    /// Only the connect phase is bounded; the body may stay open for hours.
    pub fn build_streaming_client(&self) -> Result<reqwest::Client, Error> {
        self.builder()?
            .connect_timeout(self.timeout)
            .build()
            .map_err(|e| Error::Tls(format!("failed to build streaming client: {e}")))
    }

    /// Create a config with a fresh cookie jar (cloud session cookies).
    pub fn with_cookie_jar(mut self) -> Self {
        self.cookie_jar = Some(Arc::new(Jar::default()));
        self
    }

    fn builder(&self) -> Result<reqwest::ClientBuilder, Error> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        if let Some(ref jar) = self.cookie_jar {
            builder = builder.cookie_provider(Arc::clone(jar));
        }

        Ok(builder)
    }
}

/// Build a mutually-authenticated client for the hub-local storage API.
///
/// `identity_pem` holds the PKCS#8 private key followed by the client
/// certificate chain. The hub presents a self-issued certificate, so
/// server verification is limited to the supplied intermediate.
pub fn build_mtls_client(
    identity_pem: &[u8],
    ica_pem: &[u8],
    timeout: Duration,
) -> Result<reqwest::Client, Error> {
    let identity = reqwest::Identity::from_pem(identity_pem)
        .map_err(|e| Error::Tls(format!("invalid client identity: {e}")))?;
    let ica = reqwest::Certificate::from_pem(ica_pem)
        .map_err(|e| Error::Tls(format!("invalid intermediate cert: {e}")))?;

    reqwest::Client::builder()
        .use_rustls_tls()
        .user_agent(USER_AGENT)
        .identity(identity)
        .add_root_certificate(ica)
        .danger_accept_invalid_certs(true)
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Tls(format!("failed to build mTLS client: {e}")))
}
