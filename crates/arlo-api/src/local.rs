// Hub-local storage client
//
// Talks directly to the hub over mutual TLS once the cloud has issued
// certificates and a short-lived hub token. Recordings are listed by date
// range and downloaded by path.

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{Recording, RecordingList};
use crate::transport::build_mtls_client;

/// Material needed to reach one hub's local storage API.
#[derive(Debug, Clone)]
pub struct HubEndpoint {
    pub ip: String,
    pub port: u16,
    pub token: SecretString,
}

/// mTLS client bound to one hub endpoint.
pub struct LocalHubClient {
    http: reqwest::Client,
    base_url: Url,
    token: SecretString,
}

impl LocalHubClient {
    /// Build a client from PEM identity material.
    ///
    /// `identity_pem` is the private key followed by the peer and device
    /// certificates; `ica_pem` is the issuing intermediate.
    pub fn new(
        endpoint: &HubEndpoint,
        identity_pem: &[u8],
        ica_pem: &[u8],
        timeout: Duration,
    ) -> Result<Self, Error> {
        let http = build_mtls_client(identity_pem, ica_pem, timeout)?;
        Self::with_client(http, endpoint)
    }

    /// Use a pre-built client (plain HTTP test servers).
    pub fn with_client(http: reqwest::Client, endpoint: &HubEndpoint) -> Result<Self, Error> {
        let base_url = Url::parse(&format!("https://{}:{}/hmsls/", endpoint.ip, endpoint.port))?;
        Ok(Self {
            http,
            base_url,
            token: endpoint.token.clone(),
        })
    }

    /// Override the scheme-qualified base (tests run over plain HTTP).
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    /// List recordings between two dates, inclusive.
    pub async fn list_recordings(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Recording>, Error> {
        let path = format!("list/{}/{}", from.format("%Y%m%d"), to.format("%Y%m%d"));
        let url = self.base_url.join(&path)?;
        debug!("GET {}", url);

        let resp = self.authorized(self.http.get(url)).send().await?;
        let resp = check(resp).await?;
        let list: RecordingList = resp.json().await?;

        if !list.success {
            return Err(Error::CloudApi {
                message: "hub refused recording list".into(),
            });
        }
        Ok(list.data)
    }

    /// Stream one recording to `destination`. Returns bytes written.
    pub async fn download(&self, path: &str, destination: &Path) -> Result<u64, Error> {
        let url = self.base_url.join(&format!("download/{}", path.trim_start_matches('/')))?;
        debug!("GET {}", url);

        let resp = self.authorized(self.http.get(url)).send().await?;
        let resp = check(resp).await?;

        let written = match write_body(resp, destination).await {
            Ok(written) => written,
            Err(e) => {
                // Never leave a truncated recording behind.
                if let Err(rm) = tokio::fs::remove_file(destination).await {
                    debug!(error = %rm, "partial download not removed");
                }
                return Err(e);
            }
        };

        debug!(written, destination = %destination.display(), "download complete");
        Ok(written)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(self.token.expose_secret())
    }
}

async fn write_body(resp: reqwest::Response, destination: &Path) -> Result<u64, Error> {
    let mut file = tokio::fs::File::create(destination).await?;
    let mut body = resp.bytes_stream();
    let mut written = 0_u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written = written.saturating_add(u64::try_from(chunk.len()).unwrap_or(u64::MAX));
    }
    file.flush().await?;
    Ok(written)
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(Error::Authentication {
            message: format!("hub rejected token (HTTP {})", status.as_u16()),
        });
    }
    Err(Error::Status {
        status: status.as_u16(),
        preview: body.chars().take(200).collect(),
    })
}
