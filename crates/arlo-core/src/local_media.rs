// ── Hub-local media channel ──
//
// Direct access to recordings stored on the hub. The client holds an
// RSA key pair; the cloud signs it into a peer certificate bound to
// `{user}_{hub}`; the hub accepts mutual TLS with that certificate plus
// a short-lived hub token. Any hub-side failure wipes the stored
// credential so the next attempt starts from a fresh key pair.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, broadcast};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use arlo_api::models::{CertRequest, Recording};
use arlo_api::{ApiClient, HubEndpoint, LocalHubClient};

use crate::dispatch::{CommandDispatcher, Intent};
use crate::error::{CoreError, LocalChannelError, ProtocolError};
use crate::model::DomainEvent;
use crate::registry::DeviceRegistry;

const RSA_BITS: usize = 2048;

// Credential blob names.
pub const PRIVATE_KEY: &str = "private.pem";
pub const PUBLIC_KEY: &str = "public.pem";
pub const PEER_CERT: &str = "peer.crt";
pub const DEVICE_CERT: &str = "device.crt";
pub const ICA_CERT: &str = "ica.crt";
pub const COMBINED_CERT: &str = "combined.crt";
pub const APP_ID: &str = "app-id";

/// Everything a reset discards.
const KEY_MATERIAL: [&str; 6] = [PRIVATE_KEY, PUBLIC_KEY, PEER_CERT, DEVICE_CERT, ICA_CERT, COMBINED_CERT];

// ── Credential store ─────────────────────────────────────────────────

/// Persistence for the local-channel key material.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, name: &str) -> Result<Option<String>, CoreError>;
    async fn save(&self, name: &str, contents: &str) -> Result<(), CoreError>;
    /// Remove the key pair and certificates. The installation id stays.
    async fn remove_key_material(&self) -> Result<(), CoreError>;
}

/// One file per blob under a directory.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, name: &str) -> Result<Option<String>, CoreError> {
        match tokio::fs::read_to_string(self.dir.join(name)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("read", name, &e)),
        }
    }

    async fn save(&self, name: &str, contents: &str) -> Result<(), CoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error("create", &self.dir.display().to_string(), &e))?;
        tokio::fs::write(self.dir.join(name), contents)
            .await
            .map_err(|e| io_error("write", name, &e))
    }

    async fn remove_key_material(&self) -> Result<(), CoreError> {
        for name in KEY_MATERIAL {
            match tokio::fs::remove_file(self.dir.join(name)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error("remove", name, &e)),
            }
        }
        Ok(())
    }
}

fn io_error(op: &str, what: &str, err: &std::io::Error) -> CoreError {
    CoreError::Internal(format!("credential store: failed to {op} {what}: {err}"))
}

// ── Configuration ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LocalMediaConfig {
    /// Client id sent with the certificate request. Generated and
    /// persisted in the credential store when unset.
    pub app_id: Option<String>,
    /// How long a hub token is reused before a new one is requested.
    pub validity: Duration,
    /// Wait for the hub to report its local address.
    pub open_timeout: Duration,
    /// Per-request timeout against the hub.
    pub timeout: Duration,
}

impl Default for LocalMediaConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            validity: Duration::from_secs(300),
            open_timeout: Duration::from_secs(15),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Key material for the mutual-TLS handshake.
#[derive(Clone)]
pub struct LocalCredential {
    pub private_key: SecretString,
    pub peer_cert: String,
    pub ica_cert: String,
}

impl LocalCredential {
    /// Private key followed by the client certificate.
    pub fn identity_pem(&self) -> String {
        format!("{}\n{}", self.private_key.expose_secret().trim_end(), self.peer_cert)
    }
}

/// Builds the hub client for one endpoint and credential.
pub type HubConnector =
    dyn Fn(&HubEndpoint, &LocalCredential, Duration) -> Result<LocalHubClient, arlo_api::Error> + Send + Sync;

fn mtls_connector(
    endpoint: &HubEndpoint,
    credential: &LocalCredential,
    timeout: Duration,
) -> Result<LocalHubClient, arlo_api::Error> {
    LocalHubClient::new(
        endpoint,
        credential.identity_pem().as_bytes(),
        credential.ica_cert.as_bytes(),
        timeout,
    )
}

// ── LocalMediaChannel ────────────────────────────────────────────────

pub struct LocalMediaChannel {
    api: Arc<ApiClient>,
    registry: Arc<DeviceRegistry>,
    dispatcher: Arc<CommandDispatcher>,
    store: Arc<dyn CredentialStore>,
    config: LocalMediaConfig,
    events: broadcast::Sender<Arc<DomainEvent>>,
    connector: Box<HubConnector>,
    /// Open hub endpoint and when its token was issued.
    session: Mutex<Option<(HubEndpoint, Instant)>>,
}

impl LocalMediaChannel {
    pub fn new(
        api: Arc<ApiClient>,
        registry: Arc<DeviceRegistry>,
        dispatcher: Arc<CommandDispatcher>,
        store: Arc<dyn CredentialStore>,
        config: LocalMediaConfig,
        events: broadcast::Sender<Arc<DomainEvent>>,
    ) -> Self {
        Self {
            api,
            registry,
            dispatcher,
            store,
            config,
            events,
            connector: Box::new(mtls_connector),
            session: Mutex::new(None),
        }
    }

    /// Replace how the hub client is built (plain-HTTP test servers).
    pub fn with_connector(mut self, connector: Box<HubConnector>) -> Self {
        self.connector = connector;
        self
    }

    // ── Credential ───────────────────────────────────────────────────

    /// Load the stored credential, or issue a new one.
    ///
    /// A missing peer certificate triggers a certificate request; a
    /// missing key pair is generated first.
    pub async fn ensure_credential(&self) -> Result<LocalCredential, CoreError> {
        if let (Some(private_key), Some(peer_cert), Some(ica_cert)) = (
            self.store.load(PRIVATE_KEY).await?,
            self.store.load(PEER_CERT).await?,
            self.store.load(ICA_CERT).await?,
        ) {
            debug!("using stored local credential");
            return Ok(LocalCredential {
                private_key: SecretString::from(private_key),
                peer_cert,
                ica_cert,
            });
        }

        let (private_key, public_key) = match (
            self.store.load(PRIVATE_KEY).await?,
            self.store.load(PUBLIC_KEY).await?,
        ) {
            (Some(private), Some(public)) => (SecretString::from(private), public),
            _ => self.generate_key_pair().await?,
        };

        let hub_id = self.registry.hub_id().ok_or(ProtocolError::MissingHub)?;
        let user_id = self
            .registry
            .user_id()
            .ok_or(CoreError::NotLoggedIn)?;
        let request = CertRequest {
            uuid: self.app_id().await?,
            public_key: strip_armour(&public_key),
            unique_ids: vec![format!("{user_id}_{hub_id}")],
        };
        info!(hub = %hub_id, "requesting local certificates");
        let bundle = self.api.create_certificates(&request).await?;
        let issued = bundle.certs_data.into_iter().next().ok_or_else(|| {
            ProtocolError::UnparsableEnvelope("certificate response without certsData".into())
        })?;

        let peer_cert = wrap_certificate(&issued.peer_cert);
        let device_cert = wrap_certificate(&issued.device_cert);
        let ica_cert = wrap_certificate(&bundle.ica_cert);
        self.store.save(PEER_CERT, &peer_cert).await?;
        self.store.save(DEVICE_CERT, &device_cert).await?;
        self.store.save(ICA_CERT, &ica_cert).await?;
        self.store
            .save(COMBINED_CERT, &format!("{peer_cert}\n{ica_cert}"))
            .await?;

        Ok(LocalCredential {
            private_key,
            peer_cert,
            ica_cert,
        })
    }

    /// Drop the stored credential and the open hub session.
    pub async fn reset_credentials(&self) -> Result<(), CoreError> {
        warn!("resetting local credentials");
        *self.session.lock().await = None;
        self.store.remove_key_material().await
    }

    // ── Session ──────────────────────────────────────────────────────

    /// Hub address and token, reusing the current one while valid.
    ///
    /// Otherwise a new hub token is fetched and the hub is asked to open
    /// local storage; its address arrives over the push channel.
    pub async fn open_local_session(&self) -> Result<HubEndpoint, CoreError> {
        let mut session = self.session.lock().await;
        if let Some((endpoint, issued)) = session.as_ref() {
            if issued.elapsed() < self.config.validity {
                return Ok(endpoint.clone());
            }
            debug!("hub token aged out");
        }

        let hub = self.registry.hub().ok_or(ProtocolError::MissingHub)?;
        let token = self.api.ratls_token(hub.id.as_str()).await?;

        let mut rx = self.events.subscribe();
        self.dispatcher
            .notify(&hub, Intent::get("storage/ratls").with_action("open"))
            .await?;
        let (ip, port) = wait_for_open(&mut rx, self.config.open_timeout).await?;

        let endpoint = HubEndpoint {
            ip,
            port,
            token: SecretString::from(token),
        };
        info!(ip = %endpoint.ip, port = endpoint.port, "local storage session opened");
        *session = Some((endpoint.clone(), Instant::now()));
        Ok(endpoint)
    }

    // ── Media ────────────────────────────────────────────────────────

    /// Recordings stored on the hub between two dates, inclusive.
    pub async fn list_recordings(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Recording>, CoreError> {
        let client = self.client().await?;
        match client.list_recordings(from, to).await {
            Ok(recordings) => {
                debug!(count = recordings.len(), "local recordings listed");
                Ok(recordings)
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Download one recording to `destination`. Returns bytes written.
    pub async fn download(&self, path: &str, destination: &Path) -> Result<u64, CoreError> {
        let client = self.client().await?;
        match client.download(path, destination).await {
            Ok(written) => Ok(written),
            Err(arlo_api::Error::Io(e)) => Err(io_error("write", &destination.display().to_string(), &e)),
            Err(e) => Err(self.fail(e).await),
        }
    }

    // ── Private helpers ──────────────────────────────────────────────

    async fn client(&self) -> Result<LocalHubClient, CoreError> {
        let credential = self.ensure_credential().await?;
        let endpoint = self.open_local_session().await?;
        match (self.connector)(&endpoint, &credential, self.config.timeout) {
            Ok(client) => Ok(client),
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Reset the credential after a hub failure and classify it.
    async fn fail(&self, err: arlo_api::Error) -> CoreError {
        warn!(error = %err, "local media request failed");
        if let Err(reset) = self.reset_credentials().await {
            warn!(error = %reset, "credential reset failed");
        }
        if err.is_connection_refused() || err.is_timeout() {
            LocalChannelError::HubUnreachable(err.to_string()).into()
        } else {
            LocalChannelError::StaleCredential(err.to_string()).into()
        }
    }

    async fn generate_key_pair(&self) -> Result<(SecretString, String), CoreError> {
        info!("generating local key pair");
        let (private_pem, public_pem) = tokio::task::spawn_blocking(|| {
            let mut rng = rand::thread_rng();
            let private = RsaPrivateKey::new(&mut rng, RSA_BITS)?;
            let public = RsaPublicKey::from(&private);
            let private_pem = private.to_pkcs8_pem(LineEnding::LF)?.as_str().to_owned();
            let public_pem = public.to_public_key_pem(LineEnding::LF)?;
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>((private_pem, public_pem))
        })
        .await
        .map_err(|e| CoreError::Internal(format!("key generation task failed: {e}")))?
        .map_err(|e| CoreError::Internal(format!("key generation failed: {e}")))?;

        self.store.save(PRIVATE_KEY, &private_pem).await?;
        self.store.save(PUBLIC_KEY, &public_pem).await?;
        Ok((SecretString::from(private_pem), public_pem))
    }

    async fn app_id(&self) -> Result<String, CoreError> {
        if let Some(id) = &self.config.app_id {
            return Ok(id.clone());
        }
        if let Some(id) = self.store.load(APP_ID).await? {
            return Ok(id.trim().to_owned());
        }
        let id = uuid::Uuid::new_v4().to_string().to_uppercase();
        self.store.save(APP_ID, &id).await?;
        Ok(id)
    }
}

async fn wait_for_open(
    rx: &mut broadcast::Receiver<Arc<DomainEvent>>,
    timeout: Duration,
) -> Result<(String, u16), CoreError> {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let DomainEvent::LocalStorageOpened { ip, port } = event.as_ref() {
                        return Ok((ip.clone(), *port));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => debug!(skipped = n, "event receiver lagged"),
                Err(broadcast::error::RecvError::Closed) => return Err(CoreError::Disconnected),
            }
        }
    };
    tokio::time::timeout(timeout, wait).await.map_err(|_| {
        CoreError::from(LocalChannelError::HubUnreachable(format!(
            "hub did not open local storage within {}s",
            timeout.as_secs()
        )))
    })?
}

/// Base64 body of a PEM public key, on one line.
fn strip_armour(pem: &str) -> String {
    pem.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("-----"))
        .collect()
}

/// Wrap a bare base64 certificate body in PEM armour.
fn wrap_certificate(body: &str) -> String {
    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for chunk in compact.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(chunk));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}
