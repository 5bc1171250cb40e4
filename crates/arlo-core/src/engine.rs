// ── Engine facade ──
//
// Full lifecycle of one authenticated Arlo client: login, the push
// stream and its bridge into the registry, discovery, keep-alive and
// refresh timers, logout and re-login. Commands and local media are
// reached through the dispatcher and channel it owns.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use arlo_api::event_stream::EVENT_CHANNEL_CAPACITY;
use arlo_api::{ApiClient, Endpoints, Envelope, EventStreamHandle, ReconnectConfig, StreamEvent, TransportConfig};

use crate::dispatch::CommandDispatcher;
use crate::error::{CoreError, ProtocolError};
use crate::local_media::{CredentialStore, FileCredentialStore, HubConnector, LocalMediaChannel, LocalMediaConfig};
use crate::mailbox::OneTimeCodeSource;
use crate::model::{Device, DomainEvent, Session, SessionState};
use crate::registry::DeviceRegistry;
use crate::session::{AuthFlow, AuthSession, Credentials};
use crate::timers::TimerSet;

const EVENT_CHANNEL_SIZE: usize = 256;
const KEEPALIVE_KEY: &str = "keepalive";

// ── ConnectionState ──────────────────────────────────────────────────

/// Push-channel state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed,
}

/// Progress of the first device discovery after connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryStatus {
    Pending,
    Ready { count: usize },
    Failed { reason: String },
}

// ── Configuration ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub endpoints: Endpoints,
    pub transport: TransportConfig,
    pub credentials: Credentials,
    pub flow: AuthFlow,
    pub reconnect: ReconnectConfig,
    /// Hub subscription re-assert period.
    pub keepalive: Duration,
    /// Periodic discovery and property refresh, if set.
    pub refresh_interval: Option<Duration>,
    /// Per-device property polling once a subscription is confirmed.
    pub poll_interval: Option<Duration>,
    /// Wait after a remote logout before logging in again.
    pub relogin_delay: Duration,
    /// Where local-media key material is stored.
    pub credential_dir: PathBuf,
    pub local_media: LocalMediaConfig,
}

impl EngineConfig {
    pub fn new(credentials: Credentials, flow: AuthFlow) -> Self {
        Self {
            endpoints: Endpoints::default(),
            transport: TransportConfig::default(),
            credentials,
            flow,
            reconnect: ReconnectConfig::default(),
            keepalive: Duration::from_secs(20),
            refresh_interval: None,
            poll_interval: None,
            relogin_delay: Duration::from_secs(300),
            credential_dir: PathBuf::from("certs"),
            local_media: LocalMediaConfig::default(),
        }
    }
}

/// Collaborators the engine does not build itself.
#[derive(Default)]
pub struct EngineDeps {
    /// Required for the email flow.
    pub code_source: Option<Arc<dyn OneTimeCodeSource>>,
    /// Defaults to a directory store at `credential_dir`.
    pub credential_store: Option<Arc<dyn CredentialStore>>,
    /// Defaults to a mutual-TLS client.
    pub hub_connector: Option<Box<HubConnector>>,
}

// ── Engine ───────────────────────────────────────────────────────────

/// Cheaply cloneable handle to one running client.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    api: Arc<ApiClient>,
    session: Arc<AuthSession>,
    registry: Arc<DeviceRegistry>,
    dispatcher: Arc<CommandDispatcher>,
    local: LocalMediaChannel,
    connection_state: watch::Sender<ConnectionState>,
    discovery: watch::Sender<DiscoveryStatus>,
    event_tx: broadcast::Sender<Arc<DomainEvent>>,
    cancel: CancellationToken,
    timers: TimerSet,
    stream: Mutex<Option<EventStreamHandle>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    /// Discovery has run on this login.
    discovered: AtomicBool,
    /// Consecutive stream drops since the last `connected` status.
    drops: AtomicU32,
}

impl Engine {
    /// Build an engine. Does NOT log in; call [`login()`](Self::login).
    pub fn new(config: EngineConfig) -> Result<Self, CoreError> {
        Self::with_deps(config, EngineDeps::default())
    }

    pub fn with_deps(config: EngineConfig, deps: EngineDeps) -> Result<Self, CoreError> {
        let api = Arc::new(ApiClient::new(config.endpoints.clone(), &config.transport)?);
        let session = Arc::new(AuthSession::new(
            Arc::clone(&api),
            config.flow.clone(),
            deps.code_source,
        ));
        let registry = Arc::new(DeviceRegistry::new());
        let (connection_state, connection_rx) = watch::channel(ConnectionState::Disconnected);
        let (discovery, _) = watch::channel(DiscoveryStatus::Pending);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::clone(&api),
            Arc::clone(&registry),
            Arc::clone(&session),
            connection_rx,
        ));

        let store = deps
            .credential_store
            .unwrap_or_else(|| Arc::new(FileCredentialStore::new(config.credential_dir.clone())));
        let mut local = LocalMediaChannel::new(
            Arc::clone(&api),
            Arc::clone(&registry),
            Arc::clone(&dispatcher),
            store,
            config.local_media.clone(),
            event_tx.clone(),
        );
        if let Some(connector) = deps.hub_connector {
            local = local.with_connector(connector);
        }

        let cancel = CancellationToken::new();
        let timers = TimerSet::new(cancel.child_token());

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                api,
                session,
                registry,
                dispatcher,
                local,
                connection_state,
                discovery,
                event_tx,
                cancel,
                timers,
                stream: Mutex::new(None),
                task_handles: Mutex::new(Vec::new()),
                discovered: AtomicBool::new(false),
                drops: AtomicU32::new(0),
            }),
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Log in and open the push stream.
    ///
    /// Returns once the stream task is spawned; discovery follows the
    /// first `connected` status. See [`wait_until_ready`](Self::wait_until_ready).
    pub async fn login(&self) -> Result<Session, CoreError> {
        let session = self.inner.session.login(&self.inner.config.credentials).await?;
        self.emit(DomainEvent::LoggedIn {
            user_id: session.identity.user_id.clone(),
            serial_number: session.identity.serial_number.clone(),
        });
        self.arm_expiry(&session);
        self.start_stream().await;
        Ok(session)
    }

    /// Log out, stop the stream and cancel every timer.
    pub async fn logout(&self) -> Result<(), CoreError> {
        self.teardown().await;
        let result = self.inner.session.logout().await;
        self.emit(DomainEvent::LoggedOut { remote: false });
        self.join_tasks().await;
        result
    }

    /// Stop everything without a logout request. The engine is not
    /// reusable afterwards.
    pub async fn shutdown(&self) {
        self.teardown().await;
        self.inner.cancel.cancel();
        self.join_tasks().await;
        debug!("engine shut down");
    }

    /// Wait until the first discovery finishes.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<usize, CoreError> {
        let mut rx = self.inner.discovery.subscribe();
        let wait = async {
            loop {
                match &*rx.borrow_and_update() {
                    DiscoveryStatus::Ready { count } => return Ok(*count),
                    DiscoveryStatus::Failed { reason } => {
                        return Err(CoreError::Rejected {
                            message: format!("device discovery failed: {reason}"),
                        });
                    }
                    DiscoveryStatus::Pending => {}
                }
                if rx.changed().await.is_err() {
                    return Err(CoreError::Disconnected);
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| CoreError::from(crate::error::TransportError::Timeout))?
    }

    /// Rediscover devices and ask every gateway for fresh state.
    pub async fn refresh(&self) -> Result<usize, CoreError> {
        let records = self.inner.api.list_devices().await?;
        let events = self.inner.registry.replace_all(records)?;
        let count = self.inner.registry.len();
        for event in events {
            self.emit(event);
        }

        self.subscribe_gateways().await;
        for gateway in self.inner.registry.gateways() {
            if let Err(e) = self.inner.dispatcher.request_device_refresh(&gateway).await {
                warn!(device = %gateway.id, error = %e, "refresh request failed");
            }
        }
        if let Err(e) = self.armed_status().await {
            warn!(error = %e, "could not read armed status");
        }
        self.emit(DomainEvent::PropertiesRefreshed);
        Ok(count)
    }

    /// Read the hub's active mode from the automation endpoint and apply it.
    pub async fn armed_status(&self) -> Result<Option<bool>, CoreError> {
        let hub_id = self.inner.registry.hub_id().ok_or(ProtocolError::MissingHub)?;
        let automations = self.inner.api.active_automations().await?;
        let mode = automations
            .into_iter()
            .find(|a| a.gateway_id == hub_id.as_str())
            .and_then(|a| a.active_modes.into_iter().next());
        let Some(mode) = mode else {
            debug!(hub = %hub_id, "no active mode reported");
            return Ok(None);
        };
        match self.inner.registry.apply_mode(hub_id.as_str(), &mode) {
            Some(event) => {
                let armed = matches!(event, DomainEvent::Mode { armed, .. } if armed);
                self.emit(event);
                Ok(Some(armed))
            }
            None => Ok(None),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.inner.registry
    }

    pub fn commands(&self) -> &Arc<CommandDispatcher> {
        &self.inner.dispatcher
    }

    pub fn local_media(&self) -> &LocalMediaChannel {
        &self.inner.local
    }

    pub fn session(&self) -> &Arc<AuthSession> {
        &self.inner.session
    }

    pub fn session_state(&self) -> SessionState {
        self.inner.session.state()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.inner.event_tx.subscribe()
    }

    pub fn devices_snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.inner.registry.snapshot()
    }

    // ── Stream ───────────────────────────────────────────────────────

    async fn start_stream(&self) {
        let mut slot = self.inner.stream.lock().await;
        if slot.as_ref().is_some_and(|h| !h.is_shut_down()) {
            debug!("event stream already running");
            return;
        }

        self.inner.discovered.store(false, Ordering::SeqCst);
        self.inner.drops.store(0, Ordering::SeqCst);
        self.inner.discovery.send_replace(DiscoveryStatus::Pending);
        let _ = self.inner.connection_state.send(ConnectionState::Connecting);

        let stream_cancel = self.inner.cancel.child_token();
        let (stream_tx, stream_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let handle = EventStreamHandle::connect(
            Arc::clone(&self.inner.api),
            self.inner.config.reconnect.clone(),
            stream_cancel.clone(),
            stream_tx,
        );
        *slot = Some(handle);
        drop(slot);

        let engine = self.clone();
        let bridge = tokio::spawn(bridge_task(engine, stream_rx, stream_cancel));
        let mut handles = self.inner.task_handles.lock().await;
        handles.retain(|h| !h.is_finished());
        handles.push(bridge);
        info!("event stream spawned");
    }

    async fn handle_envelope(&self, envelope: &Envelope) {
        for event in self.inner.registry.apply_event(envelope) {
            let event = Arc::new(event);
            let _ = self.inner.event_tx.send(Arc::clone(&event));
            self.react(&event).await;
        }
    }

    async fn react(&self, event: &DomainEvent) {
        match event {
            DomainEvent::Connected => self.on_connected().await,
            DomainEvent::LoggedOut { remote: true } => {
                warn!("logged out by another session");
                self.teardown().await;
                self.inner.session.expire();
                self.schedule_relogin();
            }
            DomainEvent::Subscribed { id } => {
                if let Some(period) = self.inner.config.poll_interval {
                    self.start_polling(id.as_str(), period);
                }
            }
            DomainEvent::MediaUpload {
                id,
                stream_ended: true,
                ..
            }
            | DomainEvent::StreamStateChanged { id, active: false } => {
                self.inner.dispatcher.forget_stream(id.as_str());
            }
            _ => {}
        }
    }

    async fn on_connected(&self) {
        let _ = self.inner.connection_state.send(ConnectionState::Connected);
        self.inner.drops.store(0, Ordering::SeqCst);

        if self.inner.discovered.swap(true, Ordering::SeqCst) {
            info!("event stream reconnected, resubscribing");
            self.subscribe_gateways().await;
            return;
        }

        match self.refresh().await {
            Ok(count) => {
                info!(count, "devices discovered");
                self.inner.discovery.send_replace(DiscoveryStatus::Ready { count });
            }
            Err(e) => {
                let fatal = matches!(e, CoreError::Protocol(ProtocolError::MissingHub));
                warn!(error = %e, fatal, "device discovery failed");
                self.emit(DomainEvent::DiscoveryFailed { reason: e.to_string() });
                self.inner
                    .discovery
                    .send_replace(DiscoveryStatus::Failed { reason: e.to_string() });
                if fatal {
                    self.teardown().await;
                    let _ = self.inner.connection_state.send(ConnectionState::Failed);
                }
                return;
            }
        }

        if let Some(period) = self.inner.config.refresh_interval {
            let engine = self.clone();
            self.inner.timers.spawn_interval(period, move || {
                let engine = engine.clone();
                async move {
                    if let Err(e) = engine.refresh().await {
                        warn!(error = %e, "periodic refresh failed");
                    }
                }
            });
        }
    }

    fn on_stream_closed(&self, reason: &str) {
        let attempt = self.inner.drops.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.timers.cancel_key(KEEPALIVE_KEY);
        let _ = self
            .inner
            .connection_state
            .send(ConnectionState::Reconnecting { attempt });
        self.emit(DomainEvent::ConnectionLost {
            reason: reason.to_owned(),
        });
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Subscribe the hub and every Q camera once, then (re)start the
    /// hub keep-alive chain.
    async fn subscribe_gateways(&self) {
        for gateway in self.inner.registry.gateways() {
            if let Err(e) = self.inner.dispatcher.subscribe_device(&gateway).await {
                warn!(device = %gateway.id, error = %e, "subscribe failed");
            }
        }

        let Some(hub) = self.inner.registry.hub() else {
            return;
        };
        let dispatcher = Arc::clone(&self.inner.dispatcher);
        let registry = Arc::clone(&self.inner.registry);
        let hub_id = hub.id.clone();
        self.inner
            .timers
            .spawn_keyed_interval(KEEPALIVE_KEY, self.inner.config.keepalive, move || {
                let dispatcher = Arc::clone(&dispatcher);
                let hub = registry.get(hub_id.as_str());
                async move {
                    let Some(hub) = hub else { return };
                    if let Err(e) = dispatcher.subscribe_device(&hub).await {
                        debug!(error = %e, "keep-alive subscribe failed");
                    }
                }
            });
    }

    fn start_polling(&self, device_id: &str, period: Duration) {
        let key = format!("poll:{device_id}");
        if self.inner.timers.has_key(&key) {
            return;
        }
        debug!(device = device_id, "starting property polling");
        let dispatcher = Arc::clone(&self.inner.dispatcher);
        let registry = Arc::clone(&self.inner.registry);
        let id = device_id.to_owned();
        self.inner.timers.spawn_keyed_interval(&key, period, move || {
            let dispatcher = Arc::clone(&dispatcher);
            let device = registry.get(&id);
            async move {
                let Some(device) = device else { return };
                if let Err(e) = dispatcher.request_device_refresh(&device).await {
                    debug!(device = %device.id, error = %e, "property poll failed");
                }
            }
        });
    }

    // ── Timers ───────────────────────────────────────────────────────

    fn arm_expiry(&self, session: &Session) {
        let Some(expiry) = session.token_expiry else {
            return;
        };
        let delay = (expiry - chrono::Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(secs = delay.as_secs(), "session expiry armed");
        let engine = self.clone();
        self.inner.timers.spawn_after(delay, async move {
            info!("session token lifetime elapsed");
            engine.teardown().await;
            engine.inner.session.expire();
            engine.emit(DomainEvent::LoggedOut { remote: false });
        });
    }

    fn schedule_relogin(&self) {
        let delay = self.inner.config.relogin_delay;
        info!(secs = delay.as_secs(), "re-login scheduled");
        let engine = self.clone();
        self.inner.timers.spawn_after(delay, async move {
            if let Err(e) = engine.login().await {
                warn!(error = %e, "re-login failed");
            }
        });
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Stop the stream and every timer; forget per-session state.
    async fn teardown(&self) {
        self.inner.timers.clear();
        if let Some(handle) = self.inner.stream.lock().await.take() {
            handle.shutdown();
        }
        self.inner.dispatcher.forget_all_streams();
        self.inner.discovered.store(false, Ordering::SeqCst);
        let _ = self.inner.connection_state.send(ConnectionState::Disconnected);
        debug!("engine torn down");
    }

    async fn join_tasks(&self) {
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }

    fn emit(&self, event: DomainEvent) {
        let _ = self.inner.event_tx.send(Arc::new(event));
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Stream events → registry → domain events → broadcast.
async fn bridge_task(engine: Engine, mut rx: broadcast::Receiver<StreamEvent>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = rx.recv() => match result {
                Ok(StreamEvent::Opened) => {
                    let _ = engine.inner.connection_state.send_if_modified(|state| {
                        if matches!(state, ConnectionState::Reconnecting { .. }) {
                            *state = ConnectionState::Connecting;
                            true
                        } else {
                            false
                        }
                    });
                }
                Ok(StreamEvent::Envelope(envelope)) => engine.handle_envelope(&envelope).await,
                Ok(StreamEvent::Closed { reason }) => engine.on_stream_closed(&reason),
                Ok(StreamEvent::Exhausted) => {
                    warn!("event stream gave up");
                    engine.inner.timers.cancel_key(KEEPALIVE_KEY);
                    let _ = engine.inner.connection_state.send(ConnectionState::Failed);
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "stream bridge: receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    debug!("stream bridge exiting");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn config() -> EngineConfig {
        EngineConfig::new(
            Credentials {
                email: "a@b.c".into(),
                password: SecretString::from("pw".to_string()),
            },
            AuthFlow::Push {
                mobile_payload: SecretString::from("payload".to_string()),
                saved_token: None,
            },
        )
    }

    #[test]
    fn defaults_follow_observed_timings() {
        let config = config();
        assert_eq!(config.keepalive, Duration::from_secs(20));
        assert_eq!(config.relogin_delay, Duration::from_secs(300));
        assert_eq!(config.local_media.validity, Duration::from_secs(300));
        assert!(config.refresh_interval.is_none());
    }

    #[tokio::test]
    async fn new_engine_is_idle() {
        let engine = Engine::new(config()).unwrap();
        assert_eq!(*engine.connection_state().borrow(), ConnectionState::Disconnected);
        assert_eq!(engine.session_state(), SessionState::Unauthenticated);
        assert!(engine.devices_snapshot().is_empty());
    }

    #[tokio::test]
    async fn commands_refused_before_connect() {
        let engine = Engine::new(config()).unwrap();
        let err = engine.commands().siren_on("CAM1").await.unwrap_err();
        assert!(matches!(err, CoreError::Disconnected));
    }
}
