// ── Command dispatch ──
//
// Builds notify/stream/snapshot requests for a device and sends them.
// A successful result means the cloud accepted the request; the device's
// acknowledgement arrives later as a push envelope. Sending is refused
// outright while the event stream is not connected.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use arlo_api::ApiClient;
use arlo_api::models::{ActivityRequest, NotifyBody};

use crate::engine::ConnectionState;
use crate::error::{CoreError, ProtocolError};
use crate::model::{Device, DeviceId, DeviceType};
use crate::registry::{ARMED_MODE, DISARMED_MODE, DeviceRegistry};
use crate::session::AuthSession;

const SIREN_DURATION_SECS: u32 = 300;
const SIREN_VOLUME: u32 = 8;

// ── Transaction ids ──────────────────────────────────────────────────

/// Fresh transaction id: `iOS!{8 hex}.{6 hex}!{unix millis}`.
///
/// Used for traceability only; replies are matched by resource and device.
pub fn transaction_id() -> String {
    let mut rng = rand::thread_rng();
    let a: u32 = rng.r#gen();
    let b: u32 = rng.gen_range(0..=0x00FF_FFFF);
    format!("iOS!{a:08x}.{b:06x}!{}", Utc::now().timestamp_millis())
}

// ── Intent / result ──────────────────────────────────────────────────

/// What a notify asks the device to do. Identity and transaction fields
/// are added at send time.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub resource: String,
    pub publish_response: bool,
    pub properties: Option<Value>,
}

impl Intent {
    /// Query a resource; the answer arrives as an `is` envelope.
    pub fn get(resource: impl Into<String>) -> Self {
        Self {
            action: "get".into(),
            resource: resource.into(),
            publish_response: false,
            properties: None,
        }
    }

    /// Change a resource and ask for the change to be published.
    pub fn set(resource: impl Into<String>, properties: Value) -> Self {
        Self {
            action: "set".into(),
            resource: resource.into(),
            publish_response: true,
            properties: Some(properties),
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    pub fn with_publish(mut self, publish: bool) -> Self {
        self.publish_response = publish;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandResult {
    /// The cloud accepted the request.
    Sent,
    /// Nothing was sent.
    Skipped { reason: String },
    /// A live stream is available at this URL.
    StreamUrl { url: String },
}

// ── CommandDispatcher ────────────────────────────────────────────────

pub struct CommandDispatcher {
    api: Arc<ApiClient>,
    registry: Arc<DeviceRegistry>,
    session: Arc<AuthSession>,
    connection: watch::Receiver<ConnectionState>,
    /// Stream URLs handed out per camera, until the stream ends.
    streams: DashMap<DeviceId, String>,
}

impl CommandDispatcher {
    pub fn new(
        api: Arc<ApiClient>,
        registry: Arc<DeviceRegistry>,
        session: Arc<AuthSession>,
        connection: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            api,
            registry,
            session,
            connection,
            streams: DashMap::new(),
        }
    }

    // ── Raw notify ───────────────────────────────────────────────────

    /// Send one intent to `target`.
    pub async fn notify(&self, target: &Device, intent: Intent) -> Result<CommandResult, CoreError> {
        self.ensure_connected()?;
        let body = self.body(target, intent)?;
        debug!(device = %target.id, resource = %body.resource, trans_id = %body.trans_id, "notify");
        self.send(target, &body).await
    }

    /// Send several intents to `target` in one request.
    pub async fn notify_batch(&self, target: &Device, intents: Vec<Intent>) -> Result<CommandResult, CoreError> {
        self.ensure_connected()?;
        let bodies = intents
            .into_iter()
            .map(|intent| self.body(target, intent))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(device = %target.id, count = bodies.len(), "notify batch");
        self.send(target, &bodies).await
    }

    // ── Subscriptions and refresh ────────────────────────────────────

    /// Register interest in `device`'s push events.
    pub async fn subscribe_device(&self, device: &Device) -> Result<CommandResult, CoreError> {
        let user_id = self.user_id()?;
        let intent = Intent::set(
            format!("subscriptions/{user_id}"),
            json!({ "devices": [device.id.as_str()] }),
        )
        .with_publish(false);
        self.notify(device, intent).await
    }

    /// Ask a gateway to push its current state.
    ///
    /// Hub: `devices`, `storage` and the siren of every plain camera.
    /// Q camera: `basestation`, `cameras` and `wifi/ap`. A plain camera
    /// is refreshed through its hub.
    pub async fn request_device_refresh(&self, device: &Device) -> Result<CommandResult, CoreError> {
        let target = self.gateway(device)?;
        let intents = if target.device_type == DeviceType::Hub {
            let mut intents = vec![Intent::get("devices"), Intent::get("storage")];
            intents.extend(
                self.registry
                    .devices_of_type(DeviceType::Camera)
                    .iter()
                    .map(|cam| Intent::get(format!("siren/{}", cam.id))),
            );
            intents
        } else {
            vec![Intent::get("basestation"), Intent::get("cameras"), Intent::get("wifi/ap")]
        };
        self.notify_batch(&target, intents).await
    }

    // ── Modes ────────────────────────────────────────────────────────

    /// Arm the hub, or the given self-hosted camera.
    pub async fn arm(&self, device_id: Option<&str>) -> Result<CommandResult, CoreError> {
        self.set_mode(device_id, ARMED_MODE).await
    }

    pub async fn disarm(&self, device_id: Option<&str>) -> Result<CommandResult, CoreError> {
        self.set_mode(device_id, DISARMED_MODE).await
    }

    async fn set_mode(&self, device_id: Option<&str>, mode: &str) -> Result<CommandResult, CoreError> {
        self.ensure_connected()?;
        let target = match device_id {
            Some(id) => self.device(id)?,
            None => self.registry.hub().ok_or(ProtocolError::MissingHub)?,
        };
        info!(device = %target.id, mode, "setting mode");
        self.notify(&target, Intent::set("modes", json!({ "active": mode })))
            .await
    }

    // ── Camera controls ──────────────────────────────────────────────

    pub async fn set_privacy(&self, camera_id: &str, active: bool) -> Result<CommandResult, CoreError> {
        self.ensure_connected()?;
        let camera = self.camera(camera_id)?;
        let target = self.gateway(&camera)?;
        let intent = Intent::set(
            format!("cameras/{}", camera.id),
            json!({ "privacyActive": active }),
        );
        let result = self.notify(&target, intent).await?;
        self.follow_up_refresh(&target).await;
        Ok(result)
    }

    pub async fn siren_on(&self, camera_id: &str) -> Result<CommandResult, CoreError> {
        self.set_siren(
            camera_id,
            json!({
                "sirenState": "on",
                "duration": SIREN_DURATION_SECS,
                "volume": SIREN_VOLUME,
                "pattern": "alarm",
            }),
        )
        .await
    }

    pub async fn siren_off(&self, camera_id: &str) -> Result<CommandResult, CoreError> {
        self.set_siren(camera_id, json!({ "sirenState": "off" })).await
    }

    async fn set_siren(&self, camera_id: &str, properties: Value) -> Result<CommandResult, CoreError> {
        self.ensure_connected()?;
        let camera = self.camera(camera_id)?;
        let target = self.gateway(&camera)?;
        let result = self
            .notify(&target, Intent::set(format!("siren/{}", camera.id), properties))
            .await?;
        self.follow_up_refresh(&target).await;
        Ok(result)
    }

    // ── Streams and snapshots ────────────────────────────────────────

    /// Start a user stream and return its URL (`rtsps://`).
    ///
    /// An already-issued URL is returned without a request. Refused
    /// while privacy mode is on.
    pub async fn start_stream(&self, camera_id: &str) -> Result<CommandResult, CoreError> {
        if let Some(url) = self.stream_url(camera_id) {
            debug!(device = camera_id, "stream already active");
            return Ok(CommandResult::StreamUrl { url });
        }

        self.ensure_connected()?;
        let camera = self.camera(camera_id)?;
        if camera.privacy_active() == Some(true) {
            return Ok(CommandResult::Skipped {
                reason: "privacy mode is active".into(),
            });
        }

        let target = self.gateway(&camera)?;
        let request = self.activity(&camera, &target, "startUserStream")?;
        let url = self
            .api
            .start_stream(&request, target.xcloud_id.as_deref())
            .await
            .inspect_err(|e| warn!(device = camera_id, error = %e, "start stream failed"))?;

        let url = match url.strip_prefix("rtsp://") {
            Some(rest) => format!("rtsps://{rest}"),
            None => url,
        };
        info!(device = camera_id, "stream started");
        self.streams.insert(camera.id.clone(), url.clone());
        Ok(CommandResult::StreamUrl { url })
    }

    /// Stop a user stream. The cached URL is dropped even if the request fails.
    pub async fn stop_stream(&self, camera_id: &str) -> Result<CommandResult, CoreError> {
        self.ensure_connected()?;
        let camera = self.camera(camera_id)?;
        let target = self.gateway(&camera)?;
        let request = self.activity(&camera, &target, "stopUserStream")?;

        self.forget_stream(camera_id);
        self.api
            .stop_stream(&request, target.xcloud_id.as_deref())
            .await
            .inspect_err(|e| warn!(device = camera_id, error = %e, "stop stream failed"))?;
        Ok(CommandResult::Sent)
    }

    /// Request a full-frame snapshot; the URL arrives as an event.
    ///
    /// Skipped unless the camera has reported privacy mode off.
    pub async fn take_snapshot(&self, camera_id: &str) -> Result<CommandResult, CoreError> {
        self.ensure_connected()?;
        let camera = self.camera(camera_id)?;
        if camera.privacy_active() != Some(false) {
            return Ok(CommandResult::Skipped {
                reason: "privacy mode is active or unknown".into(),
            });
        }

        let target = self.gateway(&camera)?;
        let mut request = self.activity(&camera, &target, "fullFrameSnapshot")?;
        request.properties = json!({ "activityState": "fullFrameSnapshot" });
        self.api
            .full_frame_snapshot(&request, camera.xcloud_id.as_deref())
            .await
            .inspect_err(|e| warn!(device = camera_id, error = %e, "snapshot request failed"))?;
        Ok(CommandResult::Sent)
    }

    pub fn stream_url(&self, camera_id: &str) -> Option<String> {
        self.streams.get(camera_id).map(|r| r.value().clone())
    }

    /// Drop a cached stream URL (the stream ended).
    pub fn forget_stream(&self, camera_id: &str) {
        if self.streams.remove(camera_id).is_some() {
            debug!(device = camera_id, "stream URL dropped");
        }
    }

    pub fn forget_all_streams(&self) {
        self.streams.clear();
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn ensure_connected(&self) -> Result<(), CoreError> {
        if *self.connection.borrow() == ConnectionState::Connected {
            Ok(())
        } else {
            debug!("command refused: not connected");
            Err(CoreError::Disconnected)
        }
    }

    fn user_id(&self) -> Result<String, CoreError> {
        self.session
            .identity()
            .map(|identity| identity.user_id)
            .or_else(|| self.registry.user_id())
            .ok_or(CoreError::NotLoggedIn)
    }

    fn device(&self, id: &str) -> Result<Arc<Device>, CoreError> {
        self.registry
            .get(id)
            .ok_or_else(|| CoreError::DeviceNotFound(id.to_owned()))
    }

    fn camera(&self, id: &str) -> Result<Arc<Device>, CoreError> {
        let device = self.device(id)?;
        if device.device_type.is_camera() {
            Ok(device)
        } else {
            Err(CoreError::DeviceNotFound(format!("{id} is not a camera")))
        }
    }

    fn gateway(&self, device: &Device) -> Result<Arc<Device>, CoreError> {
        Ok(self
            .registry
            .gateway_for(device)
            .ok_or(ProtocolError::MissingHub)?)
    }

    fn body(&self, target: &Device, intent: Intent) -> Result<NotifyBody, CoreError> {
        Ok(NotifyBody {
            from: self.user_id()?,
            to: target.id.to_string(),
            action: intent.action,
            resource: intent.resource,
            trans_id: transaction_id(),
            publish_response: intent.publish_response,
            properties: intent.properties,
        })
    }

    fn activity(&self, camera: &Device, target: &Device, state: &str) -> Result<ActivityRequest, CoreError> {
        Ok(ActivityRequest {
            from: self.user_id()?,
            to: target.id.to_string(),
            action: "set".into(),
            resource: format!("cameras/{}", camera.id),
            trans_id: transaction_id(),
            publish_response: true,
            properties: json!({
                "smartZoom": {
                    "topleftx": 0,
                    "toplefty": 0,
                    "bottomrightx": 3840,
                    "bottomrighty": 2160,
                },
                "activityState": state,
                "cameraId": camera.id.as_str(),
            }),
        })
    }

    async fn send(&self, target: &Device, body: &(impl Serialize + Sync)) -> Result<CommandResult, CoreError> {
        match self
            .api
            .notify(target.id.as_str(), target.xcloud_id.as_deref(), body)
            .await
        {
            Ok(()) => Ok(CommandResult::Sent),
            Err(e) => {
                warn!(device = %target.id, error = %e, "notify failed");
                Err(e.into())
            }
        }
    }

    /// State changes are confirmed by a refresh; its failure is not the
    /// command's failure.
    async fn follow_up_refresh(&self, target: &Device) {
        if let Err(e) = self.request_device_refresh(target).await {
            debug!(device = %target.id, error = %e, "follow-up refresh failed");
        }
    }
}
