// ── Event application rules ──
//
// Dispatch on the envelope's discriminators (status, action, resource
// pattern) and apply the matching mutation. Anything unrecognized is
// logged and dropped; a rule that names an unknown device is dropped
// the same way.

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use arlo_api::Envelope;

use super::{DeviceRegistry, LocalStorageAddress};
use crate::error::ProtocolError;
use crate::model::{DeviceId, DeviceType, DomainEvent, MediaUrls};

const RES_MEDIA_UPLOAD: &str = "mediaUploadNotification";
const RES_MODE: &str = "activeAutomations";
const RES_RATLS: &str = "storage/ratls";
const RES_WIFI: &str = "wifi/ap";
const RES_DEVICES: &str = "devices";
const RES_BASESTATION: &str = "basestation";
const RES_CAMERAS: &str = "cameras";
const ACTION_FULL_FRAME: &str = "fullFrameSnapshotAvailable";
const ACTION_IS: &str = "is";
const ACTION_LOGOUT: &str = "logout";

impl DeviceRegistry {
    /// Apply one push envelope and return the notifications it produced.
    ///
    /// Never fails: protocol problems are logged and the envelope is
    /// dropped.
    pub fn apply_event(&self, envelope: &Envelope) -> Vec<DomainEvent> {
        match self.apply(envelope) {
            Ok(events) => events,
            Err(ProtocolError::UnknownDevice(id)) => {
                debug!(device = %id, resource = ?envelope.resource, "event for unknown device dropped");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "dropping envelope");
                Vec::new()
            }
        }
    }

    fn apply(&self, env: &Envelope) -> Result<Vec<DomainEvent>, ProtocolError> {
        if env.is_status("connected") {
            return Ok(vec![DomainEvent::Connected]);
        }

        if env.is_action(ACTION_FULL_FRAME) {
            return self.apply_full_frame(env).map(|e| vec![e]);
        }

        let resource = env.resource.as_deref().unwrap_or_default();
        match resource {
            RES_RATLS => return self.apply_ratls(env).map(|e| vec![e]),
            RES_MEDIA_UPLOAD => return self.apply_media_upload(env).map(|e| vec![e]),
            RES_MODE => return self.apply_automation(env).map(|e| vec![e]),
            RES_WIFI => {
                let id = from_device(env)?;
                let props = env.properties_object().cloned().unwrap_or_default();
                self.update(id, |d| d.wifi = Some(props))
                    .ok_or_else(|| unknown(id))?;
                return Ok(Vec::new());
            }
            _ => {}
        }

        if env.is_action(ACTION_IS) {
            return self.apply_is(env, resource);
        }

        if env.is_action(ACTION_LOGOUT) {
            info!("session ended by another client");
            return Ok(vec![DomainEvent::LoggedOut { remote: true }]);
        }

        debug!(action = ?env.action, resource, "unrecognized envelope dropped");
        Ok(Vec::new())
    }

    // ── Individual rules ─────────────────────────────────────────────

    fn apply_full_frame(&self, env: &Envelope) -> Result<DomainEvent, ProtocolError> {
        let resource = env.resource.as_deref().unwrap_or_default();
        let id = resource.strip_prefix("cameras/").unwrap_or(resource);
        let url = env
            .properties_object()
            .and_then(|p| p.get("presignedFullFrameSnapshotUrl"))
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("full-frame snapshot without URL"))?
            .to_owned();

        self.update(id, |d| d.media.full_frame_snapshot = Some(url.clone()))
            .ok_or_else(|| unknown(id))?;
        debug!(device = id, "full-frame snapshot available");
        Ok(DomainEvent::FullFrameSnapshot {
            id: DeviceId::new(id),
            url,
        })
    }

    fn apply_ratls(&self, env: &Envelope) -> Result<DomainEvent, ProtocolError> {
        let props = env
            .properties_object()
            .ok_or_else(|| malformed("storage/ratls without properties"))?;
        let ip = props
            .get("privateIP")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("storage/ratls without privateIP"))?
            .to_owned();
        let port = props
            .get("port")
            .and_then(|p| p.as_u64().or_else(|| p.as_str().and_then(|s| s.parse().ok())))
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| malformed("storage/ratls without port"))?;

        self.set_local_storage(LocalStorageAddress { ip: ip.clone(), port });
        debug!(%ip, port, "hub local storage opened");
        Ok(DomainEvent::LocalStorageOpened { ip, port })
    }

    fn apply_media_upload(&self, env: &Envelope) -> Result<DomainEvent, ProtocolError> {
        let id = env
            .device_id
            .as_deref()
            .ok_or_else(|| malformed("media upload without deviceId"))?;

        let (urls, stream_ended) = self
            .update(id, |d| {
                let stream_ended = d.stream_active;
                d.stream_active = false;
                if let Some(url) = &env.presigned_content_url {
                    d.media.content = Some(url.clone());
                }
                if let Some(url) = &env.presigned_thumbnail_url {
                    d.media.thumbnail = Some(url.clone());
                }
                if let Some(url) = &env.presigned_last_image_url {
                    d.media.last_image = Some(url.clone());
                }
                let urls = MediaUrls {
                    content: env.presigned_content_url.clone(),
                    thumbnail: env.presigned_thumbnail_url.clone(),
                    last_image: env.presigned_last_image_url.clone(),
                    full_frame_snapshot: None,
                };
                (urls, stream_ended)
            })
            .ok_or_else(|| unknown(id))?;

        debug!(device = id, stream_ended, "media upload");
        Ok(DomainEvent::MediaUpload {
            id: DeviceId::new(id),
            urls,
            stream_ended,
        })
    }

    /// Mode payload is keyed by hub id: `{"HUB1": {"activeModes": [...]}}`.
    fn apply_automation(&self, env: &Envelope) -> Result<DomainEvent, ProtocolError> {
        let (hub_id, mode) = env
            .extra
            .iter()
            .find_map(|(key, value)| {
                let mode = value.get("activeModes")?.as_array()?.first()?.as_str()?;
                Some((key.as_str(), mode))
            })
            .ok_or_else(|| malformed("activeAutomations without activeModes"))?;

        let event = self.apply_mode(hub_id, mode).ok_or_else(|| unknown(hub_id))?;
        info!(hub = hub_id, mode, "mode changed");
        Ok(event)
    }

    fn apply_is(&self, env: &Envelope, resource: &str) -> Result<Vec<DomainEvent>, ProtocolError> {
        if resource.starts_with("subscriptions/") {
            let id = env
                .properties_object()
                .and_then(|p| p.get("devices"))
                .and_then(Value::as_array)
                .and_then(|list| list.first())
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("subscription without devices"))?;
            self.update(id, |d| d.is_subscribed = true)
                .ok_or_else(|| unknown(id))?;
            debug!(device = id, "subscribed");
            return Ok(vec![DomainEvent::Subscribed { id: DeviceId::new(id) }]);
        }

        if let Some(id) = resource.strip_prefix("siren/") {
            let state = env.properties_object().cloned().unwrap_or_default();
            self.update(id, |d| d.siren = Some(state.clone()))
                .ok_or_else(|| unknown(id))?;
            return Ok(vec![DomainEvent::Siren {
                id: DeviceId::new(id),
                state,
            }]);
        }

        if resource == RES_DEVICES {
            return Ok(self.apply_bulk_properties(env));
        }

        if resource == RES_BASESTATION {
            let id = from_device(env)?;
            let props = env.properties_object().cloned().unwrap_or_default();
            self.update(id, |d| d.base_station = Some(props))
                .ok_or_else(|| unknown(id))?;
            return Ok(Vec::new());
        }

        if resource == RES_CAMERAS {
            let id = from_device(env)?;
            let Some(props) = env.properties_object().filter(|p| !p.is_empty()) else {
                debug!(device = id, "camera update without properties");
                return Ok(Vec::new());
            };
            let props = props.clone();
            self.update(id, |d| d.properties = props.clone())
                .ok_or_else(|| unknown(id))?;
            return Ok(vec![DomainEvent::DeviceUpdated {
                id: DeviceId::new(id),
                properties: props,
            }]);
        }

        if let Some(id) = resource.strip_prefix("cameras/") {
            return self.apply_camera_delta(id, env);
        }

        debug!(resource, "unhandled 'is' resource");
        Ok(Vec::new())
    }

    /// `devices` payload: `{"devices": {"<id>": {"properties": {...}}}}`.
    ///
    /// Each listed device's properties are replaced, so applying the same
    /// envelope twice leaves the same state.
    fn apply_bulk_properties(&self, env: &Envelope) -> Vec<DomainEvent> {
        let Some(devices) = env.extra.get(RES_DEVICES).and_then(Value::as_object) else {
            debug!("bulk update without devices map");
            return Vec::new();
        };

        let hub_id = self.hub_id();
        let mut events = Vec::new();
        for (id, entry) in devices {
            let props = entry
                .get("properties")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();

            let Some(device_type) = self.update(id, |d| {
                d.properties = props.clone();
                d.device_type
            }) else {
                debug!(device = %id, "bulk update for unknown device");
                continue;
            };

            if hub_id.as_ref().is_some_and(|h| h.as_str() == id) || device_type == DeviceType::Hub {
                continue;
            }

            events.push(battery_event(id, &props));
            if let Some(event) = self.stream_transition(id, &props) {
                events.push(event);
            }
            events.push(DomainEvent::DeviceUpdated {
                id: DeviceId::new(id.as_str()),
                properties: props,
            });
        }
        events
    }

    /// Partial property update for one camera.
    fn apply_camera_delta(&self, id: &str, env: &Envelope) -> Result<Vec<DomainEvent>, ProtocolError> {
        let Some(delta) = env.properties_object() else {
            return Ok(Vec::new());
        };

        let merged = self
            .update(id, |d| {
                for (key, value) in delta {
                    d.properties.insert(key.clone(), value.clone());
                }
                d.properties.clone()
            })
            .ok_or_else(|| unknown(id))?;

        let mut events = Vec::new();
        if let Some(event) = self.stream_transition(id, delta) {
            events.push(event);
        }
        events.push(DomainEvent::DeviceUpdated {
            id: DeviceId::new(id),
            properties: merged,
        });
        Ok(events)
    }

    /// Derive `stream_active` from an `activityState` property.
    fn stream_transition(&self, id: &str, props: &Map<String, Value>) -> Option<DomainEvent> {
        let active = match props.get("activityState").and_then(Value::as_str)? {
            "userStreamActive" => true,
            "idle" => false,
            _ => return None,
        };
        let changed = self.update(id, |d| {
            let changed = d.stream_active != active;
            d.stream_active = active;
            changed
        })?;
        changed.then(|| DomainEvent::StreamStateChanged {
            id: DeviceId::new(id),
            active,
        })
    }
}

fn battery_event(id: &str, props: &Map<String, Value>) -> DomainEvent {
    DomainEvent::Battery {
        id: DeviceId::new(id),
        battery_level: props.get("batteryLevel").and_then(Value::as_i64),
        charging_state: props
            .get("chargingState")
            .and_then(Value::as_str)
            .map(str::to_owned),
        signal_strength: props.get("signalStrength").and_then(Value::as_i64),
    }
}

fn from_device(env: &Envelope) -> Result<&str, ProtocolError> {
    env.from
        .as_deref()
        .ok_or_else(|| malformed("envelope without 'from'"))
}

fn unknown(id: &str) -> ProtocolError {
    ProtocolError::UnknownDevice(id.to_owned())
}

fn malformed(reason: &str) -> ProtocolError {
    ProtocolError::UnparsableEnvelope(reason.to_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::tests::records;
    use super::*;
    use serde_json::json;

    fn registry() -> DeviceRegistry {
        let registry = DeviceRegistry::new();
        let mut list = records(&["CAM1", "CAM2"]);
        list.push(serde_json::from_value(json!({ "deviceId": "Q1", "deviceType": "arloq" })).unwrap());
        registry.replace_all(list).unwrap();
        registry
    }

    fn envelope(value: serde_json::Value) -> Envelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn connected_status() {
        let events = registry().apply_event(&envelope(json!({ "status": "connected" })));
        assert_eq!(events, vec![DomainEvent::Connected]);
    }

    #[test]
    fn bulk_update_is_idempotent() {
        let registry = registry();
        let update = envelope(json!({
            "action": "is",
            "resource": "devices",
            "devices": {
                "HUB1": { "properties": { "olsonTimeZone": "UTC" } },
                "CAM1": { "properties": { "batteryLevel": 71, "chargingState": "Off", "signalStrength": 3 } }
            }
        }));

        let first = registry.apply_event(&update);
        let after_first = registry.snapshot();
        let second = registry.apply_event(&update);
        let after_second = registry.snapshot();

        assert_eq!(first, second);
        let props = |snap: &std::sync::Arc<Vec<std::sync::Arc<crate::model::Device>>>| {
            snap.iter().map(|d| d.properties.clone()).collect::<Vec<_>>()
        };
        assert_eq!(props(&after_first), props(&after_second));

        assert_eq!(
            first[0],
            DomainEvent::Battery {
                id: "CAM1".into(),
                battery_level: Some(71),
                charging_state: Some("Off".into()),
                signal_strength: Some(3),
            }
        );
        assert!(matches!(first[1], DomainEvent::DeviceUpdated { .. }));
        assert_eq!(first.len(), 2, "hub updates emit nothing");
        assert_eq!(registry.hub().unwrap().property("olsonTimeZone"), Some(&json!("UTC")));
    }

    #[test]
    fn mode_payload_keyed_by_hub() {
        let registry = registry();
        let events = registry.apply_event(&envelope(json!({
            "resource": "activeAutomations",
            "from": "HUB1",
            "HUB1": { "activeModes": ["mode0"] }
        })));
        assert_eq!(
            events,
            vec![DomainEvent::Mode {
                hub_id: "HUB1".into(),
                mode: "mode0".into(),
                armed: false
            }]
        );
        assert_eq!(registry.hub().unwrap().armed, Some(false));
    }

    #[test]
    fn media_upload_ends_active_stream_and_keeps_missing_urls() {
        let registry = registry();
        registry.apply_event(&envelope(json!({
            "action": "is", "resource": "cameras/CAM1",
            "properties": { "activityState": "userStreamActive" }
        })));
        assert!(registry.get("CAM1").unwrap().stream_active);

        registry.apply_event(&envelope(json!({
            "resource": "mediaUploadNotification", "deviceId": "CAM1",
            "presignedLastImageUrl": "https://img/last"
        })));
        let events = registry.apply_event(&envelope(json!({
            "resource": "mediaUploadNotification", "deviceId": "CAM1",
            "presignedContentUrl": "https://img/clip"
        })));

        let cam = registry.get("CAM1").unwrap();
        assert!(!cam.stream_active);
        assert_eq!(cam.media.last_image.as_deref(), Some("https://img/last"));
        assert_eq!(cam.media.content.as_deref(), Some("https://img/clip"));
        match &events[0] {
            DomainEvent::MediaUpload { stream_ended, urls, .. } => {
                assert!(!stream_ended, "second upload finds no active stream");
                assert!(urls.last_image.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn full_frame_snapshot_updates_only_url() {
        let registry = registry();
        let events = registry.apply_event(&envelope(json!({
            "action": "fullFrameSnapshotAvailable",
            "resource": "cameras/CAM2",
            "properties": { "presignedFullFrameSnapshotUrl": "https://img/ff" }
        })));
        assert_eq!(
            events,
            vec![DomainEvent::FullFrameSnapshot {
                id: "CAM2".into(),
                url: "https://img/ff".into()
            }]
        );
        let cam = registry.get("CAM2").unwrap();
        assert_eq!(cam.media.full_frame_snapshot.as_deref(), Some("https://img/ff"));
        assert!(cam.media.content.is_none());
    }

    #[test]
    fn subscription_and_siren() {
        let registry = registry();
        let events = registry.apply_event(&envelope(json!({
            "action": "is", "resource": "subscriptions/U-1_web",
            "properties": { "devices": ["HUB1"] }
        })));
        assert_eq!(events, vec![DomainEvent::Subscribed { id: "HUB1".into() }]);
        assert!(registry.hub().unwrap().is_subscribed);

        registry.apply_event(&envelope(json!({
            "action": "is", "resource": "siren/CAM1",
            "properties": { "sirenState": "on" }
        })));
        assert_eq!(registry.get("CAM1").unwrap().siren_state(), Some("on"));
    }

    #[test]
    fn q_camera_sub_states() {
        let registry = registry();
        registry.apply_event(&envelope(json!({
            "resource": "wifi/ap", "from": "Q1", "properties": { "ssid": "home" }
        })));
        registry.apply_event(&envelope(json!({
            "action": "is", "resource": "basestation", "from": "Q1", "properties": { "state": "idle" }
        })));
        let empty = registry.apply_event(&envelope(json!({
            "action": "is", "resource": "cameras", "from": "Q1", "properties": []
        })));
        assert!(empty.is_empty());

        let q = registry.get("Q1").unwrap();
        assert_eq!(q.wifi.as_ref().unwrap()["ssid"], json!("home"));
        assert_eq!(q.base_station.as_ref().unwrap()["state"], json!("idle"));
    }

    #[test]
    fn ratls_records_address() {
        let registry = registry();
        let events = registry.apply_event(&envelope(json!({
            "action": "is", "resource": "storage/ratls", "from": "HUB1",
            "properties": { "privateIP": "192.168.1.20", "port": 443 }
        })));
        assert_eq!(
            events,
            vec![DomainEvent::LocalStorageOpened {
                ip: "192.168.1.20".into(),
                port: 443
            }]
        );
        assert_eq!(registry.local_storage().unwrap().port, 443);
    }

    #[test]
    fn remote_logout() {
        let events = registry().apply_event(&envelope(json!({ "action": "logout" })));
        assert_eq!(events, vec![DomainEvent::LoggedOut { remote: true }]);
    }

    #[test]
    fn unknown_device_and_unknown_shape_are_dropped() {
        let registry = registry();
        let before = registry.snapshot();
        assert!(registry
            .apply_event(&envelope(json!({ "action": "is", "resource": "siren/NOPE", "properties": {} })))
            .is_empty());
        assert!(registry
            .apply_event(&envelope(json!({ "action": "whatever", "resource": "lights/L1" })))
            .is_empty());
        assert!(std::sync::Arc::ptr_eq(&before, &registry.snapshot()));
    }
}
