// ── Device registry ──
//
// Indexed, lock-free store of the household's devices. Mutation happens
// only through `replace_all` (discovery) and `apply_event` (push
// envelopes); commands never write here. Every mutation republishes a
// sorted snapshot on a `watch` channel.

mod apply;

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;

use arlo_api::models::DeviceRecord;

use crate::error::{CoreError, ProtocolError};
use crate::model::{Device, DeviceId, DeviceType, DomainEvent};

/// Hub-local storage address reported over the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStorageAddress {
    pub ip: String,
    pub port: u16,
}

pub struct DeviceRegistry {
    devices: DashMap<DeviceId, Arc<Device>>,
    hub_id: ArcSwapOption<DeviceId>,
    user_id: ArcSwapOption<String>,
    local_storage: ArcSwapOption<LocalStorageAddress>,
    snapshot: watch::Sender<Arc<Vec<Arc<Device>>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            devices: DashMap::new(),
            hub_id: ArcSwapOption::empty(),
            user_id: ArcSwapOption::empty(),
            local_storage: ArcSwapOption::empty(),
            snapshot,
        }
    }

    // ── Discovery ────────────────────────────────────────────────────

    /// Replace the whole device set with a discovery result.
    ///
    /// Fails with [`ProtocolError::MissingHub`] before touching the
    /// current set if the result has no hub. Returns the notifications
    /// to publish: one `DeviceFound` per tracked device, then
    /// `GotAllDevices`.
    pub fn replace_all(&self, records: Vec<DeviceRecord>) -> Result<Vec<DomainEvent>, CoreError> {
        let devices: Vec<Device> = records.into_iter().filter_map(Device::from_record).collect();

        let hub = devices
            .iter()
            .find(|d| d.device_type == DeviceType::Hub)
            .ok_or(ProtocolError::MissingHub)?;
        let hub_id = hub.id.clone();
        let user_id = hub
            .user_id
            .clone()
            .or_else(|| devices.iter().find_map(|d| d.user_id.clone()));

        // Overwrite first, then drop what discovery no longer reports, so
        // a concurrent reader never sees an empty set.
        let fresh: HashSet<DeviceId> = devices.iter().map(|d| d.id.clone()).collect();
        let mut events = Vec::with_capacity(devices.len() + 1);
        for device in devices {
            events.push(DomainEvent::DeviceFound {
                id: device.id.clone(),
                device_type: device.device_type,
                name: device.name.clone(),
            });
            self.devices.insert(device.id.clone(), Arc::new(device));
        }
        self.devices.retain(|id, _| fresh.contains(id));

        self.hub_id.store(Some(Arc::new(hub_id)));
        if let Some(user_id) = user_id {
            self.user_id.store(Some(Arc::new(user_id)));
        }
        self.local_storage.store(None);
        self.rebuild_snapshot();

        let count = fresh.len();
        debug!(count, "device set replaced");
        events.push(DomainEvent::GotAllDevices { count });
        Ok(events)
    }

    // ── Lookups ──────────────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.get(id).map(|r| Arc::clone(r.value()))
    }

    pub fn hub(&self) -> Option<Arc<Device>> {
        let hub_id = self.hub_id.load_full()?;
        self.get(hub_id.as_str())
    }

    pub fn hub_id(&self) -> Option<DeviceId> {
        self.hub_id.load_full().map(|id| (*id).clone())
    }

    /// Account id from the hub record, used in `from` fields.
    pub fn user_id(&self) -> Option<String> {
        self.user_id.load_full().map(|id| (*id).clone())
    }

    /// All devices of one type, ordered by id.
    pub fn devices_of_type(&self, device_type: DeviceType) -> Vec<Arc<Device>> {
        self.snapshot()
            .iter()
            .filter(|d| d.device_type == device_type)
            .cloned()
            .collect()
    }

    /// Hub plus every Q camera: the devices that answer refresh requests.
    pub fn gateways(&self) -> Vec<Arc<Device>> {
        self.snapshot()
            .iter()
            .filter(|d| d.device_type == DeviceType::Hub || d.device_type.is_self_hosted())
            .cloned()
            .collect()
    }

    /// The device that routes commands for `device`: a Q camera is its
    /// own gateway, everything else goes through the hub.
    pub fn gateway_for(&self, device: &Device) -> Option<Arc<Device>> {
        if device.device_type.is_self_hosted() || device.device_type == DeviceType::Hub {
            return self.get(device.id.as_str());
        }
        device
            .parent_id
            .as_ref()
            .and_then(|parent| self.get(parent.as_str()))
            .or_else(|| self.hub())
    }

    pub fn local_storage(&self) -> Option<LocalStorageAddress> {
        self.local_storage.load_full().map(|a| (*a).clone())
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Current snapshot (cheap `Arc` clone), ordered by id.
    pub fn snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<Device>>>> {
        self.snapshot.subscribe()
    }

    // ── Mode ─────────────────────────────────────────────────────────

    /// Apply an active-mode value to the hub.
    ///
    /// `armed` is true for every mode except the `mode0` sentinel.
    pub fn apply_mode(&self, hub_id: &str, mode: &str) -> Option<DomainEvent> {
        let armed = mode != DISARMED_MODE;
        self.update(hub_id, |hub| {
            hub.armed = Some(armed);
            hub.active_mode = Some(mode.to_owned());
        })?;
        Some(DomainEvent::Mode {
            hub_id: DeviceId::new(hub_id),
            mode: mode.to_owned(),
            armed,
        })
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Mutate one device in place and republish. `None` if unknown.
    fn update<R>(&self, id: &str, f: impl FnOnce(&mut Device) -> R) -> Option<R> {
        let result = {
            let mut entry = self.devices.get_mut(id)?;
            f(Arc::make_mut(entry.value_mut()))
        };
        self.rebuild_snapshot();
        Some(result)
    }

    fn set_local_storage(&self, address: LocalStorageAddress) {
        self.local_storage.store(Some(Arc::new(address)));
    }

    fn rebuild_snapshot(&self) {
        let mut values: Vec<Arc<Device>> = self.devices.iter().map(|r| Arc::clone(r.value())).collect();
        values.sort_by(|a, b| a.id.cmp(&b.id));
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Active-mode value meaning "disarmed".
pub const DISARMED_MODE: &str = "mode0";
/// Active-mode value conventionally meaning "armed".
pub const ARMED_MODE: &str = "mode1";

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(super) fn records(cameras: &[&str]) -> Vec<DeviceRecord> {
        let mut list = vec![json!({
            "deviceId": "HUB1",
            "deviceType": "basestation",
            "deviceName": "Home",
            "userId": "U-1",
            "xCloudId": "X-HUB"
        })];
        for cam in cameras {
            list.push(json!({
                "deviceId": cam,
                "deviceType": "camera",
                "parentId": "HUB1",
                "xCloudId": format!("X-{cam}")
            }));
        }
        serde_json::from_value(serde_json::Value::Array(list)).unwrap()
    }

    #[test]
    fn discovery_indexes_hub_and_cameras() {
        let registry = DeviceRegistry::new();
        let events = registry.replace_all(records(&["CAM1", "CAM2"])).unwrap();

        let cameras = registry.devices_of_type(DeviceType::Camera);
        assert_eq!(cameras.len(), 2);
        assert_eq!(cameras[0].id.as_str(), "CAM1");
        assert_eq!(registry.hub().unwrap().id.as_str(), "HUB1");
        assert_eq!(registry.get("HUB1").unwrap().device_type, DeviceType::Hub);
        assert_eq!(registry.user_id().as_deref(), Some("U-1"));

        assert_eq!(events.len(), 4);
        assert_eq!(events.last(), Some(&DomainEvent::GotAllDevices { count: 3 }));
    }

    #[test]
    fn second_discovery_replaces_instead_of_merging() {
        let registry = DeviceRegistry::new();
        registry.replace_all(records(&["CAM1", "CAM2"])).unwrap();
        registry.replace_all(records(&["CAM3"])).unwrap();

        let ids: Vec<_> = registry
            .devices_of_type(DeviceType::Camera)
            .iter()
            .map(|d| d.id.to_string())
            .collect();
        assert_eq!(ids, vec!["CAM3"]);
        assert!(registry.get("CAM1").is_none());
    }

    #[test]
    fn rediscovery_never_exposes_an_empty_set() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let registry = DeviceRegistry::new();
        registry.replace_all(records(&["CAM1", "CAM2"])).unwrap();
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            let reader = scope.spawn(|| {
                let mut misses = 0_usize;
                while !done.load(Ordering::SeqCst) {
                    if registry.get("HUB1").is_none() || registry.get("CAM1").is_none() {
                        misses += 1;
                    }
                }
                misses
            });
            for round in 0..500 {
                let cameras: &[&str] = if round % 2 == 0 { &["CAM1"] } else { &["CAM1", "CAM2"] };
                registry.replace_all(records(cameras)).unwrap();
            }
            done.store(true, Ordering::SeqCst);
            assert_eq!(reader.join().unwrap(), 0);
        });

        // The last round kept both cameras; stale ids still go.
        registry.replace_all(records(&["CAM1"])).unwrap();
        assert!(registry.get("CAM2").is_none());
        assert_eq!(registry.devices_of_type(DeviceType::Camera).len(), 1);
    }

    #[test]
    fn missing_hub_leaves_previous_state() {
        let registry = DeviceRegistry::new();
        registry.replace_all(records(&["CAM1"])).unwrap();

        let no_hub: Vec<DeviceRecord> = serde_json::from_value(json!([
            { "deviceId": "CAM9", "deviceType": "camera" }
        ]))
        .unwrap();
        let err = registry.replace_all(no_hub).unwrap_err();

        assert!(matches!(err, CoreError::Protocol(ProtocolError::MissingHub)));
        assert!(registry.get("CAM1").is_some());
        assert!(registry.get("CAM9").is_none());
    }

    #[test]
    fn arm_disarm_arm_tracks_last_mode() {
        let registry = DeviceRegistry::new();
        registry.replace_all(records(&[])).unwrap();

        for (mode, expected) in [("mode1", true), ("mode0", false), ("mode2", true)] {
            let event = registry.apply_mode("HUB1", mode).unwrap();
            assert_eq!(
                event,
                DomainEvent::Mode {
                    hub_id: "HUB1".into(),
                    mode: mode.into(),
                    armed: expected
                }
            );
            assert_eq!(registry.hub().unwrap().armed, Some(expected));
        }
    }

    #[test]
    fn gateway_resolution() {
        let registry = DeviceRegistry::new();
        let mut list = records(&["CAM1"]);
        list.push(serde_json::from_value(json!({ "deviceId": "Q1", "deviceType": "arloq" })).unwrap());
        registry.replace_all(list).unwrap();

        let cam = registry.get("CAM1").unwrap();
        let q = registry.get("Q1").unwrap();
        assert_eq!(registry.gateway_for(&cam).unwrap().id.as_str(), "HUB1");
        assert_eq!(registry.gateway_for(&q).unwrap().id.as_str(), "Q1");
        assert_eq!(registry.gateways().len(), 2);
    }

    #[test]
    fn snapshot_subscribers_see_updates() {
        let registry = DeviceRegistry::new();
        let rx = registry.subscribe();
        registry.replace_all(records(&["CAM1"])).unwrap();
        assert_eq!(rx.borrow().len(), 2);
    }
}
