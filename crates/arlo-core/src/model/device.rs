// ── Device domain types ──

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

use arlo_api::models::DeviceRecord;

// ── DeviceId ────────────────────────────────────────────────────────

/// Vendor device identifier (the hub or camera serial).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for DeviceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ── DeviceType ──────────────────────────────────────────────────────

/// Canonical device type, normalized from the vendor's `deviceType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum DeviceType {
    Hub,
    Camera,
    CameraQ,
    #[strum(serialize = "camera-qs")]
    CameraQS,
}

impl DeviceType {
    /// Map the vendor string. Unknown kinds (chimes, lights) are not tracked.
    pub fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "basestation" => Some(Self::Hub),
            "camera" => Some(Self::Camera),
            "arloq" => Some(Self::CameraQ),
            "arloqs" => Some(Self::CameraQS),
            _ => None,
        }
    }

    /// Q cameras carry their own base station.
    pub fn is_self_hosted(self) -> bool {
        matches!(self, Self::CameraQ | Self::CameraQS)
    }

    pub fn is_camera(self) -> bool {
        !matches!(self, Self::Hub)
    }
}

// ── Media ───────────────────────────────────────────────────────────

/// Presigned URLs most recently pushed for a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaUrls {
    pub content: Option<String>,
    pub thumbnail: Option<String>,
    pub last_image: Option<String>,
    pub full_frame_snapshot: Option<String>,
}

// ── Device ──────────────────────────────────────────────────────────

/// One tracked device.
///
/// Only the registry mutates these; everyone else reads `Arc<Device>`
/// snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub id: DeviceId,
    pub device_type: DeviceType,
    pub name: Option<String>,
    pub xcloud_id: Option<String>,
    pub parent_id: Option<DeviceId>,
    pub model_id: Option<String>,
    pub user_id: Option<String>,
    pub is_subscribed: bool,
    pub properties: Map<String, Value>,
    pub siren: Option<Map<String, Value>>,
    /// Q cameras only.
    pub wifi: Option<Map<String, Value>>,
    /// Q cameras only: the embedded base station's own properties.
    pub base_station: Option<Map<String, Value>>,
    pub media: MediaUrls,
    pub stream_active: bool,
    /// Hub only.
    pub armed: Option<bool>,
    /// Hub only: raw mode string (`mode0` is disarmed).
    pub active_mode: Option<String>,
}

impl Device {
    /// Build from a discovery record. Returns `None` for untracked kinds.
    pub fn from_record(record: DeviceRecord) -> Option<Self> {
        let device_type = DeviceType::from_wire(&record.device_type)?;
        let properties = match record.properties {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };

        Some(Self {
            id: DeviceId::new(record.device_id),
            device_type,
            name: record.device_name,
            xcloud_id: record.x_cloud_id,
            parent_id: record.parent_id.map(DeviceId::new),
            model_id: record.model_id,
            user_id: record.user_id,
            is_subscribed: false,
            properties,
            siren: None,
            wifi: None,
            base_station: None,
            media: MediaUrls::default(),
            stream_active: false,
            armed: None,
            active_mode: None,
        })
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.id.as_str())
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// `Some(true)` / `Some(false)` once the camera has reported it.
    pub fn privacy_active(&self) -> Option<bool> {
        self.property("privacyActive").and_then(Value::as_bool)
    }

    pub fn battery_level(&self) -> Option<i64> {
        self.property("batteryLevel").and_then(Value::as_i64)
    }

    pub fn siren_state(&self) -> Option<&str> {
        self.siren
            .as_ref()
            .and_then(|s| s.get("sirenState"))
            .and_then(Value::as_str)
    }
}
