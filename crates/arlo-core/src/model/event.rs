// ── Domain notifications ──
//
// Everything the engine tells its consumers, as one tagged enum.
// Published on the engine's broadcast channel as `Arc<DomainEvent>`.

use serde::Serialize;
use serde_json::{Map, Value};

use super::device::{DeviceId, DeviceType, MediaUrls};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// The push channel reported `connected`.
    Connected,
    LoggedIn {
        user_id: String,
        serial_number: Option<String>,
    },
    DeviceFound {
        id: DeviceId,
        device_type: DeviceType,
        name: Option<String>,
    },
    GotAllDevices {
        count: usize,
    },
    DeviceUpdated {
        id: DeviceId,
        properties: Map<String, Value>,
    },
    Battery {
        id: DeviceId,
        battery_level: Option<i64>,
        charging_state: Option<String>,
        signal_strength: Option<i64>,
    },
    Siren {
        id: DeviceId,
        state: Map<String, Value>,
    },
    Mode {
        hub_id: DeviceId,
        mode: String,
        armed: bool,
    },
    MediaUpload {
        id: DeviceId,
        urls: MediaUrls,
        /// A stream was active and is now considered finished.
        stream_ended: bool,
    },
    FullFrameSnapshot {
        id: DeviceId,
        url: String,
    },
    LocalStorageOpened {
        ip: String,
        port: u16,
    },
    Subscribed {
        id: DeviceId,
    },
    StreamStateChanged {
        id: DeviceId,
        active: bool,
    },
    PropertiesRefreshed,
    LoggedOut {
        /// Another client ended this session.
        remote: bool,
    },
    ConnectionLost {
        reason: String,
    },
    DiscoveryFailed {
        reason: String,
    },
}

impl DomainEvent {
    /// Device the event is about, if any.
    pub fn device_id(&self) -> Option<&DeviceId> {
        match self {
            Self::DeviceFound { id, .. }
            | Self::DeviceUpdated { id, .. }
            | Self::Battery { id, .. }
            | Self::Siren { id, .. }
            | Self::MediaUpload { id, .. }
            | Self::FullFrameSnapshot { id, .. }
            | Self::Subscribed { id }
            | Self::StreamStateChanged { id, .. } => Some(id),
            Self::Mode { hub_id, .. } => Some(hub_id),
            _ => None,
        }
    }

    /// Short kebab-case name for log lines and plain output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::LoggedIn { .. } => "logged-in",
            Self::DeviceFound { .. } => "device-found",
            Self::GotAllDevices { .. } => "got-all-devices",
            Self::DeviceUpdated { .. } => "device-updated",
            Self::Battery { .. } => "battery",
            Self::Siren { .. } => "siren",
            Self::Mode { .. } => "mode",
            Self::MediaUpload { .. } => "media-upload",
            Self::FullFrameSnapshot { .. } => "full-frame-snapshot-available",
            Self::LocalStorageOpened { .. } => "local-storage-opened",
            Self::Subscribed { .. } => "subscribed",
            Self::StreamStateChanged { .. } => "stream-state",
            Self::PropertiesRefreshed => "properties-refreshed",
            Self::LoggedOut { .. } => "logged-out",
            Self::ConnectionLost { .. } => "connection-lost",
            Self::DiscoveryFailed { .. } => "discovery-failed",
        }
    }
}
