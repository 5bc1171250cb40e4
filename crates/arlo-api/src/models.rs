// Wire types for the cloud and hub-local APIs.
//
// Field names follow the vendor's camelCase JSON. Unknown fields are
// retained where the engine may need them later (`extra`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Authentication API ──────────────────────────────────────────────

/// Result of submitting primary credentials.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTicket {
    pub token: String,
    /// Opaque reference echoed back to later handshake steps.
    #[serde(default, deserialize_with = "string_or_number")]
    pub authenticated: Option<String>,
    #[serde(default)]
    pub mfa: Option<bool>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FactorList {
    #[serde(default)]
    pub items: Vec<Factor>,
}

/// One second-factor delivery mechanism registered on the account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Factor {
    pub factor_type: String,
    pub factor_id: String,
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Correlation code returned when factor delivery starts (email protocol).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorStart {
    #[serde(default)]
    pub factor_auth_code: Option<String>,
    /// Push protocol: the access token is issued directly.
    #[serde(default)]
    pub access_token: Option<IssuedToken>,
}

/// Access token as issued by the push protocol.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    #[serde(default, alias = "expiresIn")]
    pub expired_in: Option<i64>,
}

/// Result of submitting the one-time code (email protocol).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorFinish {
    pub token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenValidation {
    #[serde(default)]
    pub token_validated: Option<bool>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ── Device/session API ──────────────────────────────────────────────

/// Final session returned by the session exchange.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub token: String,
    pub user_id: String,
    #[serde(default)]
    pub serial_number: Option<String>,
}

/// One entry of the device list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_id: String,
    pub device_type: String,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub x_cloud_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub properties: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Active automation modes for one gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveAutomation {
    pub gateway_id: String,
    #[serde(default)]
    pub active_modes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamStart {
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HmswebVersion {
    #[serde(default)]
    pub version: Option<String>,
}

/// Body of a notify request.
///
/// `from`, `to` and `trans_id` are filled in by the dispatcher; the
/// remaining fields describe the intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyBody {
    pub from: String,
    pub to: String,
    pub action: String,
    pub resource: String,
    pub trans_id: String,
    pub publish_response: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
}

/// Body of the stream/snapshot endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRequest {
    pub from: String,
    pub to: String,
    pub action: String,
    pub resource: String,
    pub trans_id: String,
    pub publish_response: bool,
    pub properties: Value,
}

// ── Certificates ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertRequest {
    pub uuid: String,
    pub public_key: String,
    pub unique_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertBundle {
    pub certs_data: Vec<IssuedCert>,
    pub ica_cert: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCert {
    pub peer_cert: String,
    pub device_cert: String,
    #[serde(default)]
    pub unique_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatlsToken {
    pub ratls_token: String,
}

// ── Hub-local storage ───────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingList {
    pub success: bool,
    #[serde(default)]
    pub data: Vec<Recording>,
}

/// Metadata of one recording stored on the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub utc_create_date: Option<i64>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Accept both `"123"` and `123` for opaque references.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}
