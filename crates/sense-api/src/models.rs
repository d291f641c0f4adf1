// Sense wire models
//
// Only the fields the client reads are typed. Everything else the service
// sends lands in the flattened `extra` map, so nothing is silently dropped
// and schema drift never breaks deserialization.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Treat an explicit JSON `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ── Authentication ───────────────────────────────────────────────────

/// `status` value signalling that a second factor is needed.
pub const MFA_REQUIRED: &str = "mfa_required";

/// The only second-factor method this client can complete.
pub const MFA_TYPE_TOTP: &str = "totp";

/// Response body of `/authenticate`, `/authenticate/mfa`, and `/renew`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub authorized: bool,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error_reason: Option<String>,
    #[serde(default)]
    pub mfa_token: Option<String>,
    #[serde(default)]
    pub mfa_type: Option<String>,
    #[serde(default)]
    pub account_id: Option<i64>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub monitors: Vec<Monitor>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub totp_enabled: bool,
    #[serde(default)]
    pub date_created: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl AuthResponse {
    /// Whether the service is asking for a second factor.
    pub fn is_mfa_required(&self) -> bool {
        self.status.as_deref() == Some(MFA_REQUIRED)
    }

    /// The reason to surface when the response is a rejection.
    pub fn rejection_reason(&self) -> String {
        self.error_reason
            .clone()
            .or_else(|| self.status.clone())
            .unwrap_or_else(|| "login rejected".into())
    }
}

/// A monitor (the panel-mounted meter) registered to the account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: i64,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub time_zone: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub solar_connected: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub solar_configured: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub online: bool,
    #[serde(default)]
    pub hardware_type: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

// ── Devices ──────────────────────────────────────────────────────────

/// `GET /app/monitors/{id}/devices/overview`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesOverview {
    #[serde(default, deserialize_with = "null_as_default")]
    pub devices: Vec<DeviceSummary>,
    #[serde(default)]
    pub device_data_checksum: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// A detected (or user-added) device in the overview list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: serde_json::Value,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// `GET /app/monitors/{id}/devices/always_on`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlwaysOn {
    #[serde(default, deserialize_with = "null_as_default")]
    pub always_on: AlwaysOnSummary,
    #[serde(default)]
    pub info: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlwaysOnSummary {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_watts: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub unknown_watts: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub devices: Vec<AlwaysOnDevice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlwaysOnDevice {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub w: f64,
}

// ── Timeline ─────────────────────────────────────────────────────────

/// Item count requested when the caller passes zero.
pub const DEFAULT_TIMELINE_ITEMS: u32 = 30;

/// `GET /users/{id}/timeline`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub more_items: bool,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<TimelineItem>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineItem {
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(rename = "type", default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub device_state: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub children: Vec<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

// ── Trends ───────────────────────────────────────────────────────────

/// Bucket size for `/app/history/trends`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrendScale {
    Day,
    Week,
    Month,
    Year,
}

impl TrendScale {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "DAY",
            Self::Week => "WEEK",
            Self::Month => "MONTH",
            Self::Year => "YEAR",
        }
    }
}

impl fmt::Display for TrendScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `GET /app/history/trends`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trend {
    #[serde(default, deserialize_with = "null_as_default")]
    pub steps: u32,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scale: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub consumption: TrendSeries,
    #[serde(default, deserialize_with = "null_as_default")]
    pub production: TrendSeries,
    #[serde(default, deserialize_with = "null_as_default")]
    pub to_grid: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub from_grid: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub net_production: f64,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrendSeries {
    #[serde(default, deserialize_with = "null_as_default")]
    pub total: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub totals: Vec<f64>,
    #[serde(default)]
    pub total_cost: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub devices: Vec<serde_json::Value>,
}

// ── Realtime feed ────────────────────────────────────────────────────

/// The `type` tag of a realtime frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    RealtimeUpdate,
    DataChange,
    MonitorInfo,
    Hello,
    Error,
    /// A tag this client doesn't know yet; kept instead of failing the frame.
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::RealtimeUpdate => "realtime_update",
            Self::DataChange => "data_change",
            Self::MonitorInfo => "monitor_info",
            Self::Hello => "hello",
            Self::Error => "error",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for MessageKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "realtime_update" => Self::RealtimeUpdate,
            "data_change" => Self::DataChange,
            "monitor_info" => Self::MonitorInfo,
            "hello" => Self::Hello,
            "error" => Self::Error,
            _ => Self::Other(s),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Other(s) => s,
            other => other.as_str().to_owned(),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded frame from the realtime feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, deserialize_with = "null_as_default")]
    pub payload: RealtimePayload,
}

impl fmt::Display for RealtimeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "<{} message>", self.kind),
        }
    }
}

/// Instantaneous readings carried by `realtime_update` frames.
///
/// Other kinds reuse the same shape with most fields absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealtimePayload {
    #[serde(default)]
    pub online: Option<bool>,
    /// Whole-home consumption in watts.
    #[serde(default)]
    pub w: Option<f64>,
    #[serde(default)]
    pub solar_w: Option<f64>,
    #[serde(default)]
    pub grid_w: Option<f64>,
    #[serde(default)]
    pub solar_pct: Option<f64>,
    #[serde(default)]
    pub hz: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub voltage: Vec<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub channels: Vec<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub devices: Vec<RealtimeDevice>,
    #[serde(default)]
    pub frame: Option<i64>,
    #[serde(default)]
    pub epoch: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// Per-device power draw inside a realtime update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeDevice {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub w: f64,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn null_fields_decode_as_empty() {
        let json = r#"{
            "type": "realtime_update",
            "payload": { "w": 310.0, "voltage": null, "channels": null, "devices": null }
        }"#;
        let msg: RealtimeMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.payload.w, Some(310.0));
        assert!(msg.payload.voltage.is_empty());
        assert!(msg.payload.channels.is_empty());
        assert!(msg.payload.devices.is_empty());

        let msg: RealtimeMessage =
            serde_json::from_str(r#"{"type":"hello","payload":null}"#).unwrap();
        assert_eq!(msg.kind, MessageKind::Hello);
        assert!(msg.payload.frame.is_none());
    }

    #[test]
    fn deserialize_realtime_update() {
        let json = r#"{
            "type": "realtime_update",
            "payload": {
                "online": true,
                "w": 1523.4,
                "solar_w": 0.0,
                "hz": 59.98,
                "voltage": [121.2, 120.8],
                "channels": [800.1, 723.3],
                "frame": 12,
                "epoch": 1700000000,
                "devices": [
                    { "id": "abc", "name": "Fridge", "icon": "fridge", "w": 130.5, "attrs": [] }
                ],
                "_stats": { "brcv": 1.0 }
            }
        }"#;

        let msg: RealtimeMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.kind, MessageKind::RealtimeUpdate);
        assert_eq!(msg.payload.w, Some(1523.4));
        assert_eq!(msg.payload.voltage.len(), 2);
        assert_eq!(msg.payload.devices[0].name, "Fridge");
        assert_eq!(msg.payload.devices[0].extra["attrs"], serde_json::json!([]));
        assert_eq!(msg.payload.extra["_stats"]["brcv"], 1.0);
    }

    #[test]
    fn unknown_kind_is_preserved() {
        let msg: RealtimeMessage =
            serde_json::from_str(r#"{"type":"new_timeline_event","payload":{}}"#).unwrap();
        assert_eq!(msg.kind, MessageKind::Other("new_timeline_event".into()));
        assert!(msg.to_string().contains("\"type\":\"new_timeline_event\""));
    }

    #[test]
    fn hello_without_payload_decodes() {
        let msg: RealtimeMessage = serde_json::from_str(r#"{"type":"hello"}"#).unwrap();
        assert_eq!(msg.kind, MessageKind::Hello);
        assert!(msg.payload.w.is_none());
    }

    #[test]
    fn kind_roundtrips_through_string() {
        for kind in [
            MessageKind::RealtimeUpdate,
            MessageKind::DataChange,
            MessageKind::MonitorInfo,
            MessageKind::Hello,
            MessageKind::Error,
        ] {
            let s: String = kind.clone().into();
            assert_eq!(MessageKind::from(s), kind);
        }
    }

    #[test]
    fn auth_response_mfa_detection() {
        let res: AuthResponse = serde_json::from_str(
            r#"{"authorized":false,"status":"mfa_required","mfa_token":"m","mfa_type":"totp"}"#,
        )
        .unwrap();
        assert!(res.is_mfa_required());
        assert_eq!(res.mfa_type.as_deref(), Some(MFA_TYPE_TOTP));
    }

    #[test]
    fn rejection_reason_prefers_error_reason() {
        let res: AuthResponse = serde_json::from_str(
            r#"{"authorized":false,"status":"error","error_reason":"Unexpected username or password"}"#,
        )
        .unwrap();
        assert_eq!(res.rejection_reason(), "Unexpected username or password");
    }

    #[test]
    fn trend_scale_serializes_uppercase() {
        assert_eq!(TrendScale::Month.as_str(), "MONTH");
        assert_eq!(
            serde_json::to_string(&TrendScale::Week).unwrap(),
            "\"WEEK\""
        );
    }
}
