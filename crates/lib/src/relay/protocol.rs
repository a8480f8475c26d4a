//! Relay wire protocol types (handshake query, server envelopes, relay tagging).

use serde::{Deserialize, Serialize};

/// Routing tag for relayed control frames (e.g. "begin the session activity").
pub const CONTROL_COMMAND: &str = "controlCommand";

/// Routing tag for relayed application payload frames (e.g. input state).
pub const STATE_UPDATE: &str = "stateUpdate";

/// Which side of a pairing a connection is. The relay never interprets what
/// either side actually is beyond these labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Owns the session; receives relayed traffic and status notifications.
    Primary,
    /// Binds to an existing session by code; sends traffic to be relayed.
    Secondary,
}

impl Role {
    /// Parse the `type` handshake query parameter. Returns None for missing
    /// or unrecognized values (the caller rejects the connection).
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "primary" => Some(Role::Primary),
            "secondary" => Some(Role::Secondary),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Secondary => write!(f, "secondary"),
        }
    }
}

/// Handshake query parameters on the WebSocket upgrade:
/// `?type=primary` or `?type=secondary&session=1234`.
/// The session code is accepted as both `session` and `SESSION`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectQuery {
    #[serde(rename = "type")]
    pub client_type: Option<String>,
    pub session: Option<String>,
    #[serde(rename = "SESSION")]
    pub session_upper: Option<String>,
}

impl ConnectQuery {
    pub fn role(&self) -> Option<Role> {
        self.client_type.as_deref().and_then(Role::from_param)
    }

    pub fn session_code(&self) -> Option<&str> {
        self.session
            .as_deref()
            .or(self.session_upper.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Server-originated envelopes: `{ "type": "...", ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Sent to a primary right after its session is created.
    #[serde(rename_all = "camelCase")]
    SessionCode { session_code: String },

    /// Sent to a primary whenever the count of bound secondaries changes.
    #[serde(rename_all = "camelCase")]
    Status { secondaries_connected: u32 },

    /// Sent to either side before the server closes that connection.
    Error { message: String },
}

/// Re-tag an inbound frame for relaying to the counterpart.
///
/// The payload is passed through unmodified except for the `type` field: a
/// frame whose `type` is `controlCommand` keeps it, everything else is tagged
/// `stateUpdate` so the receiver can distinguish relayed-control from
/// relayed-state frames. Returns None when the frame is not a JSON object
/// (the caller logs and drops it).
pub fn tag_for_relay(text: &str) -> Option<String> {
    let mut value: serde_json::Value = serde_json::from_str(text).ok()?;
    let obj = value.as_object_mut()?;
    let tag = match obj.get("type").and_then(|t| t.as_str()) {
        Some(CONTROL_COMMAND) => CONTROL_COMMAND,
        _ => STATE_UPDATE,
    };
    obj.insert("type".to_string(), serde_json::Value::String(tag.to_string()));
    serde_json::to_string(&value).ok()
}
