//! Wire protocol shared between the state-sync server and its clients
//!
//! Every frame is a single JSON object tagged with a `type` discriminator.
//! Field names follow the browser client's camelCase convention.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MAX_PLAYERS: usize = 5;
pub const BROADCAST_INTERVAL_MS: u64 = 50;
pub const RECONNECT_DELAY_MS: u64 = 3000;
pub const DEFAULT_INTERPOLATION_RATE: f32 = 10.0;

pub const MAX_NAME_LEN: usize = 20;
pub const DEFAULT_NAME: &str = "Player";

/// World-space point where freshly joined players appear
pub const SPAWN_POINT: Vec3 = Vec3 {
    x: 0.0,
    y: 2.0,
    z: 0.0,
};

pub const COLOR_PALETTE: [&str; 8] = [
    "#e74c3c", "#3498db", "#2ecc71", "#f1c40f", "#9b59b6", "#e67e22", "#1abc9c", "#ff69b4",
];

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn lerp(&self, target: &Vec3, t: f32) -> Vec3 {
        Vec3 {
            x: self.x + (target.x - self.x) * t,
            y: self.y + (target.y - self.y) * t,
            z: self.z + (target.z - self.z) * t,
        }
    }
}

/// Coarse animation category used by remote clients to pick an animation
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MovementState {
    #[default]
    Idle,
    Walking,
    Running,
    Swinging,
}

/// Identity, name and color of one joined player
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerSummary {
    pub id: String,
    pub name: String,
    pub color: String,
}

/// One entry of a `state` broadcast
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerState {
    pub id: String,
    pub name: String,
    pub color: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    #[serde(rename = "rotationY")]
    pub rotation_y: f32,
    pub state: MovementState,
    #[serde(
        rename = "swingAttachPoint",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub swing_attach_point: Option<Vec3>,
}

impl PlayerState {
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    pub fn summary(&self) -> PlayerSummary {
        PlayerSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            color: self.color.clone(),
        }
    }
}

/// Messages sent from a client to the server
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        name: String,
    },
    Position {
        x: f32,
        y: f32,
        z: f32,
        #[serde(rename = "rotationY")]
        rotation_y: f32,
        state: MovementState,
    },
    Swing {
        active: bool,
        #[serde(rename = "attachPoint", default, skip_serializing_if = "Option::is_none")]
        attach_point: Option<Vec3>,
    },
    Settings {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },
    RtcOffer {
        #[serde(rename = "targetId")]
        target_id: String,
        offer: Value,
    },
    RtcAnswer {
        #[serde(rename = "targetId")]
        target_id: String,
        answer: Value,
    },
    RtcIce {
        #[serde(rename = "targetId")]
        target_id: String,
        candidate: Value,
    },
}

/// Messages sent from the server to a client
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        #[serde(rename = "yourId")]
        your_id: String,
        players: Vec<PlayerSummary>,
    },
    PlayerJoined {
        id: String,
        name: String,
        color: String,
    },
    PlayerLeft {
        id: String,
    },
    State {
        players: Vec<PlayerState>,
    },
    ServerFull {},
    RtcOffer {
        #[serde(rename = "fromId")]
        from_id: String,
        offer: Value,
    },
    RtcAnswer {
        #[serde(rename = "fromId")]
        from_id: String,
        answer: Value,
    },
    RtcIce {
        #[serde(rename = "fromId")]
        from_id: String,
        candidate: Value,
    },
}

impl ClientMessage {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerMessage {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Kind of peer-to-peer negotiation payload carried by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

impl SignalKind {
    /// Wraps a payload in the server-to-client message for this kind
    pub fn into_server_message(self, from_id: String, payload: Value) -> ServerMessage {
        match self {
            SignalKind::Offer => ServerMessage::RtcOffer {
                from_id,
                offer: payload,
            },
            SignalKind::Answer => ServerMessage::RtcAnswer {
                from_id,
                answer: payload,
            },
            SignalKind::Candidate => ServerMessage::RtcIce {
                from_id,
                candidate: payload,
            },
        }
    }

    /// Wraps a payload in the client-to-server message for this kind
    pub fn into_client_message(self, target_id: String, payload: Value) -> ClientMessage {
        match self {
            SignalKind::Offer => ClientMessage::RtcOffer {
                target_id,
                offer: payload,
            },
            SignalKind::Answer => ClientMessage::RtcAnswer {
                target_id,
                answer: payload,
            },
            SignalKind::Candidate => ClientMessage::RtcIce {
                target_id,
                candidate: payload,
            },
        }
    }
}

/// True for strict `#rrggbb` hex colors
pub fn is_valid_color(color: &str) -> bool {
    let bytes = color.as_bytes();
    bytes.len() == 7 && bytes[0] == b'#' && bytes[1..].iter().all(|b| b.is_ascii_hexdigit())
}

/// True for names that are non-empty after trimming and within `MAX_NAME_LEN` characters
pub fn is_valid_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty() && trimmed.chars().count() <= MAX_NAME_LEN
}

/// Normalizes a requested join name: trims, truncates, and falls back to `DEFAULT_NAME`
pub fn sanitize_join_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return DEFAULT_NAME.to_string();
    }
    trimmed.chars().take(MAX_NAME_LEN).collect()
}
