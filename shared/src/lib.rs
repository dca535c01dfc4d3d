use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Chebyshev radius of the neighborhood each session is shown.
pub const VIEW_RADIUS: u32 = 3;
pub const DEFAULT_PORT: u16 = 8080;
/// Path the WebSocket endpoint is served under.
pub const WS_PATH: &str = "/ws";

pub type EntityId = u32;

/// One occupant of the grid.
///
/// `controller` is a weak link to the session steering this entity. It is
/// never put on the wire or persisted: a restored world has no sessions, so
/// every entity comes back as a static occupant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub x: i64,
    pub y: i64,
    #[serde(skip)]
    pub controller: Option<EntityId>,
}

impl Entity {
    pub fn new(id: EntityId, x: i64, y: i64) -> Self {
        Self {
            id,
            x,
            y,
            controller: None,
        }
    }

    pub fn controlled(id: EntityId, x: i64, y: i64, session: EntityId) -> Self {
        Self {
            id,
            x,
            y,
            controller: Some(session),
        }
    }

    pub fn cell(&self) -> (i64, i64) {
        (self.x, self.y)
    }

    pub fn is_static(&self) -> bool {
        self.controller.is_none()
    }

    /// Chebyshev distance to a cell, saturating instead of overflowing.
    pub fn distance_to(&self, x: i64, y: i64) -> u64 {
        self.x.abs_diff(x).max(self.y.abs_diff(y))
    }
}

/// A decoded movement command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    XPlus,
    XMinus,
    YPlus,
    YMinus,
}

impl Intent {
    pub const ALL: [Intent; 4] = [Intent::XPlus, Intent::XMinus, Intent::YPlus, Intent::YMinus];

    /// Maps a wire token to an intent; anything unrecognised is `None`.
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim() {
            "x_plus" => Some(Intent::XPlus),
            "x_minus" => Some(Intent::XMinus),
            "y_plus" => Some(Intent::YPlus),
            "y_minus" => Some(Intent::YMinus),
            _ => None,
        }
    }

    pub fn as_token(&self) -> &'static str {
        match self {
            Intent::XPlus => "x_plus",
            Intent::XMinus => "x_minus",
            Intent::YPlus => "y_plus",
            Intent::YMinus => "y_minus",
        }
    }

    pub fn delta(&self) -> (i64, i64) {
        match self {
            Intent::XPlus => (1, 0),
            Intent::XMinus => (-1, 0),
            Intent::YPlus => (0, 1),
            Intent::YMinus => (0, -1),
        }
    }

    /// Destination cell when applied from `(x, y)`, or `None` past the edge of `i64`.
    pub fn apply(&self, x: i64, y: i64) -> Option<(i64, i64)> {
        let (dx, dy) = self.delta();
        Some((x.checked_add(dx)?, y.checked_add(dy)?))
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// First payload a session receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub client_id: EntityId,
}

/// Everything a session can currently see, keyed by entity id.
pub type NeighborSnapshot = HashMap<EntityId, Entity>;

/// Either outbound payload shape, as a client decodes it.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Welcome(Handshake),
    Neighbors(NeighborSnapshot),
}

impl ServerMessage {
    /// A neighbor map is keyed by numeric ids, so a `client_id` key only
    /// ever appears in the handshake.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if value.get("client_id").is_some() {
            Ok(ServerMessage::Welcome(serde_json::from_value(value)?))
        } else {
            Ok(ServerMessage::Neighbors(serde_json::from_value(value)?))
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            ServerMessage::Welcome(handshake) => serde_json::to_string(handshake),
            ServerMessage::Neighbors(neighbors) => serde_json::to_string(neighbors),
        }
    }
}
