use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Topic every content update is published on. All entity kinds multiplex
/// onto this single name; subscribers decide relevance in their reload.
pub const UPDATE_EVENT: &str = "content:update";

// ---------------------------------------------------------------------------
// Entity kind / action
// ---------------------------------------------------------------------------

/// Which content category changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Match,
    League,
    Video,
    Featured,
    Highlight,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Match,
        EntityKind::League,
        EntityKind::Video,
        EntityKind::Featured,
        EntityKind::Highlight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Match => "match",
            Self::League => "league",
            Self::Video => "video",
            Self::Featured => "featured",
            Self::Highlight => "highlight",
        }
    }

    /// Plural path segment used by the HTTP API (`/api/matches`, ...).
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Match => "matches",
            Self::League => "leagues",
            Self::Video => "videos",
            Self::Featured => "featured",
            Self::Highlight => "highlights",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s || k.collection() == s)
            .ok_or_else(|| format!("unknown entity kind: {}", s))
    }
}

/// Nature of the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateAction {
    Create,
    Update,
    Delete,
}

impl UpdateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown update action: {}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Update id
// ---------------------------------------------------------------------------

/// Per-write unique id. Transports use it to skip echoes of events the
/// local channel has already delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateId(Uuid);

impl UpdateId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse the value of an `x-update-id` header.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }
}

impl Default for UpdateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Header carrying the update id from the admin client to the server so the
/// server-emitted event and the locally-triggered one share an id.
pub const UPDATE_ID_HEADER: &str = "x-update-id";

// ---------------------------------------------------------------------------
// UpdateEvent
// ---------------------------------------------------------------------------

/// One entity mutation, broadcast to every subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    pub id: UpdateId,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub action: UpdateAction,
    /// Full record for create/update, `{"id": ..}` for delete.
    pub data: serde_json::Value,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl UpdateEvent {
    pub fn new(kind: EntityKind, action: UpdateAction, data: serde_json::Value) -> Self {
        Self::with_id(UpdateId::new(), kind, action, data)
    }

    pub fn with_id(
        id: UpdateId,
        kind: EntityKind,
        action: UpdateAction,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id,
            kind,
            action,
            data,
            timestamp: now_millis(),
        }
    }

    /// Delete events only carry the id of the removed entity.
    pub fn deleted(id: UpdateId, kind: EntityKind, entity_id: i64) -> Self {
        Self::with_id(
            id,
            kind,
            UpdateAction::Delete,
            serde_json::json!({ "id": entity_id }),
        )
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
