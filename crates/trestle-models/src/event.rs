use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::ids::{EventId, RoomId, UserId};

/// The event types the portal pipeline cares about. Anything else is
/// carried through as [`EventType::Custom`] and ignored by dispatch.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    RoomMessage,
    Sticker,
    Reaction,
    RoomRedaction,
    RoomName,
    RoomTopic,
    RoomAvatar,
    RoomEncryption,
    Member,
    PowerLevels,
    SpaceParent,
    BridgeInfo,
    LegacyBridgeInfo,
    FunctionalMembers,
    Typing,
    Receipt,
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::RoomMessage => "m.room.message",
            Self::Sticker => "m.sticker",
            Self::Reaction => "m.reaction",
            Self::RoomRedaction => "m.room.redaction",
            Self::RoomName => "m.room.name",
            Self::RoomTopic => "m.room.topic",
            Self::RoomAvatar => "m.room.avatar",
            Self::RoomEncryption => "m.room.encryption",
            Self::Member => "m.room.member",
            Self::PowerLevels => "m.room.power_levels",
            Self::SpaceParent => "m.space.parent",
            Self::BridgeInfo => "m.bridge",
            Self::LegacyBridgeInfo => "uk.half-shot.bridge",
            Self::FunctionalMembers => "io.element.functional_members",
            Self::Typing => "m.typing",
            Self::Receipt => "m.receipt",
            Self::Custom(other) => other,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "m.room.message" => Self::RoomMessage,
            "m.sticker" => Self::Sticker,
            "m.reaction" => Self::Reaction,
            "m.room.redaction" => Self::RoomRedaction,
            "m.room.name" => Self::RoomName,
            "m.room.topic" => Self::RoomTopic,
            "m.room.avatar" => Self::RoomAvatar,
            "m.room.encryption" => Self::RoomEncryption,
            "m.room.member" => Self::Member,
            "m.room.power_levels" => Self::PowerLevels,
            "m.space.parent" => Self::SpaceParent,
            "m.bridge" => Self::BridgeInfo,
            "uk.half-shot.bridge" => Self::LegacyBridgeInfo,
            "io.element.functional_members" => Self::FunctionalMembers,
            "m.typing" => Self::Typing,
            "m.receipt" => Self::Receipt,
            other => Self::Custom(other.to_string()),
        }
    }

    pub fn is_state(&self) -> bool {
        matches!(
            self,
            Self::RoomName
                | Self::RoomTopic
                | Self::RoomAvatar
                | Self::RoomEncryption
                | Self::Member
                | Self::PowerLevels
                | Self::SpaceParent
                | Self::BridgeInfo
                | Self::LegacyBridgeInfo
                | Self::FunctionalMembers
        )
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Typing | Self::Receipt)
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Err(D::Error::custom("empty event type"));
        }
        Ok(Self::parse(&raw))
    }
}

/// One event as delivered by the homeserver connector. `content` stays
/// raw JSON; handlers parse it into the typed structs they expect.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatrixEvent {
    pub id: EventId,
    pub room_id: RoomId,
    pub sender: UserId,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacts: Option<EventId>,
}

/// Outgoing event payload: a typed body plus top-level keys merged over
/// it on serialization (used for vendor annotations like
/// `fi.mau.bridge.set_by` and edit envelopes carrying `m.new_content`).
#[derive(Clone, Debug, Default)]
pub struct WireContent {
    pub parsed: Value,
    pub raw: Option<Map<String, Value>>,
}

impl WireContent {
    pub fn new<T: Serialize>(parsed: &T) -> Self {
        Self {
            parsed: serde_json::to_value(parsed).unwrap_or(Value::Null),
            raw: None,
        }
    }

    pub fn with_raw<T: Serialize>(parsed: &T, raw: Map<String, Value>) -> Self {
        Self {
            raw: Some(raw),
            ..Self::new(parsed)
        }
    }

    /// Flattens the payload for the wire. Raw keys win over parsed ones.
    pub fn to_value(&self) -> Value {
        let mut body = match &self.parsed {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => return other.clone(),
        };
        if let Some(raw) = &self.raw {
            for (key, value) in raw {
                body.insert(key.clone(), value.clone());
            }
        }
        Value::Object(body)
    }
}
