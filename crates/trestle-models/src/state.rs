use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::content::Membership;
use crate::ids::{ContentUri, UserId};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoomNameContent {
    pub name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoomTopicContent {
    pub topic: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoomAvatarContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<ContentUri>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MemberContent {
    pub membership: Membership,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub displayname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<ContentUri>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PowerLevelsContent {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub users: BTreeMap<UserId, i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SpaceParentContent {
    pub via: Vec<String>,
    #[serde(default)]
    pub canonical: bool,
}

/// Marks bridge service accounts so clients can hide them from the
/// member list.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FunctionalMembersContent {
    pub service_members: Vec<UserId>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeInfoSection {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub displayname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<ContentUri>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
}

/// Payload of the `m.bridge` / `uk.half-shot.bridge` state events that
/// advertise which network a room is bridged to.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BridgeInfoContent {
    pub bridgebot: UserId,
    pub creator: UserId,
    pub protocol: BridgeInfoSection,
    pub channel: BridgeInfoSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<BridgeInfoSection>,
}
