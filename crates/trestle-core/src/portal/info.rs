use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map};
use tracing::{error, warn};
use trestle_models::{
    BridgeInfoContent, BridgeInfoSection, ContentUri, EventType, RoomAvatarContent,
    RoomNameContent, RoomTopicContent, WireContent,
};

use crate::network::{Avatar, ChatInfo};
use crate::portal::Portal;
use crate::user::Ghost;

impl Portal {
    /// Applies a name change. Returns whether anything changed; the
    /// `name_set` flag ends up true only if the room accepted the state
    /// event.
    pub async fn update_name(
        &self,
        name: &str,
        sender: Option<&Ghost>,
        timestamp: DateTime<Utc>,
    ) -> bool {
        {
            let state = self.state().read().await;
            if state.name == name && (state.name_set || state.mxid.is_none()) {
                return false;
            }
        }
        self.state().write().await.name = name.to_string();
        let set = self
            .send_room_meta(
                sender,
                timestamp,
                EventType::RoomName,
                "",
                &RoomNameContent {
                    name: name.to_string(),
                },
            )
            .await;
        self.state().write().await.name_set = set;
        true
    }

    pub async fn update_topic(
        &self,
        topic: &str,
        sender: Option<&Ghost>,
        timestamp: DateTime<Utc>,
    ) -> bool {
        {
            let state = self.state().read().await;
            if state.topic == topic && (state.topic_set || state.mxid.is_none()) {
                return false;
            }
        }
        self.state().write().await.topic = topic.to_string();
        let set = self
            .send_room_meta(
                sender,
                timestamp,
                EventType::RoomTopic,
                "",
                &RoomTopicContent {
                    topic: topic.to_string(),
                },
            )
            .await;
        self.state().write().await.topic_set = set;
        true
    }

    /// Applies an avatar change. The reupload step short-circuits when
    /// the remote image's digest matches the stored one: the avatar is
    /// considered refreshed and no state event is sent.
    pub async fn update_avatar(
        &self,
        avatar: &Avatar,
        sender: Option<&Ghost>,
        timestamp: DateTime<Utc>,
    ) -> bool {
        let current_hash = {
            let state = self.state().read().await;
            if state.avatar_id == avatar.id && (state.avatar_set || state.mxid.is_none()) {
                return false;
            }
            state.avatar_hash
        };
        self.state().write().await.avatar_id = avatar.id.clone();
        if avatar.remove {
            let mut state = self.state().write().await;
            state.avatar_mxc = ContentUri::default();
            state.avatar_hash = None;
        } else {
            let intent = match sender {
                Some(ghost) => ghost.intent.clone(),
                None => self.bridge().matrix.bot(),
            };
            match avatar.reupload(intent, current_hash).await {
                Ok((mxc, hash)) => {
                    if Some(hash) == current_hash {
                        return true;
                    }
                    let mut state = self.state().write().await;
                    state.avatar_mxc = mxc;
                    state.avatar_hash = Some(hash);
                }
                Err(err) => {
                    self.state().write().await.avatar_set = false;
                    error!(error = %err, "Failed to reupload room avatar");
                    return true;
                }
            }
        }
        let url = {
            let state = self.state().read().await;
            (!state.avatar_mxc.is_empty()).then(|| state.avatar_mxc.clone())
        };
        let set = self
            .send_room_meta(
                sender,
                timestamp,
                EventType::RoomAvatar,
                "",
                &RoomAvatarContent { url },
            )
            .await;
        self.state().write().await.avatar_set = set;
        true
    }

    /// Follows the parent chain to its top, refusing to loop.
    pub async fn top_level_parent(self: &Arc<Self>) -> Arc<Portal> {
        let mut visited = HashSet::new();
        let mut current = self.clone();
        loop {
            if !visited.insert(current.id.clone()) {
                warn!(portal_id = %current.id, "Parent chain loops, stopping traversal");
                return current;
            }
            match current.parent().await {
                Some(parent) => current = parent,
                None => return current,
            }
        }
    }

    async fn bridge_info(self: &Arc<Self>) -> (String, BridgeInfoContent) {
        let bot_mxid = self.bridge().matrix.bot().user_mxid().clone();
        let channel = {
            let state = self.state().read().await;
            BridgeInfoSection {
                id: self.id.to_string(),
                displayname: (!state.name.is_empty()).then(|| state.name.clone()),
                avatar_url: (!state.avatar_mxc.is_empty()).then(|| state.avatar_mxc.clone()),
                external_url: None,
            }
        };
        let parent = self.top_level_parent().await;
        let network = {
            let state = parent.state().read().await;
            BridgeInfoSection {
                id: parent.id.to_string(),
                displayname: (!state.name.is_empty()).then(|| state.name.clone()),
                avatar_url: (!state.avatar_mxc.is_empty()).then(|| state.avatar_mxc.clone()),
                external_url: None,
            }
        };
        let content = BridgeInfoContent {
            bridgebot: bot_mxid.clone(),
            creator: bot_mxid,
            protocol: self.bridge().config.protocol.clone(),
            channel,
            network: Some(network),
        };
        (self.bridge_id.to_string(), content)
    }

    /// Publishes the canonical and legacy bridge-info state events.
    pub async fn update_bridge_info(self: &Arc<Self>) {
        if self.mxid().await.is_none() {
            return;
        }
        let (state_key, content) = self.bridge_info().await;
        let now = Utc::now();
        self.send_room_meta(None, now, EventType::BridgeInfo, &state_key, &content)
            .await;
        self.send_room_meta(None, now, EventType::LegacyBridgeInfo, &state_key, &content)
            .await;
    }

    /// Sends a state event as the given ghost (or the bridge bot). A
    /// ghost forbidden from posting state falls back to the bot with a
    /// `set_by` annotation.
    pub(crate) async fn send_room_meta<T: Serialize + Sync>(
        &self,
        sender: Option<&Ghost>,
        timestamp: DateTime<Utc>,
        event_type: EventType,
        state_key: &str,
        content: &T,
    ) -> bool {
        let Some(room) = self.mxid().await else {
            return false;
        };
        let bot = self.bridge().matrix.bot();
        let intent = match sender {
            Some(ghost) => ghost.intent.clone(),
            None => bot.clone(),
        };
        let wire = WireContent::new(content);
        let result = intent
            .send_state(&room, event_type.clone(), state_key, &wire, timestamp)
            .await;
        let result = match result {
            Err(crate::matrix::MatrixError::Forbidden) if !Arc::ptr_eq(&intent, &bot) => {
                let mut raw = Map::new();
                raw.insert(
                    "fi.mau.bridge.set_by".to_string(),
                    json!(intent.user_mxid().as_str()),
                );
                bot.send_state(
                    &room,
                    event_type.clone(),
                    state_key,
                    &WireContent::with_raw(content, raw),
                    timestamp,
                )
                .await
            }
            other => other,
        };
        match result {
            Ok(_) => true,
            Err(err) => {
                error!(event_type = event_type.as_str(), error = %err, "Failed to set room metadata");
                false
            }
        }
    }

    /// Applies a chat-info diff. `None` fields are left alone. Publishes
    /// bridge info and persists only when something changed.
    pub async fn update_info(
        self: &Arc<Self>,
        info: &ChatInfo,
        sender: Option<&Ghost>,
        timestamp: DateTime<Utc>,
    ) {
        let mut changed = false;
        if let Some(name) = &info.name {
            changed |= self.update_name(name, sender, timestamp).await;
        }
        if let Some(topic) = &info.topic {
            changed |= self.update_topic(topic, sender, timestamp).await;
        }
        if let Some(avatar) = &info.avatar {
            changed |= self.update_avatar(avatar, sender, timestamp).await;
        }
        if changed {
            self.update_bridge_info().await;
            if let Err(err) = self.persist().await {
                error!(error = %err, "Failed to save portal after updating info");
            }
        }
    }
}
