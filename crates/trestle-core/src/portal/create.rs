use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{error, info};
use trestle_models::{
    EventType, FunctionalMembersContent, PowerLevelsContent, RoomAvatarContent, RoomId,
    RoomTopicContent, SpaceParentContent, WireContent,
};

use crate::matrix::{CreateRoomRequest, InitialStateEvent};
use crate::portal::Portal;
use crate::user::UserLogin;
use crate::CoreError;

/// Power level granted to the bridge bot in rooms it creates, high
/// enough to outrank any admin a client might promote.
const BOT_POWER_LEVEL: i64 = 9001;

impl Portal {
    /// Brings a room-less portal to a fully provisioned room.
    /// Serialised per portal and idempotent; any failure leaves the
    /// portal room-less so the next event retries.
    pub async fn create_matrix_room(
        self: &Arc<Self>,
        source: &Arc<UserLogin>,
    ) -> Result<(), CoreError> {
        let _guard = self.room_create_lock.lock().await;
        if self.mxid().await.is_some() {
            return Ok(());
        }
        info!(portal_id = %self.id, "Creating room for portal");

        let info = source.client.get_chat_info(self).await?;
        // Room does not exist yet, so this only writes portal fields.
        self.update_info(&info, None, Utc::now()).await;
        let initial_members = self.sync_participants(&info.members, source).await?;

        let bot = self.bridge().matrix.bot();
        let server_name = self.bridge().matrix.server_name().to_string();
        let (name, topic, avatar_mxc) = {
            let state = self.state().read().await;
            (
                state.name.clone(),
                state.topic.clone(),
                state.avatar_mxc.clone(),
            )
        };

        let mut request = CreateRoomRequest {
            visibility: "private".to_string(),
            preset: "private_chat".to_string(),
            name,
            topic,
            is_direct: info.is_direct_chat.unwrap_or(false),
            power_level_override: Some(PowerLevelsContent {
                users: BTreeMap::from([(bot.user_mxid().clone(), BOT_POWER_LEVEL)]),
                extra: serde_json::Map::new(),
            }),
            local_room_id_hint: Some(RoomId::from(format!("!{}:{}", self.id, server_name))),
            initial_members: initial_members.clone(),
            ..CreateRoomRequest::default()
        };
        if info.is_space.unwrap_or(false) {
            request
                .creation_content
                .insert("type".to_string(), json!("m.space"));
        }
        request.initial_state.push(InitialStateEvent {
            event_type: EventType::FunctionalMembers,
            state_key: String::new(),
            content: WireContent::new(&FunctionalMembersContent {
                service_members: vec![bot.user_mxid().clone()],
            }),
        });
        if request.topic.is_empty() {
            // An explicit empty topic event keeps a later topic update
            // from creating an extra state event.
            request.initial_state.push(InitialStateEvent {
                event_type: EventType::RoomTopic,
                state_key: String::new(),
                content: WireContent::new(&RoomTopicContent {
                    topic: String::new(),
                }),
            });
        }
        if !avatar_mxc.is_empty() {
            request.initial_state.push(InitialStateEvent {
                event_type: EventType::RoomAvatar,
                state_key: String::new(),
                content: WireContent::new(&RoomAvatarContent {
                    url: Some(avatar_mxc),
                }),
            });
        }
        if let Some(parent) = self.parent().await {
            if let Some(parent_mxid) = parent.mxid().await {
                request.initial_state.push(InitialStateEvent {
                    event_type: EventType::SpaceParent,
                    state_key: parent_mxid.to_string(),
                    content: WireContent::new(&SpaceParentContent {
                        via: vec![server_name.clone()],
                        canonical: true,
                    }),
                });
            }
        }
        if self.bridge().config.auto_join_invites {
            request.auto_join_invites = true;
            request.invite = initial_members.clone();
        }

        let room_id = bot.create_room(&request).await?;
        info!(room_id = %room_id, "Room created");
        {
            let mut state = self.state().write().await;
            state.mxid = Some(room_id.clone());
            state.name_set = true;
            state.topic_set = true;
            state.avatar_set = true;
        }
        self.bridge()
            .register_portal_mxid(self.clone(), room_id.clone())
            .await;
        self.persist().await?;

        if !self.bridge().config.auto_join_invites {
            // Servers without auto-join need a second pass to actually
            // join and invite everyone.
            if let Err(err) = self.sync_participants(&info.members, source).await {
                error!(error = %err, "Failed to sync participants after room creation");
            }
        }
        Ok(())
    }
}
