#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use trestle_core::{
    Bridge, BridgeConfig, ChatInfo, ConvertedEdit, ConvertedMessage, ConvertedMessagePart,
    CreateRoomRequest, EditedMessagePart, EventSender, MatrixConnector, MatrixEdit, MatrixError,
    MatrixIntent, MatrixMessage, MatrixMessageRemove, MatrixReaction, MatrixReactionRemove,
    MessageRef, NetworkClient, NetworkError, PendingMessage, PendingReaction, Portal, PortalEvent,
    RemoteEvent, RemoteEventKind, RemoteUserInfo, UserLogin,
};
use trestle_db::messages::MessageRow;
use trestle_models::{
    BridgeId, EmojiId, EventId, EventType, LoginId, MatrixEvent, MemberContent, Membership,
    MessageContent, MessageId, PartId, PortalId, RemoteUserId, RoomId, UserId, WireContent,
};

// --- Homeserver mock ---

#[derive(Clone, Debug)]
pub enum MatrixCall {
    SendMessage {
        user: UserId,
        room: RoomId,
        event_type: EventType,
        content: Value,
        event_id: EventId,
    },
    SendState {
        user: UserId,
        room: RoomId,
        event_type: EventType,
        state_key: String,
        content: Value,
    },
    CreateRoom {
        room: RoomId,
        name: String,
        topic: String,
        is_direct: bool,
        creation_content: Value,
        room_hint: Option<RoomId>,
        invite: Vec<UserId>,
        auto_join: bool,
        initial_state: Vec<(EventType, String, Value)>,
        bot_power: Option<i64>,
    },
    InviteUser {
        room: RoomId,
        user: UserId,
    },
    EnsureJoined {
        room: RoomId,
        user: UserId,
    },
}

pub struct MatrixState {
    server: String,
    bot_mxid: UserId,
    calls: Mutex<Vec<MatrixCall>>,
    members: Mutex<HashMap<RoomId, HashMap<UserId, MemberContent>>>,
    double_puppets: Mutex<HashSet<UserId>>,
    forbidden_state_senders: Mutex<HashSet<UserId>>,
    event_counter: AtomicU64,
    room_counter: AtomicU64,
}

/// In-memory homeserver: records every API call and tracks room
/// membership so reconciliation behaves like the real thing.
pub struct MockMatrix {
    inner: Arc<MatrixState>,
}

impl MockMatrix {
    pub fn new(server: &str) -> Self {
        Self {
            inner: Arc::new(MatrixState {
                server: server.to_string(),
                bot_mxid: UserId::from(format!("@bridgebot:{server}").as_str()),
                calls: Mutex::new(Vec::new()),
                members: Mutex::new(HashMap::new()),
                double_puppets: Mutex::new(HashSet::new()),
                forbidden_state_senders: Mutex::new(HashSet::new()),
                event_counter: AtomicU64::new(0),
                room_counter: AtomicU64::new(0),
            }),
        }
    }

    pub fn bot_mxid(&self) -> UserId {
        self.inner.bot_mxid.clone()
    }

    pub fn ghost_mxid(&self, ghost: &RemoteUserId) -> UserId {
        UserId::from(format!("@net_{}:{}", ghost, self.inner.server).as_str())
    }

    pub fn calls(&self) -> Vec<MatrixCall> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.inner.calls.lock().unwrap().clear();
    }

    pub fn sent_messages(&self) -> Vec<(UserId, EventType, Value, EventId)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MatrixCall::SendMessage {
                    user,
                    event_type,
                    content,
                    event_id,
                    ..
                } => Some((user, event_type, content, event_id)),
                _ => None,
            })
            .collect()
    }

    pub fn state_events_of_type(&self, wanted: &EventType) -> Vec<(UserId, String, Value)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MatrixCall::SendState {
                    user,
                    event_type,
                    state_key,
                    content,
                    ..
                } if event_type == *wanted => Some((user, state_key, content)),
                _ => None,
            })
            .collect()
    }

    pub fn create_room_calls(&self) -> Vec<MatrixCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, MatrixCall::CreateRoom { .. }))
            .collect()
    }

    pub fn invite_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, MatrixCall::InviteUser { .. }))
            .count()
    }

    pub fn add_double_puppet(&self, user: &UserId) {
        self.inner.double_puppets.lock().unwrap().insert(user.clone());
    }

    pub fn forbid_state_from(&self, user: &UserId) {
        self.inner
            .forbidden_state_senders
            .lock()
            .unwrap()
            .insert(user.clone());
    }

    pub fn set_member(&self, room: &RoomId, user: &UserId, membership: Membership) {
        self.inner
            .members
            .lock()
            .unwrap()
            .entry(room.clone())
            .or_default()
            .insert(
                user.clone(),
                MemberContent {
                    membership,
                    ..MemberContent::default()
                },
            );
    }

    pub fn membership(&self, room: &RoomId, user: &UserId) -> Option<Membership> {
        self.inner
            .members
            .lock()
            .unwrap()
            .get(room)
            .and_then(|members| members.get(user))
            .map(|member| member.membership)
    }

    fn intent(&self, mxid: UserId) -> Arc<dyn MatrixIntent> {
        Arc::new(MockIntent {
            mxid,
            state: self.inner.clone(),
        })
    }
}

impl MatrixState {
    fn next_event_id(&self) -> EventId {
        let n = self.event_counter.fetch_add(1, Ordering::SeqCst) + 1;
        EventId::from(format!("$ev-{n}").as_str())
    }
}

struct MockIntent {
    mxid: UserId,
    state: Arc<MatrixState>,
}

#[async_trait]
impl MatrixIntent for MockIntent {
    fn user_mxid(&self) -> &UserId {
        &self.mxid
    }

    async fn send_message(
        &self,
        room: &RoomId,
        event_type: EventType,
        content: &WireContent,
        _timestamp: DateTime<Utc>,
    ) -> Result<EventId, MatrixError> {
        let event_id = self.state.next_event_id();
        self.state.calls.lock().unwrap().push(MatrixCall::SendMessage {
            user: self.mxid.clone(),
            room: room.clone(),
            event_type,
            content: content.to_value(),
            event_id: event_id.clone(),
        });
        Ok(event_id)
    }

    async fn send_state(
        &self,
        room: &RoomId,
        event_type: EventType,
        state_key: &str,
        content: &WireContent,
        _timestamp: DateTime<Utc>,
    ) -> Result<EventId, MatrixError> {
        if self
            .state
            .forbidden_state_senders
            .lock()
            .unwrap()
            .contains(&self.mxid)
        {
            return Err(MatrixError::Forbidden);
        }
        let value = content.to_value();
        if event_type == EventType::Member {
            if let Ok(member) = serde_json::from_value::<MemberContent>(value.clone()) {
                self.state
                    .members
                    .lock()
                    .unwrap()
                    .entry(room.clone())
                    .or_default()
                    .insert(UserId::from(state_key), member);
            }
        }
        self.state.calls.lock().unwrap().push(MatrixCall::SendState {
            user: self.mxid.clone(),
            room: room.clone(),
            event_type,
            state_key: state_key.to_string(),
            content: value,
        });
        Ok(self.state.next_event_id())
    }

    async fn create_room(&self, request: &CreateRoomRequest) -> Result<RoomId, MatrixError> {
        let n = self.state.room_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let room = RoomId::from(format!("!room-{n}:{}", self.state.server).as_str());
        {
            let mut members = self.state.members.lock().unwrap();
            let room_members = members.entry(room.clone()).or_default();
            room_members.insert(
                self.mxid.clone(),
                MemberContent {
                    membership: Membership::Join,
                    ..MemberContent::default()
                },
            );
            if request.auto_join_invites {
                for invitee in &request.invite {
                    room_members.insert(
                        invitee.clone(),
                        MemberContent {
                            membership: Membership::Join,
                            ..MemberContent::default()
                        },
                    );
                }
            }
        }
        let bot_power = request
            .power_level_override
            .as_ref()
            .and_then(|levels| levels.users.get(&self.mxid).copied());
        self.state.calls.lock().unwrap().push(MatrixCall::CreateRoom {
            room: room.clone(),
            name: request.name.clone(),
            topic: request.topic.clone(),
            is_direct: request.is_direct,
            creation_content: Value::Object(request.creation_content.clone()),
            room_hint: request.local_room_id_hint.clone(),
            invite: request.invite.clone(),
            auto_join: request.auto_join_invites,
            initial_state: request
                .initial_state
                .iter()
                .map(|event| {
                    (
                        event.event_type.clone(),
                        event.state_key.clone(),
                        event.content.to_value(),
                    )
                })
                .collect(),
            bot_power,
        });
        Ok(room)
    }

    async fn invite_user(&self, room: &RoomId, user: &UserId) -> Result<(), MatrixError> {
        self.state
            .members
            .lock()
            .unwrap()
            .entry(room.clone())
            .or_default()
            .insert(
                user.clone(),
                MemberContent {
                    membership: Membership::Invite,
                    ..MemberContent::default()
                },
            );
        self.state.calls.lock().unwrap().push(MatrixCall::InviteUser {
            room: room.clone(),
            user: user.clone(),
        });
        Ok(())
    }

    async fn ensure_joined(&self, room: &RoomId) -> Result<(), MatrixError> {
        self.state
            .members
            .lock()
            .unwrap()
            .entry(room.clone())
            .or_default()
            .insert(
                self.mxid.clone(),
                MemberContent {
                    membership: Membership::Join,
                    ..MemberContent::default()
                },
            );
        self.state.calls.lock().unwrap().push(MatrixCall::EnsureJoined {
            room: room.clone(),
            user: self.mxid.clone(),
        });
        Ok(())
    }
}

#[async_trait]
impl MatrixConnector for MockMatrix {
    fn server_name(&self) -> &str {
        &self.inner.server
    }

    fn bot(&self) -> Arc<dyn MatrixIntent> {
        self.intent(self.inner.bot_mxid.clone())
    }

    fn user_intent(&self, user: &UserId) -> Option<Arc<dyn MatrixIntent>> {
        self.inner
            .double_puppets
            .lock()
            .unwrap()
            .contains(user)
            .then(|| self.intent(user.clone()))
    }

    fn ghost_intent(&self, ghost: &RemoteUserId) -> Arc<dyn MatrixIntent> {
        self.intent(self.ghost_mxid(ghost))
    }

    async fn get_members(
        &self,
        room: &RoomId,
    ) -> Result<HashMap<UserId, MemberContent>, MatrixError> {
        Ok(self
            .inner
            .members
            .lock()
            .unwrap()
            .get(room)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_member_info(
        &self,
        room: &RoomId,
        user: &UserId,
    ) -> Result<Option<MemberContent>, MatrixError> {
        Ok(self
            .inner
            .members
            .lock()
            .unwrap()
            .get(room)
            .and_then(|members| members.get(user))
            .cloned())
    }
}

// --- Remote network mock ---

#[derive(Clone, Debug)]
pub enum NetworkCall {
    Message {
        event_id: EventId,
        body: String,
        orig_sender: Option<UserId>,
        reply_to: Option<MessageId>,
        thread_root: Option<MessageId>,
    },
    Edit {
        target_id: MessageId,
        body: String,
    },
    Reaction {
        target_id: MessageId,
        key: String,
        existing_found: bool,
    },
    MessageRemove {
        target_id: MessageId,
    },
    ReactionRemove {
        emoji_id: EmojiId,
    },
    Typing {
        portal: PortalId,
        typing: bool,
    },
    Receipt {
        event_id: EventId,
    },
}

pub struct MockNetwork {
    pub remote_user: RemoteUserId,
    calls: Mutex<Vec<NetworkCall>>,
    chat_info: Mutex<ChatInfo>,
    user_info_calls: AtomicUsize,
    fail_messages: AtomicBool,
}

impl MockNetwork {
    pub fn new(remote_user: &str) -> Self {
        Self {
            remote_user: RemoteUserId::from(remote_user),
            calls: Mutex::new(Vec::new()),
            chat_info: Mutex::new(ChatInfo::default()),
            user_info_calls: AtomicUsize::new(0),
            fail_messages: AtomicBool::new(false),
        }
    }

    pub fn set_chat_info(&self, info: ChatInfo) {
        *self.chat_info.lock().unwrap() = info;
    }

    pub fn calls(&self) -> Vec<NetworkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn message_calls(&self) -> Vec<NetworkCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, NetworkCall::Message { .. }))
            .collect()
    }

    pub fn user_info_call_count(&self) -> usize {
        self.user_info_calls.load(Ordering::SeqCst)
    }

    pub fn fail_next_messages(&self, fail: bool) {
        self.fail_messages.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl NetworkClient for MockNetwork {
    async fn is_this_user(&self, user: &RemoteUserId) -> bool {
        *user == self.remote_user
    }

    async fn get_chat_info(&self, _portal: &Portal) -> Result<ChatInfo, NetworkError> {
        Ok(self.chat_info.lock().unwrap().clone())
    }

    async fn get_user_info(
        &self,
        user: &RemoteUserId,
    ) -> Result<Option<RemoteUserInfo>, NetworkError> {
        self.user_info_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(RemoteUserInfo {
            name: Some(format!("{user} (remote)")),
            avatar_id: None,
        }))
    }

    async fn handle_matrix_message(
        &self,
        message: &MatrixMessage,
    ) -> Result<PendingMessage, NetworkError> {
        if self.fail_messages.load(Ordering::SeqCst) {
            return Err(NetworkError::Request("remote send failed".to_string()));
        }
        self.calls.lock().unwrap().push(NetworkCall::Message {
            event_id: message.event.id.clone(),
            body: message.content.body.clone(),
            orig_sender: message
                .orig_sender
                .as_ref()
                .map(|orig| orig.user.mxid.clone()),
            reply_to: message.reply_to.as_ref().map(|row| row.id.clone()),
            thread_root: message.thread_root.as_ref().map(|row| row.id.clone()),
        });
        Ok(PendingMessage {
            id: MessageId::from(format!("rmt-{}", message.event.id).as_str()),
            part_id: PartId::default(),
            sender_id: self.remote_user.clone(),
            timestamp: message.event.timestamp,
            metadata: Map::new(),
        })
    }

    async fn handle_matrix_edit(&self, edit: &MatrixEdit) -> Result<Option<Value>, NetworkError> {
        self.calls.lock().unwrap().push(NetworkCall::Edit {
            target_id: edit.edit_target.id.clone(),
            body: edit.content.body.clone(),
        });
        let mut metadata = edit.edit_target.metadata.clone();
        if let Some(object) = metadata.as_object_mut() {
            object.insert("edited".to_string(), json!(true));
        }
        Ok(Some(metadata))
    }

    async fn handle_matrix_reaction(
        &self,
        reaction: &MatrixReaction,
    ) -> Result<Option<PendingReaction>, NetworkError> {
        let key = reaction
            .content
            .relates_to
            .key
            .clone()
            .unwrap_or_default();
        let emoji = EmojiId::from(key.as_str());
        let existing_found = reaction
            .existing
            .get(&self.remote_user, &emoji)
            .await
            .ok()
            .flatten()
            .is_some();
        self.calls.lock().unwrap().push(NetworkCall::Reaction {
            target_id: reaction.target.id.clone(),
            key,
            existing_found,
        });
        Ok(Some(PendingReaction {
            sender_id: self.remote_user.clone(),
            emoji_id: emoji,
            metadata: Map::new(),
        }))
    }

    async fn handle_matrix_message_remove(
        &self,
        removal: &MatrixMessageRemove,
    ) -> Result<(), NetworkError> {
        self.calls.lock().unwrap().push(NetworkCall::MessageRemove {
            target_id: removal.target.id.clone(),
        });
        Ok(())
    }

    async fn handle_matrix_reaction_remove(
        &self,
        removal: &MatrixReactionRemove,
    ) -> Result<(), NetworkError> {
        self.calls.lock().unwrap().push(NetworkCall::ReactionRemove {
            emoji_id: removal.target.emoji_id.clone(),
        });
        Ok(())
    }

    async fn handle_matrix_typing(&self, portal: &Portal, typing: bool) -> Result<(), NetworkError> {
        self.calls.lock().unwrap().push(NetworkCall::Typing {
            portal: portal.id.clone(),
            typing,
        });
        Ok(())
    }

    async fn handle_matrix_read_receipt(
        &self,
        _portal: &Portal,
        event: &EventId,
    ) -> Result<(), NetworkError> {
        self.calls.lock().unwrap().push(NetworkCall::Receipt {
            event_id: event.clone(),
        });
        Ok(())
    }
}

// --- Remote event fakes ---

pub struct TestRemoteMessage {
    pub id: MessageId,
    pub sender: EventSender,
    pub create_portal: bool,
    pub parts: Vec<(PartId, String)>,
    pub reply_to: Option<MessageRef>,
    pub thread_root: Option<MessageRef>,
    pub timestamp: DateTime<Utc>,
}

impl TestRemoteMessage {
    pub fn new(id: &str, sender: EventSender, body: &str) -> Self {
        Self {
            id: MessageId::from(id),
            sender,
            create_portal: true,
            parts: vec![(PartId::default(), body.to_string())],
            reply_to: None,
            thread_root: None,
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
impl RemoteEvent for TestRemoteMessage {
    fn kind(&self) -> RemoteEventKind {
        RemoteEventKind::Message
    }

    fn id(&self) -> MessageId {
        self.id.clone()
    }

    fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    fn should_create_portal(&self) -> bool {
        self.create_portal
    }

    async fn convert_message(
        &self,
        _portal: &Portal,
        _intent: &Arc<dyn MatrixIntent>,
    ) -> Result<ConvertedMessage, NetworkError> {
        Ok(ConvertedMessage {
            parts: self
                .parts
                .iter()
                .map(|(part_id, body)| ConvertedMessagePart {
                    id: part_id.clone(),
                    event_type: EventType::RoomMessage,
                    content: MessageContent::text(body.clone()),
                    extra: None,
                    metadata: Map::new(),
                })
                .collect(),
            timestamp: self.timestamp,
            reply_to: self.reply_to.clone(),
            thread_root: self.thread_root.clone(),
        })
    }
}

pub struct TestRemoteEdit {
    pub target: MessageId,
    pub sender: EventSender,
    pub new_body: String,
    pub delete_parts: Vec<PartId>,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
impl RemoteEvent for TestRemoteEdit {
    fn kind(&self) -> RemoteEventKind {
        RemoteEventKind::Edit
    }

    fn id(&self) -> MessageId {
        MessageId::from(format!("edit-{}", self.target).as_str())
    }

    fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    fn target_message(&self) -> Option<MessageId> {
        Some(self.target.clone())
    }

    async fn convert_edit(
        &self,
        _portal: &Portal,
        _intent: &Arc<dyn MatrixIntent>,
        existing: &[MessageRow],
    ) -> Result<ConvertedEdit, NetworkError> {
        let mut modified = Vec::new();
        let mut deleted = Vec::new();
        for row in existing {
            if self.delete_parts.contains(&row.part_id) {
                deleted.push(row.clone());
            } else {
                let mut metadata = row.metadata.clone();
                if let Some(object) = metadata.as_object_mut() {
                    object.insert("edited".to_string(), json!(true));
                }
                modified.push(EditedMessagePart {
                    target: row.clone(),
                    event_type: EventType::RoomMessage,
                    content: MessageContent::text(self.new_body.clone()),
                    extra: None,
                    top_level_extra: None,
                    metadata: Some(metadata),
                });
            }
        }
        Ok(ConvertedEdit {
            modified,
            deleted,
            timestamp: self.timestamp,
        })
    }
}

/// Bare remote event for the reserved kinds.
pub struct TestRemoteStub {
    pub kind: RemoteEventKind,
    pub id: MessageId,
    pub sender: EventSender,
    pub create_portal: bool,
}

#[async_trait]
impl RemoteEvent for TestRemoteStub {
    fn kind(&self) -> RemoteEventKind {
        self.kind
    }

    fn id(&self) -> MessageId {
        self.id.clone()
    }

    fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    fn should_create_portal(&self) -> bool {
        self.create_portal
    }
}

/// Panics during conversion; the pump must survive it.
pub struct PanickingRemoteMessage {
    pub id: MessageId,
    pub sender: EventSender,
}

#[async_trait]
impl RemoteEvent for PanickingRemoteMessage {
    fn kind(&self) -> RemoteEventKind {
        RemoteEventKind::Message
    }

    fn id(&self) -> MessageId {
        self.id.clone()
    }

    fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    async fn convert_message(
        &self,
        _portal: &Portal,
        _intent: &Arc<dyn MatrixIntent>,
    ) -> Result<ConvertedMessage, NetworkError> {
        panic!("conversion blew up");
    }
}

/// Parks the pump inside conversion until released, so tests can fill
/// the queue deterministically.
pub struct BlockingRemoteMessage {
    pub id: MessageId,
    pub sender: EventSender,
    pub entered: Arc<AtomicBool>,
    pub release: Arc<Semaphore>,
}

#[async_trait]
impl RemoteEvent for BlockingRemoteMessage {
    fn kind(&self) -> RemoteEventKind {
        RemoteEventKind::Message
    }

    fn id(&self) -> MessageId {
        self.id.clone()
    }

    fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    async fn convert_message(
        &self,
        _portal: &Portal,
        _intent: &Arc<dyn MatrixIntent>,
    ) -> Result<ConvertedMessage, NetworkError> {
        self.entered.store(true, Ordering::SeqCst);
        let _permit = self.release.acquire().await;
        Err(NetworkError::Request("blocked message dropped".to_string()))
    }
}

// --- Harness ---

pub struct TestContext {
    pub bridge: Arc<Bridge>,
    pub matrix: Arc<MockMatrix>,
    pub db: trestle_db::DbPool,
}

impl TestContext {
    pub async fn new() -> anyhow::Result<Self> {
        Self::with_config(BridgeConfig::default()).await
    }

    pub async fn with_config(config: BridgeConfig) -> anyhow::Result<Self> {
        let db = trestle_db::create_pool("sqlite::memory:", 1).await?;
        trestle_db::run_migrations(&db).await?;
        let matrix = Arc::new(MockMatrix::new("example.org"));
        let bridge = Bridge::new(
            BridgeId::from("testbridge"),
            db.clone(),
            matrix.clone(),
            config,
        );
        Ok(Self { bridge, matrix, db })
    }

    pub async fn login(
        &self,
        user_mxid: &str,
        login_id: &str,
        remote_user: &str,
    ) -> anyhow::Result<(Arc<UserLogin>, Arc<MockNetwork>)> {
        let client = Arc::new(MockNetwork::new(remote_user));
        let login = self
            .bridge
            .add_user_login(
                &UserId::from(user_mxid),
                LoginId::from(login_id),
                client.clone(),
            )
            .await?;
        Ok((login, client))
    }

    pub async fn queue_matrix_event(
        &self,
        portal: &Arc<Portal>,
        event: MatrixEvent,
    ) -> anyhow::Result<()> {
        let sender = self.bridge.get_user_by_mxid(&event.sender).await?;
        portal.queue_event(PortalEvent::Matrix { event, sender });
        Ok(())
    }
}

pub fn test_avatar(id: &str, mxc: &str, hash: [u8; 32]) -> trestle_core::Avatar {
    let mxc = trestle_models::ContentUri::from(mxc);
    let reupload: trestle_core::ReuploadFn = Arc::new(move |_intent, _current| {
        let mxc = mxc.clone();
        let fut: futures_util::future::BoxFuture<'static, trestle_core::ReuploadResult> =
            Box::pin(async move { Ok((mxc, hash)) });
        fut
    });
    trestle_core::Avatar::new(trestle_models::AvatarId::from(id), reupload)
}

pub fn remote_sender(remote_user: &str) -> EventSender {
    EventSender {
        is_from_me: false,
        sender: RemoteUserId::from(remote_user),
        sender_login: None,
    }
}

pub fn self_sender(remote_user: &str) -> EventSender {
    EventSender {
        is_from_me: true,
        sender: RemoteUserId::from(remote_user),
        sender_login: None,
    }
}

pub fn matrix_event(id: &str, room: &RoomId, sender: &str, event_type: EventType, content: Value) -> MatrixEvent {
    MatrixEvent {
        id: EventId::from(id),
        room_id: room.clone(),
        sender: UserId::from(sender),
        event_type,
        timestamp: Utc::now(),
        state_key: None,
        content,
        redacts: None,
    }
}

/// Polls until the pump has made the condition true. Two seconds is an
/// eternity for an in-memory pipeline.
pub async fn wait_until(condition: impl Fn() -> bool, what: &str) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}
