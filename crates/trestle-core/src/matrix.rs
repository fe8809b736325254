use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use trestle_models::{
    ContentUri, EventId, EventType, MemberContent, PowerLevelsContent, RemoteUserId, RoomId,
    UserId, WireContent,
};

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("homeserver request failed: {0}")]
    Request(String),
}

/// An API handle acting as one homeserver user: the bridge bot, a
/// ghost, or a double-puppeted real user.
#[async_trait]
pub trait MatrixIntent: Send + Sync {
    fn user_mxid(&self) -> &UserId;

    async fn send_message(
        &self,
        room: &RoomId,
        event_type: EventType,
        content: &WireContent,
        timestamp: DateTime<Utc>,
    ) -> Result<EventId, MatrixError>;

    async fn send_state(
        &self,
        room: &RoomId,
        event_type: EventType,
        state_key: &str,
        content: &WireContent,
        timestamp: DateTime<Utc>,
    ) -> Result<EventId, MatrixError>;

    async fn create_room(&self, request: &CreateRoomRequest) -> Result<RoomId, MatrixError>;

    async fn invite_user(&self, room: &RoomId, user: &UserId) -> Result<(), MatrixError>;

    /// Joins the room if not already in it. Idempotent.
    async fn ensure_joined(&self, room: &RoomId) -> Result<(), MatrixError>;

    async fn upload_media(&self, data: Vec<u8>, mime_type: &str) -> Result<ContentUri, MatrixError> {
        let _ = (data, mime_type);
        Err(MatrixError::Request("media upload not supported".to_string()))
    }
}

/// Server-level homeserver connector: hands out intents and answers
/// membership queries.
#[async_trait]
pub trait MatrixConnector: Send + Sync {
    fn server_name(&self) -> &str;

    /// The bridge bot's intent.
    fn bot(&self) -> Arc<dyn MatrixIntent>;

    /// Double-puppet intent for a real user, when that user has granted
    /// one.
    fn user_intent(&self, user: &UserId) -> Option<Arc<dyn MatrixIntent>>;

    /// Intent for the ghost representing a remote user. Always
    /// available; ghost accounts are provisioned on demand.
    fn ghost_intent(&self, ghost: &RemoteUserId) -> Arc<dyn MatrixIntent>;

    async fn get_members(
        &self,
        room: &RoomId,
    ) -> Result<HashMap<UserId, MemberContent>, MatrixError>;

    async fn get_member_info(
        &self,
        room: &RoomId,
        user: &UserId,
    ) -> Result<Option<MemberContent>, MatrixError>;
}

#[derive(Debug)]
pub struct InitialStateEvent {
    pub event_type: EventType,
    pub state_key: String,
    pub content: WireContent,
}

#[derive(Debug, Default)]
pub struct CreateRoomRequest {
    pub visibility: String,
    pub preset: String,
    pub name: String,
    pub topic: String,
    pub is_direct: bool,
    pub creation_content: Map<String, Value>,
    pub initial_state: Vec<InitialStateEvent>,
    pub power_level_override: Option<PowerLevelsContent>,
    /// Hint asking the server to mint a predictable room id.
    pub local_room_id_hint: Option<RoomId>,
    /// Full member plan computed before creation.
    pub initial_members: Vec<UserId>,
    /// Compatibility mode: invite everyone in the create call and let
    /// the server auto-join them.
    pub auto_join_invites: bool,
    pub invite: Vec<UserId>,
}
