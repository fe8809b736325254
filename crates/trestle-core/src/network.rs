use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use thiserror::Error;
use trestle_db::messages::MessageRow;
use trestle_db::reactions::ReactionRow;
use trestle_db::{DbError, DbPool};
use trestle_models::{
    AvatarId, ContentUri, EmojiId, EventId, EventType, MatrixEvent, MessageContent, MessageId,
    PartId, ReactionContent, RedactionContent, RemoteUserId,
};

use crate::matrix::MatrixIntent;
use crate::portal::Portal;
use crate::user::OrigSender;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("not logged into the remote network")]
    NotLoggedIn,
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("remote network request failed: {0}")]
    Request(String),
}

/// Who sent a remote event, as described by the network connector.
#[derive(Clone, Debug, Default)]
pub struct EventSender {
    /// The event was sent by the account behind the source login.
    pub is_from_me: bool,
    pub sender: RemoteUserId,
    /// Login id of the sender, when the sender is a remote account some
    /// local user is logged in as.
    pub sender_login: Option<trestle_models::LoginId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteEventKind {
    Message,
    Edit,
    Reaction,
    ReactionRemove,
    MessageRemove,
}

/// One inbound event from the remote network. Dispatch goes by
/// [`RemoteEventKind`]; conversion methods only need to be implemented
/// for the kinds the connector actually produces.
#[async_trait]
pub trait RemoteEvent: Send + Sync {
    fn kind(&self) -> RemoteEventKind;

    fn id(&self) -> MessageId;

    fn sender(&self) -> EventSender;

    fn target_message(&self) -> Option<MessageId> {
        None
    }

    /// Whether receiving this event should provision the room for a
    /// portal that has none yet.
    fn should_create_portal(&self) -> bool {
        false
    }

    fn add_log_context(&self, span: &tracing::Span) {
        let _ = span;
    }

    async fn convert_message(
        &self,
        portal: &Portal,
        intent: &Arc<dyn MatrixIntent>,
    ) -> Result<ConvertedMessage, NetworkError> {
        let _ = (portal, intent);
        Err(NetworkError::Unsupported("message conversion"))
    }

    async fn convert_edit(
        &self,
        portal: &Portal,
        intent: &Arc<dyn MatrixIntent>,
        existing: &[MessageRow],
    ) -> Result<ConvertedEdit, NetworkError> {
        let _ = (portal, intent, existing);
        Err(NetworkError::Unsupported("edit conversion"))
    }
}

/// Reference to an already-bridged remote message, optionally naming a
/// specific part.
#[derive(Clone, Debug)]
pub struct MessageRef {
    pub id: MessageId,
    pub part: Option<PartId>,
}

#[derive(Debug)]
pub struct ConvertedMessagePart {
    pub id: PartId,
    pub event_type: EventType,
    pub content: MessageContent,
    /// Extra top-level keys for the outgoing event.
    pub extra: Option<Map<String, Value>>,
    /// Seed for the stored message row's metadata.
    pub metadata: Map<String, Value>,
}

#[derive(Debug)]
pub struct ConvertedMessage {
    pub parts: Vec<ConvertedMessagePart>,
    pub timestamp: DateTime<Utc>,
    pub reply_to: Option<MessageRef>,
    pub thread_root: Option<MessageRef>,
}

#[derive(Debug)]
pub struct EditedMessagePart {
    pub target: MessageRow,
    pub event_type: EventType,
    pub content: MessageContent,
    /// Payload for the `m.new_content` envelope, when the edit carries
    /// connector-specific keys.
    pub extra: Option<Map<String, Value>>,
    pub top_level_extra: Option<Map<String, Value>>,
    /// Replacement metadata for the stored row, if it changed.
    pub metadata: Option<Value>,
}

#[derive(Debug)]
pub struct ConvertedEdit {
    pub modified: Vec<EditedMessagePart>,
    pub deleted: Vec<MessageRow>,
    pub timestamp: DateTime<Utc>,
}

/// Chat metadata as reported by the remote network. `None` fields mean
/// "unknown, leave the current value alone".
#[derive(Clone, Debug, Default)]
pub struct ChatInfo {
    pub name: Option<String>,
    pub topic: Option<String>,
    pub avatar: Option<Avatar>,
    pub members: Vec<RemoteUserId>,
    pub is_direct_chat: Option<bool>,
    pub is_space: Option<bool>,
}

pub type ReuploadResult = Result<(ContentUri, [u8; 32]), NetworkError>;

/// Digest used to detect avatar changes without re-downloading the
/// current room avatar.
pub fn avatar_digest(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    Sha256::digest(data).into()
}

pub type ReuploadFn =
    Arc<dyn Fn(Arc<dyn MatrixIntent>, Option<[u8; 32]>) -> BoxFuture<'static, ReuploadResult> + Send + Sync>;

/// A remote avatar. The reupload callback transfers the image to the
/// homeserver, returning the content URI and digest; implementations
/// may short-circuit when the digest matches the one passed in.
#[derive(Clone)]
pub struct Avatar {
    pub id: AvatarId,
    pub remove: bool,
    reupload: Option<ReuploadFn>,
}

impl Avatar {
    pub fn new(id: AvatarId, reupload: ReuploadFn) -> Self {
        Self {
            id,
            remove: false,
            reupload: Some(reupload),
        }
    }

    pub fn removal(id: AvatarId) -> Self {
        Self {
            id,
            remove: true,
            reupload: None,
        }
    }

    pub async fn reupload(
        &self,
        intent: Arc<dyn MatrixIntent>,
        current_hash: Option<[u8; 32]>,
    ) -> ReuploadResult {
        match &self.reupload {
            Some(reupload) => reupload(intent, current_hash).await,
            None => Err(NetworkError::Unsupported("avatar reupload")),
        }
    }
}

impl fmt::Debug for Avatar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Avatar")
            .field("id", &self.id)
            .field("remove", &self.remove)
            .finish_non_exhaustive()
    }
}

/// Remote profile of one user, used to keep ghost accounts fresh.
#[derive(Clone, Debug, Default)]
pub struct RemoteUserInfo {
    pub name: Option<String>,
    pub avatar_id: Option<AvatarId>,
}

#[derive(Clone, Copy, Debug)]
pub struct NetworkCapabilities {
    pub threads: bool,
    pub replies: bool,
    pub edits: bool,
}

impl Default for NetworkCapabilities {
    fn default() -> Self {
        Self {
            threads: true,
            replies: true,
            edits: true,
        }
    }
}

/// A room message or sticker heading to the remote network.
pub struct MatrixMessage {
    pub event: MatrixEvent,
    pub content: MessageContent,
    pub orig_sender: Option<OrigSender>,
    pub portal: Arc<Portal>,
    pub thread_root: Option<MessageRow>,
    pub reply_to: Option<MessageRow>,
}

pub struct MatrixEdit {
    pub event: MatrixEvent,
    pub content: MessageContent,
    pub orig_sender: Option<OrigSender>,
    pub portal: Arc<Portal>,
    pub edit_target: MessageRow,
}

pub struct MatrixReaction {
    pub event: MatrixEvent,
    pub content: ReactionContent,
    pub portal: Arc<Portal>,
    pub target: MessageRow,
    pub existing: ExistingReactionLookup,
}

pub struct MatrixMessageRemove {
    pub event: MatrixEvent,
    pub content: RedactionContent,
    pub orig_sender: Option<OrigSender>,
    pub portal: Arc<Portal>,
    pub target: MessageRow,
}

pub struct MatrixReactionRemove {
    pub event: MatrixEvent,
    pub content: RedactionContent,
    pub orig_sender: Option<OrigSender>,
    pub portal: Arc<Portal>,
    pub target: ReactionRow,
}

/// Lets the connector check for an existing reaction by the same sender
/// with the same emoji before deciding how to handle a new one.
pub struct ExistingReactionLookup {
    pool: DbPool,
    message_id: MessageId,
    part_id: PartId,
}

impl ExistingReactionLookup {
    pub(crate) fn new(pool: DbPool, message_id: MessageId, part_id: PartId) -> Self {
        Self {
            pool,
            message_id,
            part_id,
        }
    }

    pub async fn get(
        &self,
        sender: &RemoteUserId,
        emoji: &EmojiId,
    ) -> Result<Option<ReactionRow>, DbError> {
        trestle_db::reactions::get_by_id(&self.pool, &self.message_id, &self.part_id, sender, emoji)
            .await
    }
}

/// What the connector hands back after delivering a room message to the
/// remote network; becomes the stored message row.
#[derive(Clone, Debug)]
pub struct PendingMessage {
    pub id: MessageId,
    pub part_id: PartId,
    pub sender_id: RemoteUserId,
    pub timestamp: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

#[derive(Clone, Debug)]
pub struct PendingReaction {
    pub sender_id: RemoteUserId,
    pub emoji_id: EmojiId,
    pub metadata: Map<String, Value>,
}

/// Per-login handle into the remote network, able to push room events
/// out and describe remote chats.
#[async_trait]
pub trait NetworkClient: Send + Sync {
    fn capabilities(&self) -> NetworkCapabilities {
        NetworkCapabilities::default()
    }

    /// Whether the given remote user is the account this login belongs
    /// to.
    async fn is_this_user(&self, user: &RemoteUserId) -> bool;

    async fn get_chat_info(&self, portal: &Portal) -> Result<ChatInfo, NetworkError>;

    async fn get_user_info(
        &self,
        user: &RemoteUserId,
    ) -> Result<Option<RemoteUserInfo>, NetworkError> {
        let _ = user;
        Ok(None)
    }

    async fn handle_matrix_message(
        &self,
        message: &MatrixMessage,
    ) -> Result<PendingMessage, NetworkError>;

    /// Returns replacement metadata for the edited row, or `None` to
    /// keep it unchanged.
    async fn handle_matrix_edit(&self, edit: &MatrixEdit) -> Result<Option<Value>, NetworkError> {
        let _ = edit;
        Err(NetworkError::Unsupported("message edits"))
    }

    /// `Ok(None)` means the reaction was deliberately ignored.
    async fn handle_matrix_reaction(
        &self,
        reaction: &MatrixReaction,
    ) -> Result<Option<PendingReaction>, NetworkError> {
        let _ = reaction;
        Err(NetworkError::Unsupported("reactions"))
    }

    async fn handle_matrix_message_remove(
        &self,
        removal: &MatrixMessageRemove,
    ) -> Result<(), NetworkError> {
        let _ = removal;
        Err(NetworkError::Unsupported("message removal"))
    }

    async fn handle_matrix_reaction_remove(
        &self,
        removal: &MatrixReactionRemove,
    ) -> Result<(), NetworkError> {
        let _ = removal;
        Err(NetworkError::Unsupported("reaction removal"))
    }

    async fn handle_matrix_typing(&self, portal: &Portal, typing: bool) -> Result<(), NetworkError> {
        let _ = (portal, typing);
        Ok(())
    }

    async fn handle_matrix_read_receipt(
        &self,
        portal: &Portal,
        event: &EventId,
    ) -> Result<(), NetworkError> {
        let _ = (portal, event);
        Ok(())
    }
}
