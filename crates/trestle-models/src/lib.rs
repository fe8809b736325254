pub mod content;
pub mod event;
pub mod ids;
pub mod state;

pub use content::{
    InReplyTo, Membership, Mentions, MessageContent, ReactionContent, ReceiptContent,
    RedactionContent, RelatesTo, RelationType, TypingContent,
};
pub use event::{EventType, MatrixEvent, WireContent};
pub use ids::{
    AvatarId, BridgeId, ContentUri, EmojiId, EventId, LoginId, MessageId, PartId, PortalId,
    RemoteUserId, RoomId, UserId,
};
pub use state::{
    BridgeInfoContent, BridgeInfoSection, FunctionalMembersContent, MemberContent,
    PowerLevelsContent, RoomAvatarContent, RoomNameContent, RoomTopicContent, SpaceParentContent,
};
