use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifies one bridge instance. Part of the portal primary key.
    BridgeId
);
string_id!(
    /// Remote-network identifier of one conversation.
    PortalId
);
string_id!(
    /// Remote-network identifier of one logical message.
    MessageId
);
string_id!(
    /// Distinguishes the pieces of a remote message that bridges into
    /// several room events. Empty for single-part messages.
    PartId
);
string_id!(
    /// Remote-network identifier of a user.
    RemoteUserId
);
string_id!(
    /// Identifier of one set of remote credentials owned by a local user.
    LoginId
);
string_id!(
    /// Remote-network identifier of a reaction emoji.
    EmojiId
);
string_id!(
    /// Remote-network identifier of an avatar image.
    AvatarId
);

string_id!(
    /// Homeserver-side room identifier (`!room:server`).
    RoomId
);
string_id!(
    /// Homeserver-side event identifier (`$event`).
    EventId
);
string_id!(
    /// Homeserver-side user identifier (`@user:server`).
    UserId
);
string_id!(
    /// Homeserver content repository URI (`mxc://server/media`).
    ContentUri
);
