use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{ContentUri, EventId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationType {
    #[serde(rename = "m.replace")]
    Replace,
    #[serde(rename = "m.thread")]
    Thread,
    #[serde(rename = "m.annotation")]
    Annotation,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InReplyTo {
    pub event_id: EventId,
}

/// The `m.relates_to` block tying an event to an earlier one: edits,
/// threads, replies, and reaction annotations all ride on it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RelatesTo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rel_type: Option<RelationType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
    /// Annotation key (the reaction emoji).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "m.in_reply_to", skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<InReplyTo>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_falling_back: bool,
}

impl RelatesTo {
    /// Target of an `m.replace` edit, if this is one.
    pub fn replace_id(&self) -> Option<&EventId> {
        match self.rel_type {
            Some(RelationType::Replace) => self.event_id.as_ref(),
            _ => None,
        }
    }

    /// Root of the thread this event belongs to, if any.
    pub fn thread_parent(&self) -> Option<&EventId> {
        match self.rel_type {
            Some(RelationType::Thread) => self.event_id.as_ref(),
            _ => None,
        }
    }

    pub fn reply_to(&self) -> Option<&EventId> {
        self.in_reply_to.as_ref().map(|r| &r.event_id)
    }

    /// Reply target, ignoring the synthetic reply that thread-capable
    /// clients attach as a fallback for thread-unaware ones.
    pub fn non_fallback_reply_to(&self) -> Option<&EventId> {
        if self.is_falling_back && matches!(self.rel_type, Some(RelationType::Thread)) {
            return None;
        }
        self.reply_to()
    }

    pub fn set_thread(&mut self, root: &EventId, last_in_thread: &EventId) {
        self.rel_type = Some(RelationType::Thread);
        self.event_id = Some(root.clone());
        // Thread fallback reply pointing at the previous thread event.
        if self.in_reply_to.is_none() {
            self.in_reply_to = Some(InReplyTo {
                event_id: last_in_thread.clone(),
            });
            self.is_falling_back = true;
        }
    }

    pub fn set_reply(&mut self, target: &EventId) {
        self.in_reply_to = Some(InReplyTo {
            event_id: target.clone(),
        });
        self.is_falling_back = false;
    }

    pub fn set_replace(&mut self, target: &EventId) {
        self.rel_type = Some(RelationType::Replace);
        self.event_id = Some(target.clone());
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Mentions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_ids: Vec<UserId>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub room: bool,
}

impl Mentions {
    pub fn add_user(&mut self, user: UserId) {
        if !self.user_ids.contains(&user) {
            self.user_ids.push(user);
        }
    }
}

/// Body of `m.room.message` and `m.sticker` events.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msgtype: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<ContentUri>,
    #[serde(rename = "m.relates_to", skip_serializing_if = "Option::is_none")]
    pub relates_to: Option<RelatesTo>,
    #[serde(rename = "m.mentions", skip_serializing_if = "Option::is_none")]
    pub mentions: Option<Mentions>,
    #[serde(rename = "m.new_content", skip_serializing_if = "Option::is_none")]
    pub new_content: Option<Box<MessageContent>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            msgtype: Some("m.text".to_string()),
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn relates_to_mut(&mut self) -> &mut RelatesTo {
        self.relates_to.get_or_insert_with(RelatesTo::default)
    }

    pub fn mentions_mut(&mut self) -> &mut Mentions {
        self.mentions.get_or_insert_with(Mentions::default)
    }

    /// Turns this content into an edit of `target`: the real payload
    /// moves into `m.new_content` and the top level becomes the
    /// fallback rendition.
    pub fn set_edit(&mut self, target: &EventId) {
        let mut inner = self.clone();
        inner.relates_to = None;
        inner.mentions = None;
        self.new_content = Some(Box::new(inner));
        self.relates_to_mut().set_replace(target);
        self.body = format!("* {}", self.body);
        if let Some(formatted) = &self.formatted_body {
            self.formatted_body = Some(format!("* {formatted}"));
        }
    }
}

/// Body of `m.reaction` events.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReactionContent {
    #[serde(rename = "m.relates_to")]
    pub relates_to: RelatesTo,
}

impl ReactionContent {
    pub fn new(target: EventId, key: impl Into<String>) -> Self {
        Self {
            relates_to: RelatesTo {
                rel_type: Some(RelationType::Annotation),
                event_id: Some(target),
                key: Some(key.into()),
                ..RelatesTo::default()
            },
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RedactionContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redacts: Option<EventId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TypingContent {
    pub user_ids: Vec<UserId>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Receipt {
    pub ts: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReceiptsByType {
    #[serde(rename = "m.read", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub read: BTreeMap<UserId, Receipt>,
}

/// Body of `m.receipt` ephemeral events: event id to receipts.
pub type ReceiptContent = BTreeMap<EventId, ReceiptsByType>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    Join,
    Invite,
    #[default]
    Leave,
    Ban,
    Knock,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_id_requires_replace_rel_type() {
        let mut rel = RelatesTo::default();
        rel.event_id = Some(EventId::from("$target"));
        assert_eq!(rel.replace_id(), None);
        rel.rel_type = Some(RelationType::Replace);
        assert_eq!(rel.replace_id().map(EventId::as_str), Some("$target"));
    }

    #[test]
    fn thread_fallback_reply_is_filtered() {
        let mut rel = RelatesTo::default();
        rel.set_thread(&EventId::from("$root"), &EventId::from("$last"));
        assert_eq!(rel.thread_parent().map(EventId::as_str), Some("$root"));
        assert_eq!(rel.reply_to().map(EventId::as_str), Some("$last"));
        assert_eq!(rel.non_fallback_reply_to(), None);

        rel.set_reply(&EventId::from("$explicit"));
        assert_eq!(
            rel.non_fallback_reply_to().map(EventId::as_str),
            Some("$explicit")
        );
    }

    #[test]
    fn set_edit_wraps_content_and_prefixes_fallback() {
        let mut content = MessageContent::text("hello");
        content.set_edit(&EventId::from("$orig"));
        assert_eq!(content.body, "* hello");
        let inner = content.new_content.as_ref().unwrap();
        assert_eq!(inner.body, "hello");
        assert!(inner.relates_to.is_none());
        assert_eq!(
            content
                .relates_to
                .as_ref()
                .and_then(|r| r.replace_id())
                .map(EventId::as_str),
            Some("$orig")
        );
    }

    #[test]
    fn mentions_deduplicate() {
        let mut mentions = Mentions::default();
        mentions.add_user(UserId::from("@a:x"));
        mentions.add_user(UserId::from("@a:x"));
        assert_eq!(mentions.user_ids.len(), 1);
    }
}
