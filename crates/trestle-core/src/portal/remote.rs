use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info_span, warn, Instrument};
use trestle_db::messages::{MessageRow, NewMessage};
use trestle_models::{EventType, RedactionContent, UserId, WireContent};

use crate::network::{MessageRef, RemoteEvent, RemoteEventKind};
use crate::portal::Portal;
use crate::user::UserLogin;

impl Portal {
    pub(crate) async fn handle_remote_event(
        self: &Arc<Self>,
        source: Arc<UserLogin>,
        event: Box<dyn RemoteEvent>,
    ) {
        let span = info_span!("handle_remote_event", source_id = %source.id);
        event.add_log_context(&span);
        self.handle_remote_event_inner(source, event).instrument(span).await;
    }

    async fn handle_remote_event_inner(
        self: &Arc<Self>,
        source: Arc<UserLogin>,
        event: Box<dyn RemoteEvent>,
    ) {
        if self.mxid().await.is_none() {
            if !event.should_create_portal() {
                return;
            }
            if let Err(err) = self.create_matrix_room(&source).await {
                error!(error = %err, "Failed to create room to handle event");
                return;
            }
        }
        match event.kind() {
            RemoteEventKind::Message => self.handle_remote_message(&source, event.as_ref()).await,
            RemoteEventKind::Edit => self.handle_remote_edit(&source, event.as_ref()).await,
            // Contracts reserved: accepted and dropped until remote
            // reaction/removal bridging lands.
            RemoteEventKind::Reaction
            | RemoteEventKind::ReactionRemove
            | RemoteEventKind::MessageRemove => {
                debug!(kind = ?event.kind(), "Remote event kind accepted but not bridged yet");
            }
        }
    }

    async fn resolve_remote_ref(&self, reference: &MessageRef) -> Option<MessageRow> {
        trestle_db::messages::get_first_or_specific_part_by_id(
            &self.bridge().db,
            &self.id,
            &reference.id,
            reference.part.as_ref(),
        )
        .await
        .unwrap_or_else(|err| {
            error!(error = %err, "Failed to resolve referenced message");
            None
        })
    }

    async fn handle_remote_message(
        self: &Arc<Self>,
        source: &Arc<UserLogin>,
        event: &dyn RemoteEvent,
    ) {
        let db = &self.bridge().db;
        match trestle_db::messages::get_first_part_by_id(db, &self.id, &event.id()).await {
            Ok(Some(existing)) => {
                debug!(existing_mxid = %existing.mxid, "Ignoring duplicate remote message");
                return;
            }
            Ok(None) => {}
            Err(err) => {
                error!(error = %err, "Failed to check if message is a duplicate");
            }
        }
        let sender = event.sender();
        let Some(intent) = self.intent_for(&sender, source).await else {
            return;
        };
        let converted = match event.convert_message(self, &intent).await {
            Ok(converted) => converted,
            Err(err) => {
                error!(error = %err, "Failed to convert remote message");
                return;
            }
        };
        let Some(room) = self.mxid().await else {
            return;
        };

        let mut reply_to = None;
        if let Some(reference) = &converted.reply_to {
            reply_to = self.resolve_remote_ref(reference).await;
        }
        let mut thread_root = None;
        if let Some(reference) = &converted.thread_root {
            thread_root = self.resolve_remote_ref(reference).await;
        }
        // Thread membership wins over the reply link for the stored
        // relation.
        let relates_to = thread_root
            .as_ref()
            .map(|row| row.row_id)
            .or_else(|| reply_to.as_ref().map(|row| row.row_id));
        let mut prev_thread_event = thread_root.clone();

        for part in converted.parts {
            let mut content = part.content;
            if let (Some(root), Some(prev)) = (&thread_root, &prev_thread_event) {
                content.relates_to_mut().set_thread(&root.mxid, &prev.mxid);
            }
            if let Some(reply) = &reply_to {
                content.relates_to_mut().set_reply(&reply.mxid);
                // Replies ping the original sender on the homeserver
                // side; mirror that for bridged messages.
                if let Some(sender_mxid) = reply.sender_mxid() {
                    content.mentions_mut().add_user(UserId::from(sender_mxid));
                }
            }
            let wire = match &part.extra {
                Some(extra) => WireContent::with_raw(&content, extra.clone()),
                None => WireContent::new(&content),
            };
            let event_id = match intent
                .send_message(&room, part.event_type.clone(), &wire, converted.timestamp)
                .await
            {
                Ok(event_id) => event_id,
                Err(err) => {
                    error!(part_id = %part.id, error = %err, "Failed to send message part");
                    continue;
                }
            };
            let mut metadata = part.metadata;
            metadata.insert(
                "sender_mxid".to_string(),
                json!(intent.user_mxid().as_str()),
            );
            let row = NewMessage {
                id: event.id(),
                part_id: part.id.clone(),
                mxid: event_id,
                room_id: self.id.clone(),
                sender_id: sender.sender.clone(),
                timestamp: converted.timestamp,
                relates_to,
                metadata: serde_json::Value::Object(metadata),
            };
            match trestle_db::messages::insert(db, &row).await {
                Ok(inserted) => {
                    // Later parts of this batch thread off the part
                    // just sent.
                    if prev_thread_event.is_some() {
                        prev_thread_event = Some(inserted);
                    }
                }
                Err(err) => {
                    error!(part_id = %part.id, error = %err, "Failed to save message part");
                }
            }
        }
    }

    async fn handle_remote_edit(
        self: &Arc<Self>,
        source: &Arc<UserLogin>,
        event: &dyn RemoteEvent,
    ) {
        let Some(target) = event.target_message() else {
            warn!("Remote edit has no target message");
            return;
        };
        let db = &self.bridge().db;
        let existing = match trestle_db::messages::get_all_parts_by_id(db, &self.id, &target).await
        {
            Ok(existing) => existing,
            Err(err) => {
                error!(error = %err, "Failed to get edit target message");
                return;
            }
        };
        if existing.is_empty() {
            warn!(target = %target, "Edit target message not found");
            return;
        }
        let sender = event.sender();
        let Some(intent) = self.intent_for(&sender, source).await else {
            return;
        };
        let converted = match event.convert_edit(self, &intent, &existing).await {
            Ok(converted) => converted,
            Err(err) => {
                error!(error = %err, "Failed to convert remote edit");
                return;
            }
        };
        let Some(room) = self.mxid().await else {
            return;
        };

        for part in converted.modified {
            let mut content = part.content;
            content.set_edit(&part.target.mxid);
            let mut top_level = part.top_level_extra.unwrap_or_default();
            if let Some(extra) = part.extra {
                top_level.insert(
                    "m.new_content".to_string(),
                    serde_json::Value::Object(extra),
                );
            }
            let wire = if top_level.is_empty() {
                WireContent::new(&content)
            } else {
                WireContent::with_raw(&content, top_level)
            };
            if let Err(err) = intent
                .send_message(&room, part.event_type, &wire, converted.timestamp)
                .await
            {
                error!(part_mxid = %part.target.mxid, error = %err, "Failed to edit message part");
            }
            if let Some(metadata) = part.metadata {
                if let Err(err) =
                    trestle_db::messages::update_metadata(db, part.target.row_id, &metadata).await
                {
                    error!(part_rowid = part.target.row_id, error = %err, "Failed to update edited part");
                }
            }
        }
        for part in converted.deleted {
            let content = RedactionContent {
                redacts: Some(part.mxid.clone()),
                reason: None,
            };
            if let Err(err) = intent
                .send_message(
                    &room,
                    EventType::RoomRedaction,
                    &WireContent::new(&content),
                    converted.timestamp,
                )
                .await
            {
                error!(part_mxid = %part.mxid, error = %err, "Failed to redact part deleted in edit");
            }
            if let Err(err) = trestle_db::messages::delete(db, part.row_id).await {
                error!(part_rowid = part.row_id, error = %err, "Failed to delete message part row");
            }
        }
    }
}
