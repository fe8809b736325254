use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info_span, warn, Instrument};
use trestle_db::messages::NewMessage;
use trestle_db::reactions::ReactionRow;
use trestle_models::{
    EventId, EventType, MatrixEvent, MemberContent, MessageContent, ReactionContent,
    ReceiptContent, RedactionContent,
};

use crate::network::{
    ExistingReactionLookup, MatrixEdit, MatrixMessage, MatrixMessageRemove, MatrixReaction,
    MatrixReactionRemove,
};
use crate::portal::Portal;
use crate::user::{OrigSender, User, UserLogin};

impl Portal {
    pub(crate) async fn handle_matrix_event(
        self: &Arc<Self>,
        sender: Arc<User>,
        event: MatrixEvent,
    ) {
        if event.event_type.is_ephemeral() {
            match event.event_type.clone() {
                EventType::Receipt => self.handle_matrix_receipts(event).await,
                EventType::Typing => self.handle_matrix_typing(event).await,
                _ => {}
            }
            return;
        }
        let span = info_span!(
            "handle_matrix_event",
            event_id = %event.id,
            sender = %sender.mxid,
        );
        self.handle_matrix_event_inner(sender, event).instrument(span).await;
    }

    async fn handle_matrix_event_inner(self: &Arc<Self>, sender: Arc<User>, event: MatrixEvent) {
        let login = match self.find_preferred_login(&sender).await {
            Ok(login) => login,
            Err(err) => {
                error!(error = %err, "Failed to get user login to handle room event");
                return;
            }
        };
        let (login, orig_sender) = match login {
            Some(login) => (login, None),
            None => {
                let Some(relay) = self.relay().await else {
                    error!("Preferred-login resolution chose the relay path without a relay");
                    return;
                };
                let member = match self.mxid().await {
                    Some(room) => self
                        .bridge()
                        .matrix
                        .get_member_info(&room, &sender.mxid)
                        .await
                        .unwrap_or_else(|err| {
                            warn!(error = %err, "Failed to get member info for relayed user");
                            None
                        }),
                    None => None,
                };
                let orig_sender = OrigSender {
                    user: sender.clone(),
                    member: member.unwrap_or_else(MemberContent::default),
                };
                (relay, Some(orig_sender))
            }
        };
        match event.event_type.clone() {
            EventType::RoomMessage | EventType::Sticker => {
                self.handle_matrix_message(login, orig_sender, event).await;
            }
            EventType::Reaction => {
                if orig_sender.is_some() {
                    debug!("Ignoring reaction event from relayed user");
                    return;
                }
                self.handle_matrix_reaction(login, event).await;
            }
            EventType::RoomRedaction => {
                self.handle_matrix_redaction(login, orig_sender, event).await;
            }
            // Room meta changes are accepted but not yet forwarded to
            // the remote network.
            EventType::RoomName
            | EventType::RoomTopic
            | EventType::RoomAvatar
            | EventType::RoomEncryption => {}
            _ => {}
        }
    }

    async fn handle_matrix_message(
        self: &Arc<Self>,
        login: Arc<UserLogin>,
        orig_sender: Option<OrigSender>,
        event: MatrixEvent,
    ) {
        let content: MessageContent = match serde_json::from_value(event.content.clone()) {
            Ok(content) => content,
            Err(err) => {
                error!(error = %err, "Unexpected message content shape");
                return;
            }
        };
        if let Some(target) = content
            .relates_to
            .as_ref()
            .and_then(|rel| rel.replace_id())
            .cloned()
        {
            return self
                .handle_matrix_edit(login, orig_sender, event, content, target)
                .await;
        }

        let caps = login.client.capabilities();
        let db = &self.bridge().db;
        let mut thread_root = None;
        if caps.threads {
            if let Some(thread_id) = content.relates_to.as_ref().and_then(|rel| rel.thread_parent())
            {
                thread_root = trestle_db::messages::get_part_by_mxid(db, thread_id)
                    .await
                    .unwrap_or_else(|err| {
                        error!(error = %err, "Failed to get thread root message");
                        None
                    });
            }
        }
        let mut reply_to = None;
        if caps.replies {
            let reply_id = content.relates_to.as_ref().and_then(|rel| {
                if caps.threads {
                    rel.non_fallback_reply_to()
                } else {
                    rel.reply_to()
                }
            });
            if let Some(reply_id) = reply_id {
                reply_to = trestle_db::messages::get_part_by_mxid(db, reply_id)
                    .await
                    .unwrap_or_else(|err| {
                        error!(error = %err, "Failed to get reply target message");
                        None
                    });
            }
        }
        let relates_to = thread_root
            .as_ref()
            .map(|row| row.row_id)
            .or_else(|| reply_to.as_ref().map(|row| row.row_id));

        let request = MatrixMessage {
            event: event.clone(),
            content,
            orig_sender,
            portal: self.clone(),
            thread_root,
            reply_to,
        };
        let message = match login.client.handle_matrix_message(&request).await {
            Ok(message) => message,
            Err(err) => {
                error!(error = %err, "Failed to bridge room message");
                return;
            }
        };
        // The sender may be a remote account the bridge has never seen;
        // make sure its ghost row exists before the message references it.
        if let Err(err) = self.bridge().get_ghost_by_id(&message.sender_id).await {
            warn!(error = %err, "Failed to ensure ghost row for message sender");
        }
        let mut metadata = message.metadata;
        metadata.insert("sender_mxid".to_string(), json!(event.sender.as_str()));
        let row = NewMessage {
            id: message.id,
            part_id: message.part_id,
            mxid: event.id.clone(),
            room_id: self.id.clone(),
            sender_id: message.sender_id,
            timestamp: message.timestamp,
            relates_to,
            metadata: serde_json::Value::Object(metadata),
        };
        if let Err(err) = trestle_db::messages::insert(db, &row).await {
            error!(error = %err, "Failed to save bridged message");
        }
    }

    async fn handle_matrix_edit(
        self: &Arc<Self>,
        login: Arc<UserLogin>,
        orig_sender: Option<OrigSender>,
        event: MatrixEvent,
        mut content: MessageContent,
        target: EventId,
    ) {
        let span = info_span!("edit", edit_target_mxid = %target);
        async {
            let edit_target =
                match trestle_db::messages::get_part_by_mxid(&self.bridge().db, &target).await {
                    Ok(Some(row)) => row,
                    Ok(None) => {
                        warn!("Edit target message not found");
                        return;
                    }
                    Err(err) => {
                        error!(error = %err, "Failed to get edit target message");
                        return;
                    }
                };
            if let Some(new_content) = content.new_content.take() {
                content = *new_content;
            }
            let request = MatrixEdit {
                event,
                content,
                orig_sender,
                portal: self.clone(),
                edit_target: edit_target.clone(),
            };
            match login.client.handle_matrix_edit(&request).await {
                Ok(Some(metadata)) => {
                    if let Err(err) = trestle_db::messages::update_metadata(
                        &self.bridge().db,
                        edit_target.row_id,
                        &metadata,
                    )
                    .await
                    {
                        error!(error = %err, "Failed to save edited message");
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    error!(error = %err, "Failed to bridge message edit");
                }
            }
        }
        .instrument(span)
        .await;
    }

    async fn handle_matrix_reaction(self: &Arc<Self>, login: Arc<UserLogin>, event: MatrixEvent) {
        let content: ReactionContent = match serde_json::from_value(event.content.clone()) {
            Ok(content) => content,
            Err(err) => {
                error!(error = %err, "Unexpected reaction content shape");
                return;
            }
        };
        let Some(target_mxid) = content.relates_to.event_id.clone() else {
            warn!("Reaction event is missing its target");
            return;
        };
        let target =
            match trestle_db::messages::get_part_by_mxid(&self.bridge().db, &target_mxid).await {
                Ok(Some(row)) => row,
                Ok(None) => {
                    warn!(target_mxid = %target_mxid, "Reaction target message not found");
                    return;
                }
                Err(err) => {
                    error!(error = %err, "Failed to get reaction target message");
                    return;
                }
            };
        let existing = ExistingReactionLookup::new(
            self.bridge().db.clone(),
            target.id.clone(),
            target.part_id.clone(),
        );
        let request = MatrixReaction {
            event: event.clone(),
            content,
            portal: self.clone(),
            target: target.clone(),
            existing,
        };
        match login.client.handle_matrix_reaction(&request).await {
            Ok(Some(reaction)) => {
                let row = ReactionRow {
                    message_id: target.id,
                    part_id: target.part_id,
                    sender_id: reaction.sender_id,
                    emoji_id: reaction.emoji_id,
                    room_id: self.id.clone(),
                    mxid: event.id,
                    timestamp: event.timestamp,
                    metadata: serde_json::Value::Object(reaction.metadata),
                };
                if let Err(err) = trestle_db::reactions::upsert(&self.bridge().db, &row).await {
                    error!(error = %err, "Failed to save reaction");
                }
            }
            Ok(None) => {
                debug!("Reaction was ignored by the connector");
            }
            Err(err) => {
                error!(error = %err, "Failed to bridge reaction");
            }
        }
    }

    async fn handle_matrix_redaction(
        self: &Arc<Self>,
        login: Arc<UserLogin>,
        orig_sender: Option<OrigSender>,
        event: MatrixEvent,
    ) {
        let content: RedactionContent = match serde_json::from_value(event.content.clone()) {
            Ok(content) => content,
            Err(err) => {
                error!(error = %err, "Unexpected redaction content shape");
                return;
            }
        };
        // Some servers put the target on the event, some in content.
        let Some(redacts) = event.redacts.clone().or_else(|| content.redacts.clone()) else {
            debug!("Redaction event has no target");
            return;
        };
        let db = &self.bridge().db;
        let target_message = match trestle_db::messages::get_part_by_mxid(db, &redacts).await {
            Ok(row) => row,
            Err(err) => {
                error!(error = %err, "Failed to get redaction target message");
                return;
            }
        };
        let target_reaction = match trestle_db::reactions::get_by_mxid(db, &redacts).await {
            Ok(row) => row,
            Err(err) => {
                error!(error = %err, "Failed to get redaction target reaction");
                return;
            }
        };
        if let Some(message) = target_message {
            let request = MatrixMessageRemove {
                event,
                content,
                orig_sender,
                portal: self.clone(),
                target: message.clone(),
            };
            match login.client.handle_matrix_message_remove(&request).await {
                Ok(()) => {
                    if let Err(err) = trestle_db::messages::delete(db, message.row_id).await {
                        error!(error = %err, "Failed to delete redacted message row");
                    }
                }
                Err(err) => {
                    error!(error = %err, "Failed to bridge message removal");
                }
            }
        } else if let Some(reaction) = target_reaction {
            let request = MatrixReactionRemove {
                event,
                content,
                orig_sender,
                portal: self.clone(),
                target: reaction.clone(),
            };
            match login.client.handle_matrix_reaction_remove(&request).await {
                Ok(()) => {
                    if let Err(err) = trestle_db::reactions::delete(db, &reaction).await {
                        error!(error = %err, "Failed to delete redacted reaction row");
                    }
                }
                Err(err) => {
                    error!(error = %err, "Failed to bridge reaction removal");
                }
            }
        } else {
            debug!(redacts = %redacts, "Redaction target not found");
        }
    }

    async fn handle_matrix_receipts(self: &Arc<Self>, event: MatrixEvent) {
        let content: ReceiptContent = match serde_json::from_value(event.content.clone()) {
            Ok(content) => content,
            Err(_) => return,
        };
        for (event_id, receipts) in content {
            for user_mxid in receipts.read.keys() {
                let user = match self.bridge().get_user_by_mxid(user_mxid).await {
                    Ok(user) => user,
                    Err(err) => {
                        debug!(error = %err, "Failed to resolve read receipt sender");
                        continue;
                    }
                };
                self.handle_matrix_read_receipt(&user, &event_id).await;
            }
        }
    }

    async fn handle_matrix_read_receipt(self: &Arc<Self>, user: &Arc<User>, event_id: &EventId) {
        // Receipts are best-effort; only forwarded when the user has a
        // live direct login.
        let login = match self.find_preferred_login(user).await {
            Ok(Some(login)) => login,
            _ => return,
        };
        if let Err(err) = login
            .client
            .handle_matrix_read_receipt(self, event_id)
            .await
        {
            debug!(error = %err, "Failed to forward read receipt");
        }
    }
}
