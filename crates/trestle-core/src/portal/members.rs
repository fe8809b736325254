use std::sync::Arc;

use chrono::Utc;
use tracing::error;
use trestle_models::{
    EventType, MemberContent, Membership, RemoteUserId, UserId, WireContent,
};

use crate::matrix::MatrixIntent;
use crate::portal::Portal;
use crate::user::UserLogin;
use crate::CoreError;

impl Portal {
    /// Reconciles the room's membership with the remote chat's member
    /// list. Logged-in members join via their own intent (or get an
    /// invite when double-puppeting is unavailable); everyone gets a
    /// ghost. Without a relay, room members with no remote counterpart
    /// are removed.
    ///
    /// Returns the planned member ids, which double as the initial
    /// member list for room creation (the room may not exist yet).
    /// Per-user failures are logged; only member-list reads abort.
    pub async fn sync_participants(
        self: &Arc<Self>,
        members: &[RemoteUserId],
        source: &Arc<UserLogin>,
    ) -> Result<Vec<UserId>, CoreError> {
        let logins = self.bridge().get_user_logins_in_portal(&self.id).await?;
        let mut expected_user_ids: Vec<UserId> = Vec::with_capacity(members.len());
        let mut expected_extra_users: Vec<UserId> = Vec::new();
        let mut expected_intents: Vec<Option<Arc<dyn MatrixIntent>>> = vec![None; members.len()];

        for (i, member) in members.iter().enumerate() {
            for login in &logins {
                if login.client.is_this_user(member).await {
                    match self.bridge().matrix.user_intent(&login.user.mxid) {
                        Some(intent) => expected_intents[i] = Some(intent),
                        None => {
                            expected_extra_users.push(login.user.mxid.clone());
                            expected_user_ids.push(login.user.mxid.clone());
                        }
                    }
                    break;
                }
            }
            let ghost = self.bridge().get_ghost_by_id(member).await?;
            ghost.update_info_if_necessary(self.bridge(), source).await;
            let intent = expected_intents[i]
                .get_or_insert_with(|| ghost.intent.clone())
                .clone();
            expected_user_ids.push(intent.user_mxid().clone());
        }

        let Some(room) = self.mxid().await else {
            // Room not created yet; the caller uses the plan as the
            // initial member list.
            return Ok(expected_user_ids);
        };

        let mut current_members = self.bridge().matrix.get_members(&room).await?;
        for intent in expected_intents.into_iter().flatten() {
            let mxid = intent.user_mxid().clone();
            let membership = current_members
                .remove(&mxid)
                .map(|member| member.membership);
            if membership != Some(Membership::Join) {
                if let Err(err) = intent.ensure_joined(&room).await {
                    error!(user_id = %mxid, error = %err, "Failed to ensure user is joined");
                }
            }
        }

        let bot = self.bridge().matrix.bot();
        for mxid in expected_extra_users {
            let membership = current_members
                .remove(&mxid)
                .map(|member| member.membership);
            if !matches!(membership, Some(Membership::Join) | Some(Membership::Invite)) {
                if let Err(err) = bot.invite_user(&room, &mxid).await {
                    error!(user_id = %mxid, error = %err, "Failed to invite user");
                }
            }
        }

        if self.relay().await.is_none() {
            for (extra_member, member) in current_members {
                // The bot administers the room; it is never part of the
                // remote member list.
                if extra_member == *bot.user_mxid() {
                    continue;
                }
                if matches!(member.membership, Membership::Leave | Membership::Ban) {
                    continue;
                }
                let content = MemberContent {
                    membership: Membership::Leave,
                    displayname: member.displayname,
                    avatar_url: member.avatar_url,
                    reason: Some("User is not in remote chat".to_string()),
                };
                if let Err(err) = bot
                    .send_state(
                        &room,
                        EventType::Member,
                        extra_member.as_str(),
                        &WireContent::new(&content),
                        Utc::now(),
                    )
                    .await
                {
                    error!(user_id = %extra_member, error = %err, "Failed to remove user from room");
                }
            }
        }
        Ok(expected_user_ids)
    }
}
