use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::debug;
use trestle_models::{MatrixEvent, TypingContent, UserId};

use crate::portal::Portal;

/// Walks two sorted slices and returns the elements only in `old`
/// (removed) and only in `new` (added).
pub(crate) fn sorted_diff(old: &[UserId], new: &[UserId]) -> (Vec<UserId>, Vec<UserId>) {
    let mut removed = Vec::new();
    let mut added = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < old.len() && j < new.len() {
        match old[i].cmp(&new[j]) {
            std::cmp::Ordering::Less => {
                removed.push(old[i].clone());
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                added.push(new[j].clone());
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
    }
    removed.extend_from_slice(&old[i..]);
    added.extend_from_slice(&new[j..]);
    (removed, added)
}

impl Portal {
    pub(crate) async fn handle_matrix_typing(self: &Arc<Self>, event: MatrixEvent) {
        let content: TypingContent = match serde_json::from_value(event.content.clone()) {
            Ok(content) => content,
            Err(_) => return,
        };
        let mut user_ids = content.user_ids;
        user_ids.sort();
        let (stopped, started) = {
            let mut current = self.currently_typing.lock().unwrap();
            let diff = sorted_diff(&current, &user_ids);
            *current = user_ids;
            diff
        };
        self.send_remote_typing(&stopped, false).await;
        self.send_remote_typing(&started, true).await;
    }

    async fn send_remote_typing(&self, users: &[UserId], typing: bool) {
        for user_mxid in users {
            let user = match self.bridge().get_user_by_mxid(user_mxid).await {
                Ok(user) => user,
                Err(err) => {
                    debug!(user_id = %user_mxid, error = %err, "Failed to resolve typing user");
                    continue;
                }
            };
            // Typing is only forwarded for users with a live direct
            // login; relayed users have no typing identity remote-side.
            let login = match self.find_preferred_login(&user).await {
                Ok(Some(login)) => login,
                _ => continue,
            };
            if let Err(err) = login.client.handle_matrix_typing(self, typing).await {
                debug!(user_id = %user_mxid, error = %err, "Failed to forward typing state");
            }
        }
    }

    /// Re-sends the typing state for everyone still typing so the
    /// remote side's indicator does not expire mid-composition.
    pub(crate) async fn refresh_remote_typing(&self) {
        let current = self.currently_typing.lock().unwrap().clone();
        if current.is_empty() {
            return;
        }
        self.send_remote_typing(&current, true).await;
    }
}

pub(crate) async fn periodic_typing_updater(portal: Weak<Portal>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so refreshes start one
    // full period after portal creation.
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(portal) = portal.upgrade() else {
            break;
        };
        portal.refresh_remote_typing().await;
    }
}
