use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use trestle_db::ghosts::GhostRow;
use trestle_models::{LoginId, MemberContent, RemoteUserId, UserId};

use crate::matrix::MatrixIntent;
use crate::network::NetworkClient;
use crate::Bridge;

/// A homeserver user known to the bridge.
pub struct User {
    pub mxid: UserId,
    login_ids: Mutex<Vec<LoginId>>,
}

impl User {
    pub(crate) fn new(mxid: UserId) -> Self {
        Self {
            mxid,
            login_ids: Mutex::new(Vec::new()),
        }
    }

    /// Ids of this user's logins that are live in this process.
    pub fn login_ids(&self) -> Vec<LoginId> {
        self.login_ids.lock().unwrap().clone()
    }

    pub(crate) fn add_login(&self, id: LoginId) {
        let mut ids = self.login_ids.lock().unwrap();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
}

/// One set of remote-network credentials owned by a local user, with
/// its live client.
pub struct UserLogin {
    pub id: LoginId,
    pub user: Arc<User>,
    pub client: Arc<dyn NetworkClient>,
}

/// Carries the real sender's identity when an event is forwarded
/// through the portal's relay login.
#[derive(Clone)]
pub struct OrigSender {
    pub user: Arc<User>,
    pub member: MemberContent,
}

/// Virtual homeserver user standing in for a remote-network account.
pub struct Ghost {
    pub id: RemoteUserId,
    pub intent: Arc<dyn MatrixIntent>,
    row: AsyncMutex<GhostRow>,
}

impl Ghost {
    pub(crate) fn new(id: RemoteUserId, intent: Arc<dyn MatrixIntent>, row: GhostRow) -> Self {
        Self {
            id,
            intent,
            row: AsyncMutex::new(row),
        }
    }

    pub async fn name(&self) -> String {
        self.row.lock().await.name.clone()
    }

    /// Re-fetches the remote profile through the source login's client
    /// when the stored one is older than the configured TTL. Errors are
    /// logged; a stale profile is not worth failing the event for.
    pub async fn update_info_if_necessary(&self, bridge: &Bridge, source: &Arc<UserLogin>) {
        let ttl = chrono::Duration::from_std(bridge.config.ghost_info_ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let stale = {
            let row = self.row.lock().await;
            match row.last_sync {
                None => true,
                Some(last) => Utc::now() - last > ttl,
            }
        };
        if !stale {
            return;
        }
        match source.client.get_user_info(&self.id).await {
            Ok(info) => {
                let updated = {
                    let mut row = self.row.lock().await;
                    if let Some(info) = info {
                        if let Some(name) = info.name {
                            row.name = name;
                        }
                        if let Some(avatar_id) = info.avatar_id {
                            row.avatar_id = avatar_id;
                        }
                    }
                    row.last_sync = Some(Utc::now());
                    row.clone()
                };
                if let Err(err) = trestle_db::ghosts::update(&bridge.db, &updated).await {
                    tracing::warn!(ghost_id = %self.id, error = %err, "Failed to save ghost profile");
                }
            }
            Err(err) => {
                tracing::warn!(ghost_id = %self.id, error = %err, "Failed to fetch remote user profile");
            }
        }
    }
}
