pub mod config;
pub mod error;
pub mod matrix;
pub mod network;
pub mod portal;
pub mod user;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;
use trestle_db::portals::PortalRow;
use trestle_db::DbPool;
use trestle_models::{BridgeId, LoginId, PortalId, RemoteUserId, RoomId, UserId};

pub use config::BridgeConfig;
pub use error::CoreError;
pub use matrix::{CreateRoomRequest, InitialStateEvent, MatrixConnector, MatrixError, MatrixIntent};
pub use network::{
    avatar_digest, Avatar, ChatInfo, ConvertedEdit, ConvertedMessage, ConvertedMessagePart,
    EditedMessagePart, EventSender, ExistingReactionLookup, MatrixEdit, MatrixMessage,
    MatrixMessageRemove, MatrixReaction, MatrixReactionRemove, MessageRef, NetworkCapabilities,
    NetworkClient, NetworkError, PendingMessage, PendingReaction, RemoteEvent, RemoteEventKind,
    RemoteUserInfo, ReuploadFn, ReuploadResult,
};
pub use portal::{Portal, PortalEvent};
pub use user::{Ghost, OrigSender, User, UserLogin};

#[derive(Default)]
struct PortalCache {
    by_id: HashMap<PortalId, Arc<Portal>>,
    by_mxid: HashMap<RoomId, Arc<Portal>>,
}

/// One bridge instance: the portal registry plus the caches of users,
/// logins and ghosts. Portals hold an `Arc` back to this; the cycle is
/// broken by [`Bridge::shutdown`] clearing the registry.
pub struct Bridge {
    pub id: BridgeId,
    pub db: DbPool,
    pub matrix: Arc<dyn MatrixConnector>,
    pub config: BridgeConfig,
    portals: Mutex<PortalCache>,
    users: Mutex<HashMap<UserId, Arc<User>>>,
    logins: Mutex<HashMap<LoginId, Arc<UserLogin>>>,
    ghosts: Mutex<HashMap<RemoteUserId, Arc<Ghost>>>,
}

impl Bridge {
    pub fn new(
        id: BridgeId,
        db: DbPool,
        matrix: Arc<dyn MatrixConnector>,
        config: BridgeConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            db,
            matrix,
            config,
            portals: Mutex::new(PortalCache::default()),
            users: Mutex::new(HashMap::new()),
            logins: Mutex::new(HashMap::new()),
            ghosts: Mutex::new(HashMap::new()),
        })
    }

    /// Fetches the portal for a remote chat, creating the row (but not
    /// the room) if the chat has never been seen.
    pub async fn get_portal_by_id(self: &Arc<Self>, id: &PortalId) -> Result<Arc<Portal>, CoreError> {
        let mut cache = self.portals.lock().await;
        self.locked_get_portal_by_id(&mut cache, id, false, &mut HashSet::new())
            .await?
            .ok_or_else(|| CoreError::Internal("portal insert returned no row".to_string()))
    }

    pub async fn get_existing_portal_by_id(
        self: &Arc<Self>,
        id: &PortalId,
    ) -> Result<Option<Arc<Portal>>, CoreError> {
        let mut cache = self.portals.lock().await;
        self.locked_get_portal_by_id(&mut cache, id, true, &mut HashSet::new())
            .await
    }

    pub async fn get_portal_by_mxid(
        self: &Arc<Self>,
        mxid: &RoomId,
    ) -> Result<Option<Arc<Portal>>, CoreError> {
        let mut cache = self.portals.lock().await;
        if let Some(portal) = cache.by_mxid.get(mxid) {
            return Ok(Some(portal.clone()));
        }
        match trestle_db::portals::get_by_mxid(&self.db, mxid).await? {
            Some(row) => {
                let portal = self.load_portal(&mut cache, row, &mut HashSet::new()).await?;
                Ok(Some(portal))
            }
            None => Ok(None),
        }
    }

    async fn locked_get_portal_by_id(
        self: &Arc<Self>,
        cache: &mut PortalCache,
        id: &PortalId,
        only_if_exists: bool,
        loading: &mut HashSet<PortalId>,
    ) -> Result<Option<Arc<Portal>>, CoreError> {
        if let Some(portal) = cache.by_id.get(id) {
            return Ok(Some(portal.clone()));
        }
        let row = match trestle_db::portals::get_by_id(&self.db, &self.id, id).await? {
            Some(row) => row,
            None if only_if_exists => return Ok(None),
            None => {
                let row = PortalRow {
                    bridge_id: self.id.clone(),
                    id: id.clone(),
                    ..PortalRow::default()
                };
                trestle_db::portals::insert(&self.db, &row).await?;
                row
            }
        };
        Ok(Some(self.load_portal(cache, row, loading).await?))
    }

    /// Adopts a portal row into the cache, eagerly materialising its
    /// parent. `loading` carries the ids already on the load path so a
    /// corrupt parent chain cannot recurse forever.
    async fn load_portal(
        self: &Arc<Self>,
        cache: &mut PortalCache,
        row: PortalRow,
        loading: &mut HashSet<PortalId>,
    ) -> Result<Arc<Portal>, CoreError> {
        loading.insert(row.id.clone());
        let parent = match &row.parent_id {
            Some(parent_id) if loading.contains(parent_id) => {
                warn!(
                    portal_id = %row.id,
                    parent_id = %parent_id,
                    "Refusing to load portal parent: cycle in parent chain"
                );
                None
            }
            Some(parent_id) => {
                Box::pin(self.locked_get_portal_by_id(cache, parent_id, false, loading)).await?
            }
            None => None,
        };
        let relay = match &row.relay_login_id {
            Some(login_id) => self.get_cached_login(login_id).await,
            None => None,
        };
        let portal = Portal::new(self.clone(), row, parent, relay);
        cache.by_id.insert(portal.id.clone(), portal.clone());
        if let Some(mxid) = portal.mxid().await {
            cache.by_mxid.insert(mxid, portal.clone());
        }
        Ok(portal)
    }

    /// Called by room creation once the room id exists.
    pub(crate) async fn register_portal_mxid(&self, portal: Arc<Portal>, mxid: RoomId) {
        self.portals.lock().await.by_mxid.insert(mxid, portal);
    }

    pub async fn get_user_by_mxid(&self, mxid: &UserId) -> Result<Arc<User>, CoreError> {
        {
            let users = self.users.lock().await;
            if let Some(user) = users.get(mxid) {
                return Ok(user.clone());
            }
        }
        trestle_db::users::ensure_user(&self.db, mxid).await?;
        let mut users = self.users.lock().await;
        Ok(users
            .entry(mxid.clone())
            .or_insert_with(|| Arc::new(User::new(mxid.clone())))
            .clone())
    }

    /// Registers a live remote login for a user. The connector calls
    /// this after authenticating.
    pub async fn add_user_login(
        &self,
        user_mxid: &UserId,
        login_id: LoginId,
        client: Arc<dyn NetworkClient>,
    ) -> Result<Arc<UserLogin>, CoreError> {
        let user = self.get_user_by_mxid(user_mxid).await?;
        trestle_db::users::insert_login(
            &self.db,
            &trestle_db::users::UserLoginRow {
                id: login_id.clone(),
                user_mxid: user_mxid.clone(),
                remote_name: String::new(),
            },
        )
        .await?;
        user.add_login(login_id.clone());
        let login = Arc::new(UserLogin {
            id: login_id.clone(),
            user,
            client,
        });
        self.logins.lock().await.insert(login_id, login.clone());
        Ok(login)
    }

    /// Marks a login as a participant of a portal, feeding
    /// preferred-login resolution.
    pub async fn link_login_to_portal(
        &self,
        login_id: &LoginId,
        portal_id: &PortalId,
    ) -> Result<(), CoreError> {
        trestle_db::users::link_login_to_portal(&self.db, login_id, portal_id).await?;
        Ok(())
    }

    pub async fn get_cached_login(&self, id: &LoginId) -> Option<Arc<UserLogin>> {
        self.logins.lock().await.get(id).cloned()
    }

    /// Live logins associated with a portal, in stable order.
    pub async fn get_user_logins_in_portal(
        &self,
        portal_id: &PortalId,
    ) -> Result<Vec<Arc<UserLogin>>, CoreError> {
        let ids = trestle_db::users::get_login_ids_in_portal(&self.db, portal_id).await?;
        let logins = self.logins.lock().await;
        Ok(ids.iter().filter_map(|id| logins.get(id).cloned()).collect())
    }

    /// Fetches the ghost for a remote user, creating its row on first
    /// reference.
    pub async fn get_ghost_by_id(&self, id: &RemoteUserId) -> Result<Arc<Ghost>, CoreError> {
        let mut ghosts = self.ghosts.lock().await;
        if let Some(ghost) = ghosts.get(id) {
            return Ok(ghost.clone());
        }
        let row = match trestle_db::ghosts::get_by_id(&self.db, id).await? {
            Some(row) => row,
            None => {
                let row = trestle_db::ghosts::GhostRow {
                    id: id.clone(),
                    metadata: serde_json::json!({}),
                    ..trestle_db::ghosts::GhostRow::default()
                };
                trestle_db::ghosts::insert(&self.db, &row).await?;
                row
            }
        };
        let ghost = Arc::new(Ghost::new(id.clone(), self.matrix.ghost_intent(id), row));
        ghosts.insert(id.clone(), ghost.clone());
        Ok(ghost)
    }

    /// Stops all portal pumps and drops every cached object. Required
    /// before dropping the bridge: portals reference it back.
    pub async fn shutdown(&self) {
        let mut cache = self.portals.lock().await;
        for portal in cache.by_id.values() {
            portal.close();
        }
        cache.by_id.clear();
        cache.by_mxid.clear();
        drop(cache);
        self.logins.lock().await.clear();
        self.users.lock().await.clear();
        self.ghosts.lock().await.clear();
    }
}
