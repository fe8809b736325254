mod create;
mod info;
mod matrix;
mod members;
mod remote;
mod typing;

use std::sync::{Arc, Mutex as StdMutex};

use futures_util::FutureExt;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{error, warn, Instrument};
use trestle_db::portals::PortalRow;
use trestle_models::{
    AvatarId, BridgeId, ContentUri, LoginId, MatrixEvent, PortalId, RoomId, UserId,
};

use crate::matrix::MatrixIntent;
use crate::network::{EventSender, RemoteEvent};
use crate::user::{User, UserLogin};
use crate::{Bridge, CoreError};

/// Mutable portal fields mirroring the stored row. The `*_set` flags
/// record whether the last persisted value was successfully published
/// to the room; they are meaningless while `mxid` is unset.
#[derive(Clone, Debug, Default)]
pub(crate) struct PortalState {
    pub mxid: Option<RoomId>,
    pub name: String,
    pub topic: String,
    pub avatar_id: AvatarId,
    pub avatar_mxc: ContentUri,
    pub avatar_hash: Option<[u8; 32]>,
    pub name_set: bool,
    pub topic_set: bool,
    pub avatar_set: bool,
    pub parent_id: Option<PortalId>,
    pub relay_login_id: Option<LoginId>,
}

/// One unit of work for a portal's pump.
pub enum PortalEvent {
    /// An event from the portal's room, delivered by the homeserver.
    Matrix {
        event: MatrixEvent,
        sender: Arc<User>,
    },
    /// An event from the remote network, delivered through a login.
    Remote {
        event: Box<dyn RemoteEvent>,
        source: Arc<UserLogin>,
    },
}

/// The durable per-conversation object mediating between one remote
/// chat and one room. All event handling for a portal runs on a single
/// pump task, so handlers never race each other.
pub struct Portal {
    bridge: Arc<Bridge>,
    pub bridge_id: BridgeId,
    pub id: PortalId,
    state: RwLock<PortalState>,
    parent: RwLock<Option<Arc<Portal>>>,
    relay: RwLock<Option<Arc<UserLogin>>>,
    pub(crate) currently_typing: StdMutex<Vec<UserId>>,
    pub(crate) room_create_lock: Mutex<()>,
    events_tx: StdMutex<Option<mpsc::Sender<PortalEvent>>>,
}

impl Portal {
    pub(crate) fn new(
        bridge: Arc<Bridge>,
        row: PortalRow,
        parent: Option<Arc<Portal>>,
        relay: Option<Arc<UserLogin>>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(bridge.config.event_queue_size);
        let typing_interval = bridge.config.typing_refresh_interval;
        let portal = Arc::new(Self {
            bridge,
            bridge_id: row.bridge_id,
            id: row.id,
            state: RwLock::new(PortalState {
                mxid: row.mxid,
                name: row.name,
                topic: row.topic,
                avatar_id: row.avatar_id,
                avatar_mxc: row.avatar_mxc,
                avatar_hash: row.avatar_hash,
                name_set: row.name_set,
                topic_set: row.topic_set,
                avatar_set: row.avatar_set,
                parent_id: row.parent_id,
                relay_login_id: row.relay_login_id,
            }),
            parent: RwLock::new(parent),
            relay: RwLock::new(relay),
            currently_typing: StdMutex::new(Vec::new()),
            room_create_lock: Mutex::new(()),
            events_tx: StdMutex::new(Some(tx)),
        });
        tokio::spawn(Self::event_loop(portal.clone(), rx));
        tokio::spawn(typing::periodic_typing_updater(
            Arc::downgrade(&portal),
            typing_interval,
        ));
        portal
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    pub async fn mxid(&self) -> Option<RoomId> {
        self.state.read().await.mxid.clone()
    }

    pub async fn name(&self) -> String {
        self.state.read().await.name.clone()
    }

    pub async fn topic(&self) -> String {
        self.state.read().await.topic.clone()
    }

    pub async fn parent(&self) -> Option<Arc<Portal>> {
        self.parent.read().await.clone()
    }

    pub async fn relay(&self) -> Option<Arc<UserLogin>> {
        self.relay.read().await.clone()
    }

    /// Designates (or clears) the login used to proxy for unlinked
    /// room members.
    pub async fn set_relay(&self, relay: Option<Arc<UserLogin>>) -> Result<(), CoreError> {
        {
            let mut state = self.state.write().await;
            state.relay_login_id = relay.as_ref().map(|login| login.id.clone());
        }
        *self.relay.write().await = relay;
        self.persist().await
    }

    pub async fn to_row(&self) -> PortalRow {
        let state = self.state.read().await;
        PortalRow {
            bridge_id: self.bridge_id.clone(),
            id: self.id.clone(),
            mxid: state.mxid.clone(),
            parent_id: state.parent_id.clone(),
            relay_login_id: state.relay_login_id.clone(),
            name: state.name.clone(),
            topic: state.topic.clone(),
            avatar_id: state.avatar_id.clone(),
            avatar_mxc: state.avatar_mxc.clone(),
            avatar_hash: state.avatar_hash,
            name_set: state.name_set,
            topic_set: state.topic_set,
            avatar_set: state.avatar_set,
        }
    }

    pub(crate) async fn persist(&self) -> Result<(), CoreError> {
        let row = self.to_row().await;
        trestle_db::portals::update(&self.bridge.db, &row).await?;
        Ok(())
    }

    pub(crate) fn state(&self) -> &RwLock<PortalState> {
        &self.state
    }

    /// Non-blocking enqueue. A full queue drops the event: later events
    /// re-derive most state, and blocking the caller would stall the
    /// source connection.
    pub fn queue_event(&self, event: PortalEvent) {
        let tx = self.events_tx.lock().unwrap().clone();
        let Some(tx) = tx else {
            warn!(portal_id = %self.id, "Dropping event for closed portal");
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                error!(portal_id = %self.id, "Portal event queue is full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(portal_id = %self.id, "Dropping event for closed portal");
            }
        }
    }

    /// Shuts the pump down once already-queued events drain.
    pub fn close(&self) {
        self.events_tx.lock().unwrap().take();
    }

    async fn event_loop(portal: Arc<Portal>, mut rx: mpsc::Receiver<PortalEvent>) {
        while let Some(event) = rx.recv().await {
            let fut = portal.dispatch(event);
            if std::panic::AssertUnwindSafe(fut).catch_unwind().await.is_err() {
                error!(portal_id = %portal.id, "Portal event handler panicked");
            }
        }
    }

    async fn dispatch(self: &Arc<Self>, event: PortalEvent) {
        let span = tracing::info_span!("portal_event", portal_id = %self.id);
        match event {
            PortalEvent::Matrix { event, sender } => {
                self.handle_matrix_event(sender, event).instrument(span).await;
            }
            PortalEvent::Remote { event, source } => {
                self.handle_remote_event(source, event).instrument(span).await;
            }
        }
    }

    /// Picks the login used to bridge an event sent by `user` in this
    /// portal. `Ok(None)` means "no direct login, use the relay".
    pub(crate) async fn find_preferred_login(
        &self,
        user: &Arc<User>,
    ) -> Result<Option<Arc<UserLogin>>, CoreError> {
        let login_ids =
            trestle_db::users::find_login_ids_by_portal(&self.bridge.db, &user.mxid, &self.id)
                .await?;
        for login_id in &login_ids {
            if let Some(login) = self.bridge.get_cached_login(login_id).await {
                return Ok(Some(login));
            }
        }
        if self.relay.read().await.is_some() {
            return Ok(None);
        }
        for login_id in user.login_ids() {
            if let Some(login) = self.bridge.get_cached_login(&login_id).await {
                warn!(
                    chosen_login_id = %login.id,
                    "No usable login rows for this portal, falling back to any login"
                );
                return Ok(Some(login));
            }
        }
        Err(CoreError::NotLoggedIn)
    }

    /// Picks the intent a remote event is bridged as: the source user's
    /// own intent for self-sent events, a double-puppet for other
    /// logged-in users, else the sender's ghost.
    pub(crate) async fn intent_for(
        &self,
        sender: &EventSender,
        source: &Arc<UserLogin>,
    ) -> Option<Arc<dyn MatrixIntent>> {
        if sender.is_from_me {
            if let Some(intent) = self.bridge.matrix.user_intent(&source.user.mxid) {
                return Some(intent);
            }
        }
        if let Some(login_id) = &sender.sender_login {
            if let Some(login) = self.bridge.get_cached_login(login_id).await {
                if let Some(intent) = self.bridge.matrix.user_intent(&login.user.mxid) {
                    return Some(intent);
                }
            }
        }
        let ghost = match self.bridge.get_ghost_by_id(&sender.sender).await {
            Ok(ghost) => ghost,
            Err(err) => {
                error!(error = %err, "Failed to get ghost for event sender");
                return None;
            }
        };
        ghost.update_info_if_necessary(&self.bridge, source).await;
        Some(ghost.intent.clone())
    }
}
