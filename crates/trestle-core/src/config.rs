use std::time::Duration;

use trestle_models::BridgeInfoSection;

/// Settings for one bridge instance. Constructed by the embedding
/// connector; everything has a workable default.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Identity of the bridged protocol, published in bridge-info state
    /// events.
    pub protocol: BridgeInfoSection,
    /// How often typing state is re-sent to the remote network while
    /// room members keep typing.
    pub typing_refresh_interval: Duration,
    /// Capacity of each portal's event queue. Enqueues beyond this are
    /// dropped.
    pub event_queue_size: usize,
    /// How long ghost profiles stay fresh before the next event
    /// triggers a re-fetch.
    pub ghost_info_ttl: Duration,
    /// Whether the homeserver honors auto-join invites on room
    /// creation. When set, initial members are invited in the create
    /// call and the post-create membership pass is skipped.
    pub auto_join_invites: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            protocol: BridgeInfoSection::default(),
            typing_refresh_interval: Duration::from_secs(5),
            event_queue_size: 64,
            ghost_info_ttl: Duration::from_secs(24 * 60 * 60),
            auto_join_invites: false,
        }
    }
}
