//! The per-connection control block.

use crate::pdu::FeatureSet;
use crate::pool::ContextQueue;

/// Local/Remote Request FSM state. The Local and Remote Request FSMs (LR/RR) share this set.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReqState {
    Disconnected,
    Idle,
    Active,
}

/// Cached result of the Version Exchange procedure.
///
/// Per invariant 3, `sent == true` implies no further `LL_VERSION_IND` is ever transmitted on
/// this connection; subsequent local initiations are satisfied entirely from this cache.
#[derive(Debug, Copy, Clone, Default)]
pub struct VersionExchangeCache {
    pub valid: bool,
    pub sent: bool,
    pub version_number: u8,
    pub company_id: u16,
    pub sub_version_number: u16,
}

/// Cached result of the Feature Exchange procedure.
///
/// Unlike version exchange, repeated local initiation always re-transmits — there is no
/// "at most once" rule for this procedure — so `sent` is only used to detect a duplicate
/// in-flight *remote* request (see [`crate::fsm::remote`]).
#[derive(Debug, Copy, Clone, Default)]
pub struct FeatureExchangeCache {
    pub valid: bool,
    pub sent: bool,
    pub features: FeatureSet,
}

impl Default for FeatureSet {
    fn default() -> Self {
        FeatureSet::empty()
    }
}

/// Per-connection state owned by the engine.
pub struct Connection {
    pub lr_state: ReqState,
    pub rr_state: ReqState,
    pub local_queue: ContextQueue,
    pub remote_queue: ContextQueue,
    pub vex: VersionExchangeCache,
    pub fex: FeatureExchangeCache,
}

impl Connection {
    /// Zeroes connection state: both request FSMs `DISCONNECTED`, queues empty, caches cleared.
    pub fn new() -> Self {
        Self {
            lr_state: ReqState::Disconnected,
            rr_state: ReqState::Disconnected,
            local_queue: ContextQueue::new(),
            remote_queue: ContextQueue::new(),
            vex: VersionExchangeCache::default(),
            fex: FeatureExchangeCache::default(),
        }
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}
