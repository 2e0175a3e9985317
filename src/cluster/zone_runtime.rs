//! The per-cluster, per-zone runtime shadow (§3, §4.4 P7).

use std::time::Instant;

/// Reconciliation-scoped state for one zone within one cluster.
///
/// Cleared whenever the cluster resets (`cache.reset`) or re-initialises
/// from a `STANDBY` node coming back (§4.4 P6).
#[derive(Default)]
pub struct ZoneRuntime {
    /// Zone content last fetched via `ZoneInput::fetch`, and when.
    pub content: Option<(String, Instant)>,
    /// Whether `ZoneAdd` has been applied successfully this pass.
    pub setup_done: bool,
    /// Set while a zone is mid per-zone processing, to avoid P7
    /// re-entering it from another concurrent trigger.
    pub locked: bool,
    /// Set once the owning Cluster Manager has been told to drop this
    /// zone; removed on the next tick once safe (§3 lifecycles).
    pub pending_remove: bool,
}

impl ZoneRuntime {
    pub fn clear_cache(&mut self) {
        self.content = None;
        self.setup_done = false;
    }
}
