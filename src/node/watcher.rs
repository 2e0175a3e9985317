//! The Node Watcher: owns the node set, probes liveness, and fans work
//! out across nodes (§4.2).

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use uuid::Uuid;

use crate::error::OrrError;
use crate::node::entry::{NodeEntry, NodeMode, NodeState};
use crate::rpc::{NodeRpcClient, NodeVersions, UpsertOutcome, ZoneAddOutcome};

/// Owns a cluster's set of nodes exclusively; a Cluster Manager drives it
/// from its own single reconciliation task, so no internal locking is
/// needed here (§5: "each Cluster Manager owns its Node Watcher
/// exclusively").
pub struct NodeWatcher {
    nodes: HashMap<Uuid, NodeEntry>,
    /// How long a node may go without a successful `Ping` before one is
    /// due again while `ONLINE`/`STANDBY` (§4.2 step 2), taken from
    /// `Config::version_skew`.
    probe_interval: Duration,
}

impl NodeWatcher {
    pub fn new(probe_interval: Duration) -> Self {
        Self { nodes: HashMap::new(), probe_interval }
    }

    /// Add a node. Fails if the uuid is already present or the URI is
    /// malformed.
    pub fn add(&mut self, uuid: Uuid, uri: String, mode: NodeMode) -> Result<(), OrrError> {
        if self.nodes.contains_key(&uuid) {
            return Err(OrrError::Config(format!("node {uuid} already exists")));
        }
        let client = NodeRpcClient::new(&uri)?;
        self.nodes.insert(uuid, NodeEntry::new(uuid, uri, mode, client));
        Ok(())
    }

    /// Mark a node for removal; it is dropped on the next tick, never
    /// mid-RPC (§3 lifecycles).
    pub fn remove(&mut self, uuid: Uuid) {
        if let Some(entry) = self.nodes.get_mut(&uuid) {
            entry.pending_remove = true;
        }
    }

    pub fn set_state(&mut self, uuid: Uuid, state: NodeState) {
        if let Some(entry) = self.nodes.get_mut(&uuid) {
            entry.state = state;
        }
    }

    pub fn state_of(&self, uuid: Uuid) -> Option<NodeState> {
        self.nodes.get(&uuid).map(|e| e.state)
    }

    pub fn node_uuids(&self) -> Vec<Uuid> {
        self.nodes.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Count nodes currently in each of `FAILURE`/`OFFLINE`/`STANDBY`, for
    /// P6's cluster-state computation.
    pub fn state_totals(&self) -> StateTotals {
        let mut totals = StateTotals::default();
        for entry in self.nodes.values() {
            totals.total += 1;
            match entry.state {
                NodeState::Failure => totals.failure += 1,
                NodeState::Offline => totals.offline += 1,
                NodeState::Standby => totals.standby += 1,
                NodeState::Unknown => totals.unknown += 1,
                NodeState::Online => totals.online += 1,
                NodeState::Disabled => {}
            }
        }
        totals
    }

    /// How many `PRIMARY` nodes are currently `ONLINE`, for the `BACKUP`
    /// mode quorum rule (DESIGN.md Open Question 3).
    pub fn online_primary_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|e| e.mode == NodeMode::Primary && e.state == NodeState::Online)
            .count()
    }

    /// Probe liveness on every node that's due one, and drop any node
    /// marked `pending_remove`.
    pub async fn tick(&mut self) {
        let to_remove: Vec<Uuid> = self
            .nodes
            .values()
            .filter(|e| e.pending_remove)
            .map(|e| e.uuid)
            .collect();
        for uuid in to_remove {
            self.nodes.remove(&uuid);
        }

        let mut handles = Vec::new();
        for entry in self.nodes.values() {
            if entry.ping_due(self.probe_interval) {
                let client = entry.client.clone();
                handles.push((entry.uuid, tokio::spawn(async move { client.ping().await })));
            }
        }

        for (uuid, handle) in handles {
            let result = handle
                .await
                .unwrap_or_else(|_| Err(OrrError::Invariant("ping task panicked".into())));
            if let Some(entry) = self.nodes.get_mut(&uuid) {
                entry.apply_ping_result(result);
            }
        }
    }

    /// Run `op` concurrently against every callable node in `node_uuids`,
    /// and collect a `uuid -> result` map. Nodes that aren't callable, and
    /// nodes whose RPC failed, both map to `None` — the caller is
    /// responsible for deciding what a missing entry means (§4.4 P1-P5
    /// each do this differently).
    async fn fan_out<T, F, Fut>(&self, node_uuids: &[Uuid], op: F) -> HashMap<Uuid, Option<T>>
    where
        T: Send + 'static,
        F: Fn(NodeRpcClient) -> Fut,
        Fut: Future<Output = Result<T, OrrError>> + Send + 'static,
    {
        let mut out = HashMap::new();
        let mut handles = Vec::new();

        for uuid in node_uuids {
            let Some(entry) = self.nodes.get(uuid) else { continue };
            if !entry.state.is_callable() {
                out.insert(*uuid, None);
                continue;
            }
            let fut = op(entry.client.clone());
            handles.push((*uuid, tokio::spawn(fut)));
        }

        for (uuid, handle) in handles {
            let result = handle
                .await
                .unwrap_or_else(|_| Err(OrrError::Invariant("fan-out task panicked".into())));
            if let Err(ref err) = result {
                tracing::warn!(%uuid, %err, "fan-out RPC failed");
            }
            out.insert(uuid, result.ok());
        }

        out
    }

    pub async fn versions(&self, node_uuids: &[Uuid]) -> HashMap<Uuid, Option<NodeVersions>> {
        self.fan_out(node_uuids, |client| async move { client.versions().await })
            .await
    }

    pub async fn setup_hsm(
        &self,
        node_uuids: &[Uuid],
        data: &serde_json::Value,
    ) -> HashMap<Uuid, Option<UpsertOutcome>> {
        let data = data.clone();
        self.fan_out(node_uuids, move |client| {
            let data = data.clone();
            async move { client.setup_hsm(data).await }
        })
        .await
    }

    pub async fn setup_policy(
        &self,
        node_uuids: &[Uuid],
        data: &serde_json::Value,
    ) -> HashMap<Uuid, Option<UpsertOutcome>> {
        let data = data.clone();
        self.fan_out(node_uuids, move |client| {
            let data = data.clone();
            async move { client.setup_policy(data).await }
        })
        .await
    }

    pub async fn start_opendnssec(&self, node_uuids: &[Uuid]) -> HashMap<Uuid, Option<()>> {
        self.fan_out(node_uuids, |client| async move { client.start_opendnssec().await })
            .await
    }

    pub async fn reload_opendnssec(&self, node_uuids: &[Uuid]) -> HashMap<Uuid, Option<()>> {
        self.fan_out(node_uuids, |client| async move { client.reload_opendnssec().await })
            .await
    }

    pub async fn zone_remove(&self, node_uuids: &[Uuid], name: &str) -> HashMap<Uuid, Option<()>> {
        let name = name.to_string();
        self.fan_out(node_uuids, move |client| {
            let name = name.clone();
            async move { client.zone_remove(name).await }
        })
        .await
    }

    pub async fn zone_add(
        &self,
        node_uuids: &[Uuid],
        name: &str,
        content: &str,
        policy_data: &serde_json::Value,
    ) -> HashMap<Uuid, Option<ZoneAddOutcome>> {
        let name = name.to_string();
        let content = content.to_string();
        let policy_data = policy_data.clone();
        self.fan_out(node_uuids, move |client| {
            let name = name.clone();
            let content = content.clone();
            let policy_data = policy_data.clone();
            async move { client.zone_add(name, content, policy_data).await }
        })
        .await
    }
}

/// Per-cluster node state tallies, used by §4.4 P6.
#[derive(Default, Debug, Clone, Copy)]
pub struct StateTotals {
    pub total: usize,
    pub failure: usize,
    pub offline: usize,
    pub standby: usize,
    pub unknown: usize,
    pub online: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_rejects_duplicate_uuid() {
        let mut watcher = NodeWatcher::new(Duration::from_secs(30));
        let uuid = Uuid::new_v4();
        watcher.add(uuid, "http://127.0.0.1:9999".into(), NodeMode::Primary).unwrap();
        assert!(watcher.add(uuid, "http://127.0.0.1:9998".into(), NodeMode::Primary).is_err());
    }

    #[test]
    fn add_rejects_malformed_uri() {
        let mut watcher = NodeWatcher::new(Duration::from_secs(30));
        assert!(watcher
            .add(Uuid::new_v4(), "not a uri".into(), NodeMode::Primary)
            .is_err());
    }

    #[test]
    fn new_node_starts_unknown() {
        let mut watcher = NodeWatcher::new(Duration::from_secs(30));
        let uuid = Uuid::new_v4();
        watcher.add(uuid, "http://127.0.0.1:9999".into(), NodeMode::Primary).unwrap();
        assert_eq!(watcher.state_of(uuid), Some(NodeState::Unknown));
    }

    #[tokio::test]
    async fn non_callable_nodes_fan_out_to_none() {
        let mut watcher = NodeWatcher::new(Duration::from_secs(30));
        let uuid = Uuid::new_v4();
        watcher.add(uuid, "http://127.0.0.1:9999".into(), NodeMode::Primary).unwrap();
        // Freshly added nodes start UNKNOWN, which is not callable.
        let result = watcher.versions(&[uuid]).await;
        assert_eq!(result.get(&uuid), Some(&None));
    }
}
