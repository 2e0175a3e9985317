//! The Cluster Manager: the per-cluster reconciliation loop and state
//! machine (§4.4), the heart of the system.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Notify;
use tokio::time::Duration;
use uuid::Uuid;

use crate::cluster::state::{evaluate_quorum, ClusterMode, ClusterState};
use crate::cluster::version_table;
use crate::cluster::zone_runtime::ZoneRuntime;
use crate::config::Config;
use crate::node::{NodeState, NodeWatcher};
use crate::rpc::ZoneAddOutcome;
use crate::store::models::{ClusterDescriptor, HsmDescriptor, PolicyDescriptor, ZoneDescriptor};
use crate::zone_input;

/// Reconciliation-pass scratch state (§4.4 `cache`).
///
/// `hsms_setup` tracks attempted HSM uuids rather than a single flag, so
/// that a mid-pass change to the configured HSM list (more than one HSM
/// per cluster is permitted by the data model, §3) is handled correctly
/// instead of being short-circuited by one earlier success.
#[derive(Default)]
struct ReconcileCache {
    reset: bool,
    version: Option<HashMap<Uuid, crate::rpc::NodeVersions>>,
    hsms_setup: HashSet<Uuid>,
    policy_setup: bool,
    running: bool,
    reload: HashSet<Uuid>,
}

/// One cluster's reconciliation state: nodes, policy, HSMs, zones, and
/// the progress cache for the current pass (§4.4).
pub struct ClusterManager {
    pub uuid: Uuid,
    mode: ClusterMode,
    watcher: NodeWatcher,
    policy: PolicyDescriptor,
    hsms: Vec<HsmDescriptor>,
    zones: HashMap<Uuid, ZoneDescriptor>,
    zone_runtime: HashMap<Uuid, ZoneRuntime>,
    cache: ReconcileCache,
    state: ClusterState,
    log: Vec<(jiff::Zoned, String)>,
    interval: u64,
    max_backoff: u64,
    tick_interval: Duration,
}

impl ClusterManager {
    pub fn new(descriptor: ClusterDescriptor, config: &Config) -> Result<Self, crate::error::OrrError> {
        let mut watcher = NodeWatcher::new(config.version_skew);
        for node in &descriptor.nodes {
            watcher.add(node.uuid, node.uri.clone(), node.mode)?;
        }

        let mut zone_runtime = HashMap::new();
        for zone in &descriptor.zones {
            zone_runtime.insert(zone.uuid, ZoneRuntime::default());
        }

        Ok(Self {
            uuid: descriptor.uuid,
            mode: descriptor.mode,
            watcher,
            policy: descriptor.policy,
            hsms: descriptor.hsms,
            zones: descriptor.zones.into_iter().map(|z| (z.uuid, z)).collect(),
            zone_runtime,
            cache: ReconcileCache::default(),
            state: ClusterState::Initializing,
            log: Vec::new(),
            interval: 0,
            max_backoff: config.max_backoff.as_secs().max(1),
            tick_interval: config.tick_interval,
        })
    }

    pub fn state(&self) -> ClusterState {
        self.state
    }

    pub fn node_state(&self, uuid: Uuid) -> Option<NodeState> {
        self.watcher.state_of(uuid)
    }

    pub fn log_entries(&self) -> &[(jiff::Zoned, String)] {
        &self.log
    }

    /// Runtime `NodeAdd`: flags the next pass to reset and re-run the
    /// full phase sequence (§4.4, §8 scenario 5).
    pub fn add_node(&mut self, uuid: Uuid, uri: String, mode: crate::node::NodeMode) -> Result<(), crate::error::OrrError> {
        self.watcher.add(uuid, uri, mode)?;
        self.cache.reset = true;
        Ok(())
    }

    /// Runtime `NodeRemove`: same reset signal (§4.4).
    pub fn remove_node(&mut self, uuid: Uuid) {
        self.watcher.remove(uuid);
        self.cache.reset = true;
    }

    /// Runtime `ZoneAdd`: add a new zone to be fetched and set up on the
    /// next pass (§4.4 P7).
    pub fn add_zone(&mut self, zone: ZoneDescriptor) {
        self.zone_runtime.insert(zone.uuid, ZoneRuntime::default());
        self.zones.insert(zone.uuid, zone);
    }

    /// Runtime `ZoneRemove`: flag the zone for teardown on the next pass
    /// (DESIGN.md Open Question 1's decision).
    pub fn remove_zone(&mut self, uuid: Uuid) {
        if let Some(runtime) = self.zone_runtime.get_mut(&uuid) {
            runtime.pending_remove = true;
        }
    }

    fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(cluster = %self.uuid, "{message}");
        self.log.push((jiff::Zoned::now(), message));
    }

    fn back_off(&mut self) {
        self.interval = (self.interval + 1).min(self.max_backoff);
    }

    fn reset_back_off(&mut self) {
        self.interval = 0;
    }

    /// The current back-off interval before the next pass (§4.4, §5),
    /// never shorter than `tick_interval` so liveness probing in
    /// `run_once` still happens on its configured cadence even while
    /// reconciliation itself is backing off.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval).max(self.tick_interval)
    }

    /// Run one reconciliation pass (§4.4). Probes node liveness first
    /// (`NodeWatcher::tick`, §4.2), unconditionally and regardless of
    /// cluster state, so a cluster stuck in `FAILURE`/`INITIALIZING`
    /// still notices nodes coming back; each phase after that is
    /// idempotent and completes before the next begins.
    pub async fn run_once(&mut self) {
        self.watcher.tick().await;

        if self.state == ClusterState::Failure || self.state == ClusterState::Disabled {
            self.back_off();
            return;
        }

        if self.cache.reset {
            self.state = ClusterState::Initializing;
            self.log("Resetting");
            self.cache = ReconcileCache::default();
            for runtime in self.zone_runtime.values_mut() {
                runtime.clear_cache();
            }
        }

        if self.state == ClusterState::Initializing && self.watcher.state_totals().unknown > 0 {
            self.back_off();
            return;
        }

        self.phase_versions().await;
        if self.state == ClusterState::Failure {
            self.back_off();
            return;
        }

        self.phase_hsm_setup().await;
        self.phase_policy_setup().await;
        self.phase_start_signer().await;
        self.phase_drain_reload().await;
        self.phase_compute_state();

        if matches!(self.state, ClusterState::Operational | ClusterState::Degraded) {
            self.phase_zones().await;
        }

        if self.state == ClusterState::Operational {
            self.log("Cluster operational");
            self.reset_back_off();
        } else {
            self.back_off();
        }
    }

    /// P1 — Versions.
    async fn phase_versions(&mut self) {
        if self.cache.version.is_some() {
            return;
        }

        self.log("Fetching version information from nodes");
        let node_uuids = self.watcher.node_uuids();
        let results = self.watcher.versions(&node_uuids).await;

        // Cache the fan-out result map unconditionally (§4.4 P1): once
        // fetched, a node's version information isn't re-fetched every
        // pass just because another node failed its check.
        let mut versions = HashMap::new();
        for uuid in &node_uuids {
            match results.get(uuid).cloned().flatten() {
                None => {
                    self.log(format!("Failed to read version information from node {uuid}"));
                }
                Some(reported) => {
                    versions.insert(*uuid, reported);
                }
            }
        }
        self.cache.version = Some(versions.clone());

        let mut all_correct = true;
        for (uuid, reported) in &versions {
            if let Err(message) = version_table::check(*uuid, reported) {
                self.log(message);
                self.watcher.set_state(*uuid, NodeState::Failure);
                all_correct = false;
            }
        }

        if all_correct && !versions.is_empty() {
            self.log("Version information correct and supported");
            self.reset_back_off();
        } else if versions.is_empty() && !node_uuids.is_empty() {
            self.state = ClusterState::Failure;
        }
    }

    /// P2 — HSM setup.
    async fn phase_hsm_setup(&mut self) {
        let node_uuids = self.watcher.node_uuids();
        let pending: Vec<Uuid> = self
            .hsms
            .iter()
            .map(|h| h.uuid)
            .filter(|uuid| !self.cache.hsms_setup.contains(uuid))
            .collect();

        if pending.is_empty() {
            return;
        }

        for hsm_uuid in pending {
            let data = self.hsms.iter().find(|h| h.uuid == hsm_uuid).unwrap().data.clone();
            self.log(format!("Setting up HSM {hsm_uuid}"));
            let results = self.watcher.setup_hsm(&node_uuids, &data).await;

            let mut failures = 0;
            for (uuid, outcome) in &results {
                match outcome {
                    Some(o) if o.applied_ok && o.mutated => {
                        self.cache.reload.insert(*uuid);
                    }
                    Some(o) if o.applied_ok => {}
                    _ => failures += 1,
                }
            }
            if failures == 0 {
                self.reset_back_off();
            }
            self.cache.hsms_setup.insert(hsm_uuid);
        }

        self.log("All HSMs setup ok");
    }

    /// P3 — Policy setup.
    async fn phase_policy_setup(&mut self) {
        if self.cache.policy_setup {
            return;
        }

        let node_uuids = self.watcher.node_uuids();
        self.log(format!("Setting up Policy {}", self.policy.uuid));
        let data = self.policy.data.clone();
        let results = self.watcher.setup_policy(&node_uuids, &data).await;

        for (uuid, outcome) in results {
            if let Some(o) = outcome {
                if o.applied_ok && o.mutated {
                    self.cache.reload.insert(uuid);
                }
            }
        }

        self.cache.policy_setup = true;
        self.log("Policy setup ok");
        self.reset_back_off();
    }

    /// P4 — Start signer.
    async fn phase_start_signer(&mut self) {
        if self.cache.running {
            return;
        }

        self.log("Verifying OpenDNSSEC is running and starting if not");
        let node_uuids = self.watcher.node_uuids();
        self.watcher.start_opendnssec(&node_uuids).await;
        self.cache.running = true;
        self.reset_back_off();
    }

    /// P5 — Drain reload set.
    async fn phase_drain_reload(&mut self) {
        if self.cache.reload.is_empty() {
            return;
        }

        self.log("Reload OpenDNSSEC on nodes that need it");
        let reload_nodes: Vec<Uuid> = self.cache.reload.drain().collect();
        self.watcher.reload_opendnssec(&reload_nodes).await;
        self.reset_back_off();
    }

    /// P6 — Compute cluster state.
    fn phase_compute_state(&mut self) {
        let totals = self.watcher.state_totals();

        if totals.standby > 0 {
            if self.state != ClusterState::Initializing {
                self.state = ClusterState::Initializing;
                self.log("Cluster (re)initializing because of nodes in STANDBY state");
                self.cache = ReconcileCache::default();
                for runtime in self.zone_runtime.values_mut() {
                    runtime.clear_cache();
                }
            } else {
                let standby: Vec<Uuid> = self
                    .watcher
                    .node_uuids()
                    .into_iter()
                    .filter(|uuid| self.watcher.state_of(*uuid) == Some(NodeState::Standby))
                    .collect();
                for uuid in standby {
                    self.watcher.set_state(uuid, NodeState::Online);
                }
            }
        } else if totals.failure > 0 || totals.offline > 0 {
            self.log(format!("Nodes failure:{} offline:{}", totals.failure, totals.offline));
            if totals.failure == totals.total {
                self.state = ClusterState::Failure;
            } else if self.state == ClusterState::Operational {
                self.state = ClusterState::Degraded;
            }
        } else {
            self.state = ClusterState::Operational;
        }

        if !matches!(self.state, ClusterState::Operational | ClusterState::Degraded) {
            let totals = self.watcher.state_totals();
            let online_primaries = self.watcher.online_primary_count();
            self.state = evaluate_quorum(self.mode, totals, online_primaries);
        }
    }

    /// P7 — Per-zone processing (only reached in OPERATIONAL/DEGRADED).
    async fn phase_zones(&mut self) {
        let zone_uuids: Vec<Uuid> = self.zones.keys().copied().collect();

        for zone_uuid in zone_uuids {
            let Some(descriptor) = self.zones.get(&zone_uuid) else { continue };
            let name = descriptor.name.clone();
            let input_type = descriptor.input_type.clone();
            let input_data = descriptor.input_data.clone();

            let (locked, pending_remove, has_content, content) = {
                let runtime = self.zone_runtime.entry(zone_uuid).or_default();
                (
                    runtime.locked,
                    runtime.pending_remove,
                    runtime.content.is_some(),
                    runtime.content.clone().map(|(c, _)| c),
                )
            };

            if locked {
                continue;
            }

            if pending_remove {
                self.log(format!("Removing zone {zone_uuid}"));
                let node_uuids = self.watcher.node_uuids();
                self.watcher.zone_remove(&node_uuids, &name).await;
                self.zones.remove(&zone_uuid);
                self.zone_runtime.remove(&zone_uuid);
                continue;
            }

            let content = if has_content {
                content
            } else {
                self.log(format!("Fetching zone content for zone {zone_uuid}"));
                match zone_input::build(&input_type, &name, &input_data) {
                    Ok(input) => match input.fetch().await {
                        Ok(fetched) => {
                            self.log(format!("Zone content for zone {zone_uuid} fetched"));
                            if let Some(runtime) = self.zone_runtime.get_mut(&zone_uuid) {
                                runtime.content = Some((fetched.clone(), Instant::now()));
                            }
                            Some(fetched)
                        }
                        Err(_) => {
                            self.log(format!("Unable to fetch zone {zone_uuid} content"));
                            self.state = ClusterState::Failure;
                            return;
                        }
                    },
                    Err(err) => {
                        self.log(format!("Unable to fetch zone {zone_uuid} content: {err}"));
                        self.state = ClusterState::Failure;
                        return;
                    }
                }
            };

            let setup_done = self
                .zone_runtime
                .get(&zone_uuid)
                .map(|r| r.setup_done)
                .unwrap_or(false);

            if !setup_done {
                if let Some(content) = content {
                    self.log(format!("Setting up zone {zone_uuid}"));
                    let node_uuids = self.watcher.node_uuids();
                    let policy_data = self.policy.data.clone();
                    let results = self.watcher.zone_add(&node_uuids, &name, &content, &policy_data).await;

                    let mut wrong_policy = false;
                    let mut any_ok = false;
                    for outcome in results.values() {
                        match outcome {
                            Some(ZoneAddOutcome::Applied) => any_ok = true,
                            Some(ZoneAddOutcome::WrongPolicy) => wrong_policy = true,
                            None => {}
                        }
                    }

                    if wrong_policy {
                        self.log(format!(
                            "Zone {zone_uuid} is already set up under a different policy on at least one node"
                        ));
                    }
                    if any_ok {
                        if let Some(runtime) = self.zone_runtime.get_mut(&zone_uuid) {
                            runtime.setup_done = true;
                        }
                        self.log(format!("Zone {zone_uuid} setup ok"));
                        self.reset_back_off();
                    }
                }
            }
        }
    }
}

/// Drive a [`ClusterManager`] on a self-rescheduling timer (§4.4, §9
/// "self-rescheduling timer with mutable interval"): a supervisor task
/// that waits on (cancellation OR deadline) and loops.
pub async fn supervise(manager: Arc<tokio::sync::Mutex<ClusterManager>>, cancel: Arc<Notify>, stopped: Arc<AtomicBool>) {
    loop {
        if stopped.load(Ordering::SeqCst) {
            return;
        }

        {
            let mut guard = manager.lock().await;
            guard.run_once().await;
        }

        let interval = manager.lock().await.interval();
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.notified() => {
                stopped.store(true, Ordering::SeqCst);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoggingConfig;
    use crate::node::NodeMode;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, MockGuard, ResponseTemplate};

    fn test_config() -> Config {
        Config {
            config_path: "/tmp/orr-test.toml".into(),
            db_path: "/tmp/orr-test.db".into(),
            tick_interval: Duration::from_secs(5),
            max_backoff: Duration::from_secs(10),
            version_skew: Duration::from_secs(30),
            logging: LoggingConfig::default(),
        }
    }

    fn descriptor(uuid: Uuid, mode: ClusterMode, node_uuid: Uuid, node_uri: String) -> ClusterDescriptor {
        ClusterDescriptor {
            uuid,
            mode,
            policy: PolicyDescriptor { uuid: Uuid::new_v4(), data: json!({"name": "default"}) },
            hsms: vec![HsmDescriptor { uuid: Uuid::new_v4(), data: json!({"name": "softhsm"}) }],
            nodes: vec![crate::store::models::NodeDescriptor {
                uuid: node_uuid,
                uri: node_uri,
                mode: NodeMode::Primary,
            }],
            zones: vec![],
        }
    }

    /// Mount every RPC a node needs to answer to reach `OPERATIONAL` with
    /// no zones: compliant versions, empty HSM/policy repositories, and
    /// a clean start.
    async fn mount_compliant_agent(server: &MockServer) {
        Mock::given(method("POST"))
            .and(body_string_contains("\"Agent.ReadVersion\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"version": "0.19"})))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("\"Agent.ReadPlugins\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "plugin": [
                    {"name": "Agent", "version": "0.19", "loaded": true},
                    {"name": "OpenDNSSEC", "version": "0.14", "loaded": true}
                ]
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("\"OpenDNSSEC.ReadVersion\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "program": [
                    {"name": "ods-control", "version": "1"},
                    {"name": "ods-signerd", "version": "1.3.14"},
                    {"name": "ods-signer", "version": "1.3.14"},
                    {"name": "ods-enforcerd", "version": "1.3.14"},
                    {"name": "ods-ksmutil", "version": "1.3.14"}
                ]
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("\"OpenDNSSEC.ReadRepository\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"repository": null})))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("\"OpenDNSSEC.CreateRepository\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("\"OpenDNSSEC.ReadPolicy\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"policy": null})))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("\"OpenDNSSEC.CreatePolicy\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("\"OpenDNSSEC.UpdateControlStart\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("\"OpenDNSSEC.UpdateEnforcerUpdate\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("\"DNS.ReadZones\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"zone": []})))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("\"DNS.CreateZone\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("\"OpenDNSSEC.ReadEnforcerZoneList\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"zone": []})))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("\"OpenDNSSEC.CreateEnforcerZone\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn failure_state_is_a_fixpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let desc = descriptor(Uuid::new_v4(), ClusterMode::Backup, Uuid::new_v4(), server.uri());
        let mut manager = ClusterManager::new(desc, &test_config()).unwrap();
        manager.state = ClusterState::Failure;
        manager.run_once().await;
        assert_eq!(manager.state(), ClusterState::Failure);
    }

    #[tokio::test]
    async fn node_add_flags_a_reset() {
        let desc = descriptor(Uuid::new_v4(), ClusterMode::Backup, Uuid::new_v4(), "http://127.0.0.1:1".into());
        let mut manager = ClusterManager::new(desc, &test_config()).unwrap();
        assert!(!manager.cache.reset);
        manager
            .add_node(Uuid::new_v4(), "http://127.0.0.1:2".into(), NodeMode::Secondary)
            .unwrap();
        assert!(manager.cache.reset);
    }

    /// §8 Scenario 1: a freshly bootstrapped cluster (every node
    /// `UNKNOWN`) reaches `OPERATIONAL` once liveness probing runs.
    #[tokio::test]
    async fn scenario_1_cold_start_reaches_operational() {
        let server = MockServer::start().await;
        mount_compliant_agent(&server).await;

        let desc = descriptor(Uuid::new_v4(), ClusterMode::Failover, Uuid::new_v4(), server.uri());
        let mut manager = ClusterManager::new(desc, &test_config()).unwrap();

        let mut reached_operational = false;
        for _ in 0..6 {
            manager.run_once().await;
            if manager.state() == ClusterState::Operational {
                reached_operational = true;
                break;
            }
        }
        assert!(reached_operational, "cluster never reached OPERATIONAL: {:?}", manager.state());
    }

    /// §8 Scenario 2: a node reporting an unsupported `ods-signerd`
    /// version is marked `FAILURE` and, being the cluster's only node,
    /// takes the whole cluster to `FAILURE`.
    #[tokio::test]
    async fn scenario_2_version_mismatch_fails_node_and_cluster() {
        let server = MockServer::start().await;
        mount_compliant_agent(&server).await;
        Mock::given(method("POST"))
            .and(body_string_contains("\"OpenDNSSEC.ReadVersion\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "program": [
                    {"name": "ods-control", "version": "1"},
                    {"name": "ods-signerd", "version": "1.3.13"},
                    {"name": "ods-signer", "version": "1.3.14"},
                    {"name": "ods-enforcerd", "version": "1.3.14"},
                    {"name": "ods-ksmutil", "version": "1.3.14"}
                ]
            })))
            .mount(&server)
            .await;

        let node_uuid = Uuid::new_v4();
        let desc = descriptor(Uuid::new_v4(), ClusterMode::Failover, node_uuid, server.uri());
        let mut manager = ClusterManager::new(desc, &test_config()).unwrap();

        for _ in 0..3 {
            manager.run_once().await;
        }

        assert_eq!(manager.node_state(node_uuid), Some(NodeState::Failure));
        assert_eq!(manager.state(), ClusterState::Failure);
        assert!(manager.log_entries().iter().any(|(_, msg)| msg.contains("ods-signerd")));
    }

    /// §8 Scenario 3: a node that's unreachable goes `OFFLINE`, and
    /// recovers to `STANDBY` once it answers again.
    #[tokio::test]
    async fn scenario_3_transient_offline_then_recovers() {
        let server = MockServer::start().await;
        let node_uuid = Uuid::new_v4();
        let desc = descriptor(Uuid::new_v4(), ClusterMode::Failover, node_uuid, server.uri());
        let mut manager = ClusterManager::new(desc, &test_config()).unwrap();

        let failing: MockGuard = Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount_as_scoped(&server)
            .await;
        manager.run_once().await;
        assert_eq!(manager.node_state(node_uuid), Some(NodeState::Offline));
        drop(failing);

        mount_compliant_agent(&server).await;
        manager.run_once().await;
        assert_eq!(manager.node_state(node_uuid), Some(NodeState::Standby));
    }

    /// §8 Scenario 4: HSM/Policy/start-signer setup each run at most
    /// once per cache lifetime, never repeated on a later pass.
    #[tokio::test]
    async fn scenario_4_mutation_phases_run_at_most_once() {
        let server = MockServer::start().await;
        mount_compliant_agent(&server).await;

        let desc = descriptor(Uuid::new_v4(), ClusterMode::Failover, Uuid::new_v4(), server.uri());
        let mut manager = ClusterManager::new(desc, &test_config()).unwrap();

        for _ in 0..4 {
            manager.run_once().await;
        }

        let requests = server.received_requests().await.unwrap();
        let count = |needle: &str| {
            requests
                .iter()
                .filter(|r| std::str::from_utf8(&r.body).unwrap_or_default().contains(needle))
                .count()
        };
        assert_eq!(count("OpenDNSSEC.CreateRepository"), 1);
        assert_eq!(count("OpenDNSSEC.CreatePolicy"), 1);
        assert_eq!(count("OpenDNSSEC.UpdateControlStart"), 1);
    }

    /// §8 Scenario 5: a runtime `NodeAdd` resets the reconciliation
    /// cache and the new node is probed and reconciled on later passes.
    #[tokio::test]
    async fn scenario_5_node_add_cycle_reconciles_new_node() {
        let server = MockServer::start().await;
        mount_compliant_agent(&server).await;

        let desc = descriptor(Uuid::new_v4(), ClusterMode::Failover, Uuid::new_v4(), server.uri());
        let mut manager = ClusterManager::new(desc, &test_config()).unwrap();
        for _ in 0..4 {
            manager.run_once().await;
        }
        assert_eq!(manager.state(), ClusterState::Operational);

        let new_node = Uuid::new_v4();
        manager.add_node(new_node, server.uri(), NodeMode::Secondary).unwrap();
        assert_eq!(manager.node_state(new_node), Some(NodeState::Unknown));

        for _ in 0..4 {
            manager.run_once().await;
        }
        assert_ne!(manager.node_state(new_node), Some(NodeState::Unknown));
    }

    /// §8 Scenario 6: a zone whose content can't be fetched fails the
    /// whole cluster.
    #[tokio::test]
    async fn scenario_6_zone_fetch_failure_fails_cluster() {
        let server = MockServer::start().await;
        mount_compliant_agent(&server).await;

        let mut desc = descriptor(Uuid::new_v4(), ClusterMode::Failover, Uuid::new_v4(), server.uri());
        desc.zones.push(ZoneDescriptor {
            uuid: Uuid::new_v4(),
            name: "example.com".into(),
            input_type: "lim_plugin_dns".into(),
            input_data: json!({"host": "127.0.0.1", "port": 1}),
        });
        let mut manager = ClusterManager::new(desc, &test_config()).unwrap();

        let mut reached_failure = false;
        for _ in 0..6 {
            manager.run_once().await;
            if manager.state() == ClusterState::Failure {
                reached_failure = true;
                break;
            }
        }
        assert!(reached_failure, "cluster never failed on an unfetchable zone: {:?}", manager.state());
    }
}
