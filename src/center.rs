//! The shared state every running part of ORR hangs off: the Config
//! Store handle and the set of live Cluster Managers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cluster::{supervise, ClusterManager};
use crate::config::Config;
use crate::error::OrrError;
use crate::log::Logger;
use crate::store::models::{NodeDescriptor, ZoneDescriptor};
use crate::store::ConfigStore;

/// A running Cluster Manager's handle: the manager itself (for runtime
/// `NodeAdd`/`NodeRemove`/`ZoneAdd`/`ZoneRemove` dispatch) plus what's
/// needed to stop its supervisor task.
struct ClusterHandle {
    manager: Arc<Mutex<ClusterManager>>,
    cancel: Arc<Notify>,
    #[allow(dead_code)]
    stopped: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Everything the daemon entry point and the runtime config operations
/// need access to.
pub struct Center {
    pub config: Config,
    pub store: ConfigStore,
    pub logger: &'static Logger,
    clusters: Mutex<foldhash::HashMap<Uuid, ClusterHandle>>,
}

impl Center {
    pub fn new(config: Config, store: ConfigStore, logger: &'static Logger) -> Self {
        Self {
            config,
            store,
            logger,
            clusters: Mutex::new(foldhash::HashMap::default()),
        }
    }

    /// Load every cluster currently in the Config Store and spawn its
    /// supervisor task (§5 start-up bootstrap).
    pub async fn spawn_all(self: &Arc<Self>) -> Result<(), OrrError> {
        let uuids = self.store.cluster_uuids().await?;
        for uuid in uuids {
            let descriptor = self.store.load_cluster(uuid).await?;
            tracing::info!(%uuid, "Starting cluster");
            self.spawn_one(ClusterManager::new(descriptor, &self.config)?).await;
        }
        Ok(())
    }

    async fn spawn_one(self: &Arc<Self>, manager: ClusterManager) {
        let uuid = manager.uuid;
        let manager = Arc::new(Mutex::new(manager));
        let cancel = Arc::new(Notify::new());
        let stopped = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(supervise(manager.clone(), cancel.clone(), stopped.clone()));

        let mut clusters = self.clusters.lock().await;
        clusters.insert(uuid, ClusterHandle { manager, cancel, stopped, task });
    }

    /// Runtime `NodeAdd` (§4.4/§8 scenario 5): persist the node, then
    /// apply it to the running Cluster Manager if the cluster is live.
    pub async fn add_node(&self, cluster_uuid: Uuid, node: NodeDescriptor) -> Result<(), OrrError> {
        self.store.add_node(cluster_uuid, &node).await?;
        let clusters = self.clusters.lock().await;
        if let Some(handle) = clusters.get(&cluster_uuid) {
            handle.manager.lock().await.add_node(node.uuid, node.uri, node.mode)?;
        }
        Ok(())
    }

    /// Runtime `NodeRemove`: persist the removal, then flag it on the
    /// running Cluster Manager.
    pub async fn remove_node(&self, cluster_uuid: Uuid, node_uuid: Uuid) -> Result<(), OrrError> {
        self.store.remove_node(node_uuid).await?;
        let clusters = self.clusters.lock().await;
        if let Some(handle) = clusters.get(&cluster_uuid) {
            handle.manager.lock().await.remove_node(node_uuid);
        }
        Ok(())
    }

    /// Runtime `ZoneAdd`: persist the zone, then register it with the
    /// running Cluster Manager.
    pub async fn add_zone(&self, cluster_uuid: Uuid, zone: ZoneDescriptor) -> Result<(), OrrError> {
        self.store.add_zone(cluster_uuid, &zone).await?;
        let clusters = self.clusters.lock().await;
        if let Some(handle) = clusters.get(&cluster_uuid) {
            handle.manager.lock().await.add_zone(zone);
        }
        Ok(())
    }

    /// Runtime `ZoneRemove`: persist the removal, then flag it on the
    /// running Cluster Manager.
    pub async fn remove_zone(&self, cluster_uuid: Uuid, zone_uuid: Uuid) -> Result<(), OrrError> {
        self.store.remove_zone(zone_uuid).await?;
        let clusters = self.clusters.lock().await;
        if let Some(handle) = clusters.get(&cluster_uuid) {
            handle.manager.lock().await.remove_zone(zone_uuid);
        }
        Ok(())
    }

    /// Stop every running Cluster Manager, waiting for each supervisor
    /// task to observe cancellation and return (graceful shutdown).
    pub async fn shutdown(&self) {
        let mut clusters = self.clusters.lock().await;
        for (uuid, handle) in clusters.drain() {
            handle.cancel.notify_one();
            if let Err(err) = handle.task.await {
                tracing::warn!(%uuid, %err, "cluster supervisor task panicked during shutdown");
            }
        }
    }
}
