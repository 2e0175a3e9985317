//! The Config Store: durable cluster/node/zone/HSM/policy configuration,
//! backed by SQLite (§4.5).

pub mod models;
pub mod queries;
pub mod schema;

use camino::Utf8Path;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::cluster::ClusterMode;
use crate::error::OrrError;
use models::{ClusterDescriptor, NodeDescriptor, ZoneDescriptor};

/// A handle to the persisted configuration.
#[derive(Clone)]
pub struct ConfigStore {
    pool: SqlitePool,
}

impl ConfigStore {
    /// Open (creating if absent) the database at `path`, running
    /// `Setup`/`Upgrade` as needed (§4.5).
    pub async fn open(path: &Utf8Path) -> Result<Self, OrrError> {
        let options = SqliteConnectOptions::new().filename(path.as_std_path()).create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        schema::setup_or_upgrade(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn cluster_uuids(&self) -> Result<Vec<Uuid>, OrrError> {
        queries::list_cluster_uuids(&self.pool).await
    }

    pub async fn load_cluster(&self, cluster_uuid: Uuid) -> Result<ClusterDescriptor, OrrError> {
        queries::load_cluster(&self.pool, cluster_uuid).await
    }

    /// `NodeList` (§4.5): every node in the store.
    pub async fn node_list(&self) -> Result<Vec<NodeDescriptor>, OrrError> {
        queries::node_list(&self.pool).await
    }

    /// `ZoneList` (§4.5): every zone in the store.
    pub async fn zone_list(&self) -> Result<Vec<ZoneDescriptor>, OrrError> {
        queries::zone_list(&self.pool).await
    }

    /// `ClusterList` (§4.5): every cluster's uuid and mode.
    pub async fn cluster_list(&self) -> Result<Vec<(Uuid, ClusterMode)>, OrrError> {
        queries::cluster_list(&self.pool).await
    }

    /// `ClusterNodes` (§4.5): the nodes attached to one cluster.
    pub async fn cluster_nodes(&self, cluster_uuid: Uuid) -> Result<Vec<NodeDescriptor>, OrrError> {
        queries::cluster_nodes(&self.pool, cluster_uuid).await
    }

    /// `ClusterZones` (§4.5): the zones attached to one cluster.
    pub async fn cluster_zones(&self, cluster_uuid: Uuid) -> Result<Vec<ZoneDescriptor>, OrrError> {
        queries::cluster_zones(&self.pool, cluster_uuid).await
    }

    pub async fn add_node(&self, cluster_uuid: Uuid, node: &NodeDescriptor) -> Result<(), OrrError> {
        queries::add_node(&self.pool, cluster_uuid, node).await
    }

    pub async fn remove_node(&self, node_uuid: Uuid) -> Result<(), OrrError> {
        queries::remove_node(&self.pool, node_uuid).await
    }

    pub async fn add_zone(&self, cluster_uuid: Uuid, zone: &ZoneDescriptor) -> Result<(), OrrError> {
        queries::add_zone(&self.pool, cluster_uuid, zone).await
    }

    pub async fn remove_zone(&self, zone_uuid: Uuid) -> Result<(), OrrError> {
        queries::remove_zone(&self.pool, zone_uuid).await
    }
}
