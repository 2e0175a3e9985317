//! Row-level CRUD and the descriptor-assembly joins that bootstrap a
//! [`crate::cluster::ClusterManager`] from the Config Store (§4.5).

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::cluster::ClusterMode;
use crate::error::OrrError;
use crate::node::NodeMode;
use crate::store::models::{ClusterDescriptor, HsmDescriptor, NodeDescriptor, PolicyDescriptor, ZoneDescriptor};

fn parse_uuid(raw: &str) -> Result<Uuid, OrrError> {
    Uuid::parse_str(raw).map_err(|err| OrrError::Config(format!("malformed uuid '{raw}': {err}")))
}

fn parse_node_mode(raw: &str) -> Result<NodeMode, OrrError> {
    match raw {
        "PRIMARY" => Ok(NodeMode::Primary),
        "SECONDARY" => Ok(NodeMode::Secondary),
        other => Err(OrrError::Config(format!("unknown node mode '{other}'"))),
    }
}

fn parse_cluster_mode(raw: &str) -> Result<ClusterMode, OrrError> {
    match raw {
        "BACKUP" => Ok(ClusterMode::Backup),
        "FAILOVER" => Ok(ClusterMode::Failover),
        "BALANCE" => Ok(ClusterMode::Balance),
        other => Err(OrrError::Config(format!("unknown cluster mode '{other}'"))),
    }
}

/// List every cluster uuid present in the store, for start-up bootstrap.
pub async fn list_cluster_uuids(pool: &SqlitePool) -> Result<Vec<Uuid>, OrrError> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT uuid FROM clusters").fetch_all(pool).await?;
    rows.iter().map(|(u,)| parse_uuid(u)).collect()
}

/// `ClusterList` (§4.5): every cluster's uuid and mode.
pub async fn cluster_list(pool: &SqlitePool) -> Result<Vec<(Uuid, ClusterMode)>, OrrError> {
    let rows: Vec<(String, String)> = sqlx::query_as("SELECT uuid, mode FROM clusters").fetch_all(pool).await?;
    rows.into_iter().map(|(uuid, mode)| Ok((parse_uuid(&uuid)?, parse_cluster_mode(&mode)?))).collect()
}

/// `NodeList` (§4.5): every node in the store, regardless of cluster
/// membership.
pub async fn node_list(pool: &SqlitePool) -> Result<Vec<NodeDescriptor>, OrrError> {
    let rows: Vec<(String, String, String)> =
        sqlx::query_as("SELECT uuid, uri, mode FROM nodes").fetch_all(pool).await?;
    rows.into_iter()
        .map(|(uuid, uri, mode)| Ok(NodeDescriptor { uuid: parse_uuid(&uuid)?, uri, mode: parse_node_mode(&mode)? }))
        .collect()
}

/// `ZoneList` (§4.5): every zone in the store, regardless of cluster
/// membership.
pub async fn zone_list(pool: &SqlitePool) -> Result<Vec<ZoneDescriptor>, OrrError> {
    let rows: Vec<(String, String, String, String)> =
        sqlx::query_as("SELECT uuid, name, input_type, input_data FROM zones").fetch_all(pool).await?;
    rows.into_iter()
        .map(|(uuid, name, input_type, input_data)| {
            Ok(ZoneDescriptor {
                uuid: parse_uuid(&uuid)?,
                name,
                input_type,
                input_data: serde_json::from_str(&input_data)?,
            })
        })
        .collect()
}

/// `ClusterNodes` (§4.5): the nodes attached to one cluster.
pub async fn cluster_nodes(pool: &SqlitePool, cluster_uuid: Uuid) -> Result<Vec<NodeDescriptor>, OrrError> {
    nodes_for_cluster(pool, cluster_uuid).await
}

/// `ClusterZones` (§4.5): the zones attached to one cluster.
pub async fn cluster_zones(pool: &SqlitePool, cluster_uuid: Uuid) -> Result<Vec<ZoneDescriptor>, OrrError> {
    zones_for_cluster(pool, cluster_uuid).await
}

async fn nodes_for_cluster(pool: &SqlitePool, cluster_uuid: Uuid) -> Result<Vec<NodeDescriptor>, OrrError> {
    let cluster_str = cluster_uuid.to_string();
    let node_rows: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT nodes.uuid, nodes.uri, nodes.mode FROM nodes \
         JOIN cluster_node ON cluster_node.node_uuid = nodes.uuid \
         WHERE cluster_node.cluster_uuid = ?",
    )
    .bind(&cluster_str)
    .fetch_all(pool)
    .await?;
    node_rows
        .into_iter()
        .map(|(uuid, uri, mode)| {
            Ok(NodeDescriptor { uuid: parse_uuid(&uuid)?, uri, mode: parse_node_mode(&mode)? })
        })
        .collect()
}

async fn zones_for_cluster(pool: &SqlitePool, cluster_uuid: Uuid) -> Result<Vec<ZoneDescriptor>, OrrError> {
    let cluster_str = cluster_uuid.to_string();
    let zone_rows: Vec<(String, String, String, String)> = sqlx::query_as(
        "SELECT zones.uuid, zones.name, zones.input_type, zones.input_data FROM zones \
         JOIN cluster_zone ON cluster_zone.zone_uuid = zones.uuid \
         WHERE cluster_zone.cluster_uuid = ?",
    )
    .bind(&cluster_str)
    .fetch_all(pool)
    .await?;
    zone_rows
        .into_iter()
        .map(|(uuid, name, input_type, input_data)| {
            Ok(ZoneDescriptor {
                uuid: parse_uuid(&uuid)?,
                name,
                input_type,
                input_data: serde_json::from_str(&input_data)?,
            })
        })
        .collect()
}

/// Assemble one cluster's full descriptor via its join tables (§4.5
/// `ClusterConfig`): nodes, zones, HSMs, and its single policy.
pub async fn load_cluster(pool: &SqlitePool, cluster_uuid: Uuid) -> Result<ClusterDescriptor, OrrError> {
    let cluster_str = cluster_uuid.to_string();

    let (mode,): (String,) = sqlx::query_as("SELECT mode FROM clusters WHERE uuid = ?")
        .bind(&cluster_str)
        .fetch_one(pool)
        .await?;

    let nodes = nodes_for_cluster(pool, cluster_uuid).await?;
    let zones = zones_for_cluster(pool, cluster_uuid).await?;

    let hsm_rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT hsms.uuid, hsms.data FROM hsms \
         JOIN cluster_hsm ON cluster_hsm.hsm_uuid = hsms.uuid \
         WHERE cluster_hsm.cluster_uuid = ?",
    )
    .bind(&cluster_str)
    .fetch_all(pool)
    .await?;
    let hsms = hsm_rows
        .into_iter()
        .map(|(uuid, data)| Ok(HsmDescriptor { uuid: parse_uuid(&uuid)?, data: serde_json::from_str(&data)? }))
        .collect::<Result<Vec<_>, OrrError>>()?;

    let (policy_uuid, policy_data): (String, String) = sqlx::query_as(
        "SELECT policies.uuid, policies.data FROM policies \
         JOIN cluster_policy ON cluster_policy.policy_uuid = policies.uuid \
         WHERE cluster_policy.cluster_uuid = ?",
    )
    .bind(&cluster_str)
    .fetch_one(pool)
    .await?;
    let policy = PolicyDescriptor { uuid: parse_uuid(&policy_uuid)?, data: serde_json::from_str(&policy_data)? };

    Ok(ClusterDescriptor {
        uuid: cluster_uuid,
        mode: parse_cluster_mode(&mode)?,
        policy,
        hsms,
        nodes,
        zones,
    })
}

/// Insert a node row and attach it to a cluster in one transaction (the
/// `NodeAdd` operation, §4.5/§8 scenario 5).
pub async fn add_node(pool: &SqlitePool, cluster_uuid: Uuid, node: &NodeDescriptor) -> Result<(), OrrError> {
    let mode = match node.mode {
        NodeMode::Primary => "PRIMARY",
        NodeMode::Secondary => "SECONDARY",
    };
    let mut tx = pool.begin().await?;
    sqlx::query("INSERT INTO nodes (uuid, uri, mode) VALUES (?, ?, ?)")
        .bind(node.uuid.to_string())
        .bind(&node.uri)
        .bind(mode)
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO cluster_node (cluster_uuid, node_uuid) VALUES (?, ?)")
        .bind(cluster_uuid.to_string())
        .bind(node.uuid.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Detach and delete a node (the `NodeRemove` operation, §3 lifecycles).
pub async fn remove_node(pool: &SqlitePool, node_uuid: Uuid) -> Result<(), OrrError> {
    let node_str = node_uuid.to_string();
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM cluster_node WHERE node_uuid = ?")
        .bind(&node_str)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM nodes WHERE uuid = ?")
        .bind(&node_str)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Insert a zone row and attach it to a cluster (the `ZoneAdd` config
/// operation, distinct from the RPC of the same name).
pub async fn add_zone(pool: &SqlitePool, cluster_uuid: Uuid, zone: &ZoneDescriptor) -> Result<(), OrrError> {
    let mut tx = pool.begin().await?;
    sqlx::query("INSERT INTO zones (uuid, name, input_type, input_data) VALUES (?, ?, ?, ?)")
        .bind(zone.uuid.to_string())
        .bind(&zone.name)
        .bind(&zone.input_type)
        .bind(serde_json::to_string(&zone.input_data)?)
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO cluster_zone (cluster_uuid, zone_uuid) VALUES (?, ?)")
        .bind(cluster_uuid.to_string())
        .bind(zone.uuid.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Delete a zone row (the `ZoneRemove` config operation, DESIGN.md Open
/// Question 1's decision: deletes the record outright, does not attempt
/// to tear down the zone on the nodes themselves).
pub async fn remove_zone(pool: &SqlitePool, zone_uuid: Uuid) -> Result<(), OrrError> {
    let zone_str = zone_uuid.to_string();
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM cluster_zone WHERE zone_uuid = ?")
        .bind(&zone_str)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM zones WHERE uuid = ?")
        .bind(&zone_str)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::setup_or_upgrade;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        setup_or_upgrade(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn round_trips_a_full_cluster() {
        let pool = memory_pool().await;
        let cluster_uuid = Uuid::new_v4();
        let policy_uuid = Uuid::new_v4();
        let node = NodeDescriptor { uuid: Uuid::new_v4(), uri: "http://127.0.0.1:9999".into(), mode: NodeMode::Primary };

        sqlx::query("INSERT INTO clusters (uuid, mode) VALUES (?, 'BACKUP')")
            .bind(cluster_uuid.to_string())
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO policies (uuid, data) VALUES (?, ?)")
            .bind(policy_uuid.to_string())
            .bind(json!({"name": "default"}).to_string())
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO cluster_policy (cluster_uuid, policy_uuid) VALUES (?, ?)")
            .bind(cluster_uuid.to_string())
            .bind(policy_uuid.to_string())
            .execute(&pool)
            .await
            .unwrap();
        add_node(&pool, cluster_uuid, &node).await.unwrap();

        let descriptor = load_cluster(&pool, cluster_uuid).await.unwrap();
        assert_eq!(descriptor.mode, ClusterMode::Backup);
        assert_eq!(descriptor.nodes.len(), 1);
        assert_eq!(descriptor.nodes[0].uuid, node.uuid);

        remove_node(&pool, node.uuid).await.unwrap();
        let descriptor = load_cluster(&pool, cluster_uuid).await.unwrap();
        assert!(descriptor.nodes.is_empty());
    }
}
