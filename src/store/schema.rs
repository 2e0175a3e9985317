//! The Config Store's schema (§4.5) and its `Setup`/`Upgrade` contract.

use sqlx::SqlitePool;

use crate::error::OrrError;

/// The schema version this binary knows how to read and write.
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

const DDL: &str = "
CREATE TABLE IF NOT EXISTS version (version INTEGER NOT NULL);
CREATE TABLE IF NOT EXISTS nodes (uuid TEXT PRIMARY KEY, uri TEXT NOT NULL, mode TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS zones (uuid TEXT PRIMARY KEY, name TEXT NOT NULL UNIQUE, input_type TEXT NOT NULL, input_data TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS hsms (uuid TEXT PRIMARY KEY, data TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS policies (uuid TEXT PRIMARY KEY, data TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS clusters (uuid TEXT PRIMARY KEY, mode TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS cluster_node (cluster_uuid TEXT NOT NULL, node_uuid TEXT NOT NULL, PRIMARY KEY (cluster_uuid, node_uuid));
CREATE TABLE IF NOT EXISTS cluster_zone (cluster_uuid TEXT NOT NULL, zone_uuid TEXT NOT NULL, PRIMARY KEY (cluster_uuid, zone_uuid));
CREATE TABLE IF NOT EXISTS cluster_hsm (cluster_uuid TEXT NOT NULL, hsm_uuid TEXT NOT NULL, PRIMARY KEY (cluster_uuid, hsm_uuid));
CREATE TABLE IF NOT EXISTS cluster_policy (cluster_uuid TEXT NOT NULL, policy_uuid TEXT NOT NULL, PRIMARY KEY (cluster_uuid));
";

/// Create the schema if this is a fresh database, or check the stored
/// schema version matches [`CURRENT_SCHEMA_VERSION`] otherwise.
///
/// There is exactly one schema version so far (DESIGN.md Open Question
/// 5's decision): a stored version that doesn't match is an
/// `OrrError::External`, not a silent migration.
pub async fn setup_or_upgrade(pool: &SqlitePool) -> Result<(), OrrError> {
    sqlx::query(DDL).execute(pool).await?;

    let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM version LIMIT 1")
        .fetch_optional(pool)
        .await?;

    match row {
        None => {
            sqlx::query("INSERT INTO version (version) VALUES (?)")
                .bind(CURRENT_SCHEMA_VERSION)
                .execute(pool)
                .await?;
            Ok(())
        }
        Some((stored,)) if stored == CURRENT_SCHEMA_VERSION => Ok(()),
        Some((stored,)) => Err(OrrError::External(format!(
            "config store schema version {stored} is not supported by this build (expected {CURRENT_SCHEMA_VERSION}); upgrade tooling is not implemented"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn fresh_database_is_stamped_with_current_version() {
        let pool = memory_pool().await;
        setup_or_upgrade(&pool).await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT version FROM version").fetch_one(&pool).await.unwrap();
        assert_eq!(row.0, CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn mismatched_version_is_rejected() {
        let pool = memory_pool().await;
        setup_or_upgrade(&pool).await.unwrap();
        sqlx::query("UPDATE version SET version = 99").execute(&pool).await.unwrap();
        assert!(setup_or_upgrade(&pool).await.is_err());
    }
}
