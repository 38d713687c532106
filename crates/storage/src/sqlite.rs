//! SQLite registry store
//!
//! Persistent registry using SQLite
//!
//! Features:
//! - Node records with capability tables
//! - Scenario install index keyed by workspace
//! - Async-friendly using spawn_blocking

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nodemesh_core::{CapabilitySet, NodeRecord, ScenarioRow};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::trait_::{
    dedup_preserving_order, RegistryStore, Result, SharedRegistryStore, StoreError,
};

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// SQLite registry store implementation
#[derive(Debug, Clone)]
pub struct SqliteRegistryStore {
    path: PathBuf,
}

impl SqliteRegistryStore {
    /// Open (or create) the database at `path` and initialize the schema
    pub async fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        let path_clone = path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            Self::init_schema(&conn)
        })
        .await
        .map_err(|e| StoreError::Database(e.to_string()))??;

        info!(path = %path.display(), "SQLite registry initialized");

        Ok(Self { path })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS subnet_nodes (
                node_id TEXT PRIMARY KEY,
                subnet_id TEXT,
                roles TEXT NOT NULL DEFAULT '[]',
                hostname TEXT,
                base_url TEXT,
                last_seen TEXT NOT NULL,
                extra TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS node_io_capacity (
                node_id TEXT NOT NULL,
                io TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (node_id, io)
            );

            CREATE TABLE IF NOT EXISTS node_skill_capacity (
                node_id TEXT NOT NULL,
                skill TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (node_id, skill)
            );

            CREATE INDEX IF NOT EXISTS idx_skill_capacity_skill ON node_skill_capacity(skill);

            CREATE TABLE IF NOT EXISTS scenarios (
                workspace_id TEXT NOT NULL,
                scenario_id TEXT NOT NULL,
                version TEXT NOT NULL,
                installed_at TEXT NOT NULL,
                PRIMARY KEY (workspace_id, scenario_id)
            );
            "#,
        )?;
        Ok(())
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        run_sqlite(self.path.clone(), f).await
    }
}

/// Run a blocking SQLite operation on the blocking pool
async fn run_sqlite<T, F>(path: PathBuf, f: F) -> Result<T>
where
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = Connection::open(&path)?;
        f(&mut conn)
    })
    .await
    .map_err(|e| StoreError::Database(e.to_string()))?
}

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

const NODE_COLUMNS: &str = "node_id, subnet_id, roles, hostname, base_url, last_seen, extra";

fn node_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRecord> {
    let roles_json: String = row.get(2)?;
    let last_seen: String = row.get(5)?;
    let extra_json: String = row.get(6)?;

    let roles: BTreeSet<String> =
        serde_json::from_str(&roles_json).map_err(|e| conversion_error(2, e))?;
    let last_seen = DateTime::parse_from_rfc3339(&last_seen)
        .map_err(|e| conversion_error(5, e))?
        .with_timezone(&Utc);
    let extra: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(&extra_json).map_err(|e| conversion_error(6, e))?;

    Ok(NodeRecord {
        node_id: row.get(0)?,
        subnet_id: row.get(1)?,
        roles,
        hostname: row.get(3)?,
        base_url: row.get(4)?,
        last_seen,
        extra,
    })
}

fn scenario_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScenarioRow> {
    let installed_at: String = row.get(3)?;
    let installed_at = DateTime::parse_from_rfc3339(&installed_at)
        .map_err(|e| conversion_error(3, e))?
        .with_timezone(&Utc);
    Ok(ScenarioRow {
        workspace_id: row.get(0)?,
        scenario_id: row.get(1)?,
        version: row.get(2)?,
        installed_at,
    })
}

fn replace_io(tx: &rusqlite::Transaction<'_>, node_id: &str, io: &[String]) -> Result<()> {
    tx.execute("DELETE FROM node_io_capacity WHERE node_id = ?1", [node_id])?;
    for (position, channel) in dedup_preserving_order(io).iter().enumerate() {
        tx.execute(
            "INSERT OR IGNORE INTO node_io_capacity (node_id, io, position) VALUES (?1, ?2, ?3)",
            params![node_id, channel, position as i64],
        )?;
    }
    Ok(())
}

fn replace_skills(tx: &rusqlite::Transaction<'_>, node_id: &str, skills: &[String]) -> Result<()> {
    tx.execute("DELETE FROM node_skill_capacity WHERE node_id = ?1", [node_id])?;
    for (position, skill) in dedup_preserving_order(skills).iter().enumerate() {
        tx.execute(
            "INSERT OR IGNORE INTO node_skill_capacity (node_id, skill, position) VALUES (?1, ?2, ?3)",
            params![node_id, skill, position as i64],
        )?;
    }
    Ok(())
}

#[async_trait]
impl RegistryStore for SqliteRegistryStore {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {NODE_COLUMNS} FROM subnet_nodes ORDER BY node_id"))?;
            let rows = stmt.query_map([], node_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<NodeRecord>> {
        let node_id = node_id.to_string();
        self.run(move |conn| {
            let record = conn
                .query_row(
                    &format!("SELECT {NODE_COLUMNS} FROM subnet_nodes WHERE node_id = ?1"),
                    [&node_id],
                    node_from_row,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    async fn upsert_node(&self, record: &NodeRecord) -> Result<()> {
        let node_id = record.node_id.clone();
        let subnet_id = record.subnet_id.clone();
        let roles = serde_json::to_string(&record.roles)?;
        let hostname = record.hostname.clone();
        let base_url = record.base_url.clone();
        let last_seen = record.last_seen.to_rfc3339();
        let extra = serde_json::to_string(&record.extra)?;

        self.run(move |conn| {
            conn.execute(
                r#"
                INSERT INTO subnet_nodes (node_id, subnet_id, roles, hostname, base_url, last_seen, extra)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(node_id) DO UPDATE SET
                    subnet_id = excluded.subnet_id,
                    roles = excluded.roles,
                    hostname = excluded.hostname,
                    base_url = excluded.base_url,
                    last_seen = excluded.last_seen,
                    extra = excluded.extra
                "#,
                params![node_id, subnet_id, roles, hostname, base_url, last_seen, extra],
            )?;
            Ok(())
        })
        .await
    }

    async fn replace_io_capacity(&self, node_id: &str, io: &[String]) -> Result<()> {
        let node_id = node_id.to_string();
        let io = io.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            replace_io(&tx, &node_id, &io)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn replace_skill_capacity(&self, node_id: &str, skills: &[String]) -> Result<()> {
        let node_id = node_id.to_string();
        let skills = skills.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            replace_skills(&tx, &node_id, &skills)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn touch_heartbeat(
        &self,
        node_id: &str,
        ts: DateTime<Utc>,
        capacity: Option<&CapabilitySet>,
    ) -> Result<bool> {
        let node_id = node_id.to_string();
        let ts = ts.to_rfc3339();
        let capacity = capacity.cloned();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE subnet_nodes SET last_seen = ?1 WHERE node_id = ?2",
                params![ts, node_id],
            )?;
            if updated == 0 {
                return Ok(false);
            }
            if let Some(capacity) = capacity {
                replace_io(&tx, &node_id, &capacity.io)?;
                replace_skills(&tx, &node_id, &capacity.skills)?;
            }
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn nodes_with_skill(&self, skill: &str) -> Result<Vec<NodeRecord>> {
        let skill = skill.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT n.node_id, n.subnet_id, n.roles, n.hostname, n.base_url, n.last_seen, n.extra
                FROM subnet_nodes n
                JOIN node_skill_capacity s ON s.node_id = n.node_id
                WHERE s.skill = ?1
                ORDER BY n.node_id
                "#,
            )?;
            let rows = stmt.query_map([&skill], node_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn capabilities(&self, node_id: &str) -> Result<CapabilitySet> {
        let node_id = node_id.to_string();
        self.run(move |conn| {
            let mut io_stmt = conn.prepare(
                "SELECT io FROM node_io_capacity WHERE node_id = ?1 ORDER BY position",
            )?;
            let io = io_stmt
                .query_map([&node_id], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut skill_stmt = conn.prepare(
                "SELECT skill FROM node_skill_capacity WHERE node_id = ?1 ORDER BY position",
            )?;
            let skills = skill_stmt
                .query_map([&node_id], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(CapabilitySet::new(io, skills))
        })
        .await
    }

    async fn upsert_scenario(
        &self,
        workspace_id: &str,
        scenario_id: &str,
        version: &str,
    ) -> Result<ScenarioRow> {
        let row = ScenarioRow {
            workspace_id: workspace_id.to_string(),
            scenario_id: scenario_id.to_string(),
            version: version.to_string(),
            installed_at: Utc::now(),
        };
        let stored = row.clone();
        self.run(move |conn| {
            conn.execute(
                r#"
                INSERT INTO scenarios (workspace_id, scenario_id, version, installed_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(workspace_id, scenario_id) DO UPDATE SET
                    version = excluded.version,
                    installed_at = excluded.installed_at
                "#,
                params![
                    stored.workspace_id,
                    stored.scenario_id,
                    stored.version,
                    stored.installed_at.to_rfc3339()
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(row)
    }

    async fn get_scenario(
        &self,
        workspace_id: &str,
        scenario_id: &str,
    ) -> Result<Option<ScenarioRow>> {
        let workspace_id = workspace_id.to_string();
        let scenario_id = scenario_id.to_string();
        self.run(move |conn| {
            let row = conn
                .query_row(
                    r#"
                    SELECT workspace_id, scenario_id, version, installed_at
                    FROM scenarios WHERE workspace_id = ?1 AND scenario_id = ?2
                    "#,
                    params![workspace_id, scenario_id],
                    scenario_from_row,
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    async fn list_installed(&self, workspace_id: &str) -> Result<Vec<ScenarioRow>> {
        let workspace_id = workspace_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT workspace_id, scenario_id, version, installed_at
                FROM scenarios WHERE workspace_id = ?1 ORDER BY scenario_id
                "#,
            )?;
            let rows = stmt.query_map([&workspace_id], scenario_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}

/// Open a shared SQLite registry store
pub async fn create_sqlite_store(path: PathBuf) -> Result<SharedRegistryStore> {
    Ok(Arc::new(SqliteRegistryStore::new(path).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open() -> (TempDir, SqliteRegistryStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteRegistryStore::new(dir.path().join("registry.db"))
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_node_roundtrip_keeps_extra_fields() {
        let (_dir, store) = open().await;
        let mut record = NodeRecord::new("n1", Utc::now());
        record.roles.insert("hub".to_string());
        record.base_url = Some("http://10.0.0.2:8777".to_string());
        record
            .extra
            .insert("zone".to_string(), serde_json::json!("kitchen"));

        store.upsert_node(&record).await.unwrap();
        let loaded = store.get_node("n1").await.unwrap().unwrap();

        assert!(loaded.is_hub());
        assert_eq!(loaded.base_url, record.base_url);
        assert_eq!(loaded.extra.get("zone"), Some(&serde_json::json!("kitchen")));
        assert!(store.get_node("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_skill_lookup_ordered_by_node_id() {
        let (_dir, store) = open().await;
        for id in ["c", "a", "b"] {
            store.upsert_node(&NodeRecord::new(id, Utc::now())).await.unwrap();
        }
        store
            .replace_skill_capacity("c", &["weather".to_string()])
            .await
            .unwrap();
        store
            .replace_skill_capacity("a", &["weather".to_string(), "time".to_string()])
            .await
            .unwrap();

        let ids: Vec<String> = store
            .nodes_with_skill("weather")
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.node_id)
            .collect();
        assert_eq!(ids, vec!["a", "c"]);

        let caps = store.capabilities("a").await.unwrap();
        assert_eq!(caps.skills, vec!["weather".to_string(), "time".to_string()]);
    }

    #[tokio::test]
    async fn test_heartbeat_replaces_capacity() {
        let (_dir, store) = open().await;
        store.upsert_node(&NodeRecord::new("n1", Utc::now())).await.unwrap();
        store
            .replace_io_capacity("n1", &["console".to_string()])
            .await
            .unwrap();

        let caps = CapabilitySet::new(vec!["voice".to_string()], vec!["time".to_string()]);
        assert!(store.touch_heartbeat("n1", Utc::now(), Some(&caps)).await.unwrap());
        assert_eq!(store.capabilities("n1").await.unwrap(), caps);

        assert!(!store.touch_heartbeat("ghost", Utc::now(), None).await.unwrap());
    }

    #[tokio::test]
    async fn test_scenario_index_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.db");
        {
            let store = SqliteRegistryStore::new(path.clone()).await.unwrap();
            store.upsert_scenario("ws", "morning", "1.0").await.unwrap();
            store.upsert_scenario("ws", "morning", "1.1").await.unwrap();
        }

        let store = SqliteRegistryStore::new(path).await.unwrap();
        let rows = store.list_installed("ws").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version, "1.1");
        assert!(store.get_scenario("other", "morning").await.unwrap().is_none());
    }
}
