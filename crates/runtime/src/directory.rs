//! Node Presence Directory
//!
//! Responsibilities:
//! - Register nodes and replace their capability lists
//! - Track liveness in a volatile overlay on top of the registry store
//! - Answer capability and address lookups
//!
//! Mutations (register, heartbeat, sweep) are serialized by one lock.
//! Reads go straight to the overlay and may observe a slightly stale state.

use chrono::{DateTime, Utc};
use nodemesh_core::{CapabilitySet, LiveState, NodeInfo, NodeRecord, NodeView};
use nodemesh_storage::{SharedRegistryStore, StoreError};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid node: {0}")]
    InvalidNode(String),
}

pub type Result<T> = std::result::Result<T, DirectoryError>;

pub struct NodeDirectory {
    store: SharedRegistryStore,
    live: RwLock<HashMap<String, LiveState>>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for NodeDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDirectory").finish_non_exhaustive()
    }
}

impl NodeDirectory {
    /// Empty overlay; nothing is preloaded
    pub fn new(store: SharedRegistryStore) -> Self {
        Self {
            store,
            live: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Build a directory and preload every persisted node as offline
    pub async fn load(store: SharedRegistryStore) -> Result<Self> {
        let nodes = store.list_nodes().await?;
        let live = nodes
            .iter()
            .map(|n| (n.node_id.clone(), LiveState::offline(n.last_seen)))
            .collect::<HashMap<_, _>>();
        debug!(nodes = live.len(), "directory preloaded");

        Ok(Self {
            store,
            live: RwLock::new(live),
            write_lock: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &SharedRegistryStore {
        &self.store
    }

    /// Upsert the node, replace its capabilities and mark it online
    pub async fn register(&self, info: NodeInfo) -> Result<NodeRecord> {
        if info.node_id.trim().is_empty() {
            return Err(DirectoryError::InvalidNode("empty node_id".to_string()));
        }

        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let (record, capacity) = info.into_parts(now);

        self.store.upsert_node(&record).await?;
        self.store
            .replace_io_capacity(&record.node_id, &capacity.io)
            .await?;
        self.store
            .replace_skill_capacity(&record.node_id, &capacity.skills)
            .await?;

        self.live
            .write()
            .await
            .insert(record.node_id.clone(), LiveState::online(now));

        info!(
            node_id = %record.node_id,
            skills = capacity.skills.len(),
            io = capacity.io.len(),
            "node registered"
        );
        Ok(record)
    }

    /// Record a sign of life.
    ///
    /// Unknown nodes get no persisted record, but the overlay still marks
    /// them online. Returns whether a persisted record was touched.
    pub async fn heartbeat(&self, node_id: &str, capacity: Option<CapabilitySet>) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();

        let known = self
            .store
            .touch_heartbeat(node_id, now, capacity.as_ref())
            .await?;
        if !known {
            debug!(node_id = %node_id, "heartbeat from unregistered node");
        }

        self.live
            .write()
            .await
            .insert(node_id.to_string(), LiveState::online(now));
        Ok(known)
    }

    /// Flip every node silent for longer than `ttl` to offline.
    ///
    /// Returns the ids that changed state during this sweep.
    pub async fn sweep_stale(&self, ttl: Duration) -> Vec<String> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::weeks(52));
        self.sweep_stale_at(Utc::now(), ttl).await
    }

    pub async fn sweep_stale_at(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> Vec<String> {
        let _guard = self.write_lock.lock().await;
        let mut live = self.live.write().await;

        let mut flipped = Vec::new();
        for (node_id, state) in live.iter_mut() {
            if state.online && state.is_expired(now, ttl) {
                state.online = false;
                flipped.push(node_id.clone());
            }
        }
        flipped.sort();

        if !flipped.is_empty() {
            info!(nodes = ?flipped, "nodes went offline");
        }
        flipped
    }

    /// Unknown nodes are offline
    pub async fn is_online(&self, node_id: &str) -> bool {
        self.live
            .read()
            .await
            .get(node_id)
            .map(|s| s.online)
            .unwrap_or(false)
    }

    pub async fn live_state(&self, node_id: &str) -> Option<LiveState> {
        self.live.read().await.get(node_id).copied()
    }

    /// Persisted nodes exposing `skill`, ordered by node id
    pub async fn find_nodes_with_skill(
        &self,
        skill: &str,
        require_online: bool,
    ) -> Result<Vec<NodeRecord>> {
        let nodes = self.store.nodes_with_skill(skill).await?;
        if !require_online {
            return Ok(nodes);
        }

        let live = self.live.read().await;
        Ok(nodes
            .into_iter()
            .filter(|n| live.get(&n.node_id).is_some_and(|s| s.online))
            .collect())
    }

    pub async fn base_url(&self, node_id: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .get_node(node_id)
            .await?
            .and_then(|n| n.base_url))
    }

    pub async fn capabilities(&self, node_id: &str) -> Result<CapabilitySet> {
        Ok(self.store.capabilities(node_id).await?)
    }

    /// Every persisted node with its current online status
    pub async fn list_known_nodes(&self) -> Result<Vec<NodeView>> {
        let nodes = self.store.list_nodes().await?;
        let live = self.live.read().await;
        Ok(nodes
            .into_iter()
            .map(|record| {
                let online = live.get(&record.node_id).is_some_and(|s| s.online);
                NodeView { record, online }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nodemesh_core::ScenarioRow;
    use nodemesh_storage::{RegistryStore, create_memory_store};
    use std::sync::Arc;

    /// Store whose every call fails
    struct BrokenStore;

    fn broken<T>() -> nodemesh_storage::Result<T> {
        Err(StoreError::Database("disk unavailable".to_string()))
    }

    #[async_trait]
    impl RegistryStore for BrokenStore {
        async fn list_nodes(&self) -> nodemesh_storage::Result<Vec<NodeRecord>> {
            broken()
        }

        async fn get_node(&self, _node_id: &str) -> nodemesh_storage::Result<Option<NodeRecord>> {
            broken()
        }

        async fn upsert_node(&self, _record: &NodeRecord) -> nodemesh_storage::Result<()> {
            broken()
        }

        async fn replace_io_capacity(&self, _node_id: &str, _io: &[String]) -> nodemesh_storage::Result<()> {
            broken()
        }

        async fn replace_skill_capacity(
            &self,
            _node_id: &str,
            _skills: &[String],
        ) -> nodemesh_storage::Result<()> {
            broken()
        }

        async fn touch_heartbeat(
            &self,
            _node_id: &str,
            _ts: DateTime<Utc>,
            _capacity: Option<&CapabilitySet>,
        ) -> nodemesh_storage::Result<bool> {
            broken()
        }

        async fn nodes_with_skill(&self, _skill: &str) -> nodemesh_storage::Result<Vec<NodeRecord>> {
            broken()
        }

        async fn capabilities(&self, _node_id: &str) -> nodemesh_storage::Result<CapabilitySet> {
            broken()
        }

        async fn upsert_scenario(
            &self,
            _workspace_id: &str,
            _scenario_id: &str,
            _version: &str,
        ) -> nodemesh_storage::Result<ScenarioRow> {
            broken()
        }

        async fn get_scenario(
            &self,
            _workspace_id: &str,
            _scenario_id: &str,
        ) -> nodemesh_storage::Result<Option<ScenarioRow>> {
            broken()
        }

        async fn list_installed(&self, _workspace_id: &str) -> nodemesh_storage::Result<Vec<ScenarioRow>> {
            broken()
        }
    }

    fn info(id: &str, skills: &[&str]) -> NodeInfo {
        NodeInfo::new(id)
            .with_base_url(format!("http://{id}:8777"))
            .with_capacity(CapabilitySet::new(
                vec!["console".to_string()],
                skills.iter().map(|s| s.to_string()).collect(),
            ))
    }

    #[tokio::test]
    async fn test_register_marks_online() {
        let dir = NodeDirectory::new(create_memory_store());
        dir.register(info("n1", &["time"])).await.unwrap();

        assert!(dir.is_online("n1").await);
        assert!(!dir.is_online("n2").await);
        assert_eq!(
            dir.base_url("n1").await.unwrap().as_deref(),
            Some("http://n1:8777")
        );
    }

    #[tokio::test]
    async fn test_store_errors_reach_callers() {
        let dir = NodeDirectory::new(Arc::new(BrokenStore));

        let err = dir.register(info("n1", &["time"])).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Store(_)));
        assert!(!dir.is_online("n1").await);
        assert!(dir.live_state("n1").await.is_none());

        assert!(matches!(
            dir.heartbeat("n1", None).await,
            Err(DirectoryError::Store(_))
        ));
        assert!(matches!(
            dir.list_known_nodes().await,
            Err(DirectoryError::Store(_))
        ));
        assert!(matches!(
            dir.find_nodes_with_skill("time", false).await,
            Err(DirectoryError::Store(_))
        ));
        assert!(NodeDirectory::load(Arc::new(BrokenStore)).await.is_err());
    }

    #[tokio::test]
    async fn test_register_twice_replaces() {
        let store = create_memory_store();
        let dir = NodeDirectory::new(store.clone());
        dir.register(info("n1", &["time", "weather"])).await.unwrap();
        dir.register(
            NodeInfo::new("n1")
                .with_base_url("http://n1-new:8777")
                .with_capacity(CapabilitySet::new(vec![], vec!["music".to_string()])),
        )
        .await
        .unwrap();

        let nodes = dir.list_known_nodes().await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(nodes[0].online);
        assert_eq!(nodes[0].record.base_url.as_deref(), Some("http://n1-new:8777"));
        assert_eq!(
            dir.capabilities("n1").await.unwrap(),
            CapabilitySet::new(vec![], vec!["music".to_string()])
        );
        assert!(dir.find_nodes_with_skill("time", false).await.unwrap().is_empty());
        assert_eq!(store.list_nodes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_rejects_empty_id() {
        let dir = NodeDirectory::new(create_memory_store());
        let err = dir.register(NodeInfo::new("  ")).await.unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidNode(_)));
    }

    #[tokio::test]
    async fn test_sweep_then_heartbeat() {
        let dir = NodeDirectory::new(create_memory_store());
        dir.register(info("n1", &[])).await.unwrap();

        let ttl = chrono::Duration::seconds(45);
        let now = Utc::now();
        assert!(dir.sweep_stale_at(now, ttl).await.is_empty());
        assert!(dir.is_online("n1").await);

        let later = now + chrono::Duration::seconds(46);
        assert_eq!(dir.sweep_stale_at(later, ttl).await, vec!["n1".to_string()]);
        assert!(!dir.is_online("n1").await);

        // second sweep reports nothing new
        assert!(dir.sweep_stale_at(later, ttl).await.is_empty());

        assert!(dir.heartbeat("n1", None).await.unwrap());
        assert!(dir.is_online("n1").await);
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_node_only_touches_overlay() {
        let store = create_memory_store();
        let dir = NodeDirectory::new(store.clone());

        assert!(!dir.heartbeat("ghost", None).await.unwrap());
        assert!(dir.is_online("ghost").await);
        assert!(store.get_node("ghost").await.unwrap().is_none());
        assert!(dir.list_known_nodes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_replaces_capacity() {
        let dir = NodeDirectory::new(create_memory_store());
        dir.register(info("n1", &["time"])).await.unwrap();
        dir.heartbeat("n1", Some(CapabilitySet::new(vec![], vec!["weather".to_string()])))
            .await
            .unwrap();

        assert!(dir.find_nodes_with_skill("time", false).await.unwrap().is_empty());
        assert_eq!(dir.find_nodes_with_skill("weather", true).await.unwrap().len(), 1);
        assert!(dir.capabilities("n1").await.unwrap().io.is_empty());
    }

    #[tokio::test]
    async fn test_find_nodes_with_skill_online_filter() {
        let dir = NodeDirectory::new(create_memory_store());
        dir.register(info("b", &["weather"])).await.unwrap();
        dir.register(info("a", &["weather"])).await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(60);
        dir.sweep_stale_at(later, chrono::Duration::seconds(45)).await;
        dir.heartbeat("b", None).await.unwrap();

        let online: Vec<String> = dir
            .find_nodes_with_skill("weather", true)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.node_id)
            .collect();
        assert_eq!(online, vec!["b"]);

        let all: Vec<String> = dir
            .find_nodes_with_skill("weather", false)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.node_id)
            .collect();
        assert_eq!(all, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_load_preloads_offline() {
        let store = create_memory_store();
        let seen = Utc::now() - chrono::Duration::seconds(5);
        store.upsert_node(&NodeRecord::new("n1", seen)).await.unwrap();

        let dir = NodeDirectory::load(store).await.unwrap();
        let state = dir.live_state("n1").await.unwrap();
        assert!(!state.online);
        assert_eq!(state.last_seen, seen);

        let views = dir.list_known_nodes().await.unwrap();
        assert_eq!(views.len(), 1);
        assert!(!views[0].online);
    }
}
