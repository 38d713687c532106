//! In-memory registry store
//!
//! Used by tests and by nodes that do not need the registry to survive a restart

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nodemesh_core::{CapabilitySet, NodeRecord, ScenarioRow};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::trait_::{
    dedup_preserving_order, RegistryStore, Result, SharedRegistryStore, StoreError,
};

#[derive(Debug, Default)]
struct RegistryState {
    nodes: BTreeMap<String, NodeRecord>,
    capacity: HashMap<String, CapabilitySet>,
    scenarios: BTreeMap<(String, String), ScenarioRow>,
}

/// In-memory registry store implementation
#[derive(Debug, Default)]
pub struct MemoryRegistryStore {
    state: Mutex<RegistryState>,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, RegistryState>> {
        self.state.lock().map_err(|e| StoreError::Lock(e.to_string()))
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        let state = self.lock()?;
        Ok(state.nodes.values().cloned().collect())
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<NodeRecord>> {
        let state = self.lock()?;
        Ok(state.nodes.get(node_id).cloned())
    }

    async fn upsert_node(&self, record: &NodeRecord) -> Result<()> {
        let mut state = self.lock()?;
        state.nodes.insert(record.node_id.clone(), record.clone());
        Ok(())
    }

    async fn replace_io_capacity(&self, node_id: &str, io: &[String]) -> Result<()> {
        let mut state = self.lock()?;
        state.capacity.entry(node_id.to_string()).or_default().io = dedup_preserving_order(io);
        Ok(())
    }

    async fn replace_skill_capacity(&self, node_id: &str, skills: &[String]) -> Result<()> {
        let mut state = self.lock()?;
        state.capacity.entry(node_id.to_string()).or_default().skills =
            dedup_preserving_order(skills);
        Ok(())
    }

    async fn touch_heartbeat(
        &self,
        node_id: &str,
        ts: DateTime<Utc>,
        capacity: Option<&CapabilitySet>,
    ) -> Result<bool> {
        let mut state = self.lock()?;
        let Some(record) = state.nodes.get_mut(node_id) else {
            return Ok(false);
        };
        record.last_seen = ts;

        if let Some(capacity) = capacity {
            state.capacity.insert(
                node_id.to_string(),
                CapabilitySet::new(
                    dedup_preserving_order(&capacity.io),
                    dedup_preserving_order(&capacity.skills),
                ),
            );
        }
        Ok(true)
    }

    async fn nodes_with_skill(&self, skill: &str) -> Result<Vec<NodeRecord>> {
        let state = self.lock()?;
        Ok(state
            .nodes
            .values()
            .filter(|n| {
                state
                    .capacity
                    .get(&n.node_id)
                    .is_some_and(|c| c.has_skill(skill))
            })
            .cloned()
            .collect())
    }

    async fn capabilities(&self, node_id: &str) -> Result<CapabilitySet> {
        let state = self.lock()?;
        Ok(state.capacity.get(node_id).cloned().unwrap_or_default())
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
        let mut state = self.lock()?;
        state.scenarios.insert(
            (workspace_id.to_string(), scenario_id.to_string()),
            row.clone(),
        );
        Ok(row)
    }

    async fn get_scenario(
        &self,
        workspace_id: &str,
        scenario_id: &str,
    ) -> Result<Option<ScenarioRow>> {
        let state = self.lock()?;
        Ok(state
            .scenarios
            .get(&(workspace_id.to_string(), scenario_id.to_string()))
            .cloned())
    }

    async fn list_installed(&self, workspace_id: &str) -> Result<Vec<ScenarioRow>> {
        let state = self.lock()?;
        Ok(state
            .scenarios
            .values()
            .filter(|row| row.workspace_id == workspace_id)
            .cloned()
            .collect())
    }
}

/// Create a new shared in-memory registry store
pub fn create_memory_store() -> SharedRegistryStore {
    Arc::new(MemoryRegistryStore::new())
}
