//! Registry store trait definition
//!
//! Abstract interface for node records, capability lists and the scenario
//! install index

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nodemesh_core::{CapabilitySet, NodeRecord, ScenarioRow};
use std::sync::Arc;
use thiserror::Error;

/// Store error
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Lock poisoned: {0}")]
    Lock(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable storage behind the presence directory
///
/// Each method is atomic on its own; callers serialize multi-step updates.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// All persisted nodes, ordered by node id
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>>;

    async fn get_node(&self, node_id: &str) -> Result<Option<NodeRecord>>;

    /// Insert or fully overwrite a node record
    async fn upsert_node(&self, record: &NodeRecord) -> Result<()>;

    /// Replace the node's I/O channel list
    async fn replace_io_capacity(&self, node_id: &str, io: &[String]) -> Result<()>;

    /// Replace the node's skill list
    async fn replace_skill_capacity(&self, node_id: &str, skills: &[String]) -> Result<()>;

    /// Bump `last_seen` and optionally replace capabilities.
    ///
    /// Returns `false` without writing anything when the node is unknown.
    async fn touch_heartbeat(
        &self,
        node_id: &str,
        ts: DateTime<Utc>,
        capacity: Option<&CapabilitySet>,
    ) -> Result<bool>;

    /// Nodes whose skill list contains `skill`, ordered by node id
    async fn nodes_with_skill(&self, skill: &str) -> Result<Vec<NodeRecord>>;

    async fn capabilities(&self, node_id: &str) -> Result<CapabilitySet>;

    /// Record that `scenario_id` at `version` is installed in `workspace_id`
    async fn upsert_scenario(
        &self,
        workspace_id: &str,
        scenario_id: &str,
        version: &str,
    ) -> Result<ScenarioRow>;

    async fn get_scenario(&self, workspace_id: &str, scenario_id: &str)
        -> Result<Option<ScenarioRow>>;

    /// Installed scenarios of a workspace, ordered by scenario id
    async fn list_installed(&self, workspace_id: &str) -> Result<Vec<ScenarioRow>>;
}

/// Shared store reference
pub type SharedRegistryStore = Arc<dyn RegistryStore>;

/// Drop duplicates while keeping first-seen order
pub(crate) fn dedup_preserving_order(items: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}
